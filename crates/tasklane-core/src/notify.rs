//! Per-worker wake-up channel
//!
//! A notification carries no payload and no correlation id; it only says
//! "look at your result slot". Stale wake-ups from an earlier, abandoned wait
//! therefore have to be drained before a new wait starts.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Wake-up channel owned by one worker
pub trait Notifier: Send + Sync {
    /// Signal the owning worker
    fn notify(&self);

    /// Discard every pending signal without blocking, returning how many
    /// were dropped
    fn drain(&self) -> u64;

    /// Block for up to `timeout` for one signal; `true` if one was consumed
    fn wait(&self, timeout: Duration) -> bool;
}

/// Counting notifier with eventfd-like semantics
///
/// Each [`notify`](Notifier::notify) adds one to a counter; a successful
/// [`wait`](Notifier::wait) consumes everything accumulated so far, the way a
/// read on an eventfd returns and resets the counter.
#[derive(Debug, Default)]
pub struct EventCounter {
    pending: Mutex<u64>,
    signal: Condvar,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }
}

impl Notifier for EventCounter {
    fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending += 1;
        self.signal.notify_one();
    }

    fn drain(&self) -> u64 {
        std::mem::take(&mut *self.pending.lock())
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while *pending == 0 {
                    if self.signal.wait_until(&mut pending, deadline).timed_out() {
                        break;
                    }
                }
            }
            // Too far out to represent: no deadline at all
            None => {
                while *pending == 0 {
                    self.signal.wait(&mut pending);
                }
            }
        }
        if *pending == 0 {
            return false;
        }
        *pending = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_clears_stale_signals() {
        let counter = EventCounter::new();
        counter.notify();
        counter.notify();

        assert_eq!(counter.drain(), 2);
        assert_eq!(counter.drain(), 0);
        assert!(!counter.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_consumes_all_pending() {
        let counter = EventCounter::new();
        counter.notify();
        counter.notify();

        assert!(counter.wait(Duration::from_millis(10)));
        assert_eq!(counter.pending(), 0);
    }

    #[test]
    fn test_wait_times_out() {
        let counter = EventCounter::new();
        let start = Instant::now();

        assert!(!counter.wait(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_wakes_on_notify_from_other_thread() {
        let counter = Arc::new(EventCounter::new());
        let remote = Arc::clone(&counter);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.notify();
        });

        assert!(counter.wait(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_without_deadline() {
        let counter = Arc::new(EventCounter::new());
        let remote = Arc::clone(&counter);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.notify();
        });

        assert!(counter.wait(Duration::MAX));
        assert_eq!(counter.pending(), 0);
        handle.join().unwrap();
    }
}
