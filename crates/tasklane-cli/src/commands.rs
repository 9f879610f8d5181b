//! Command handlers
//!
//! Every command runs on a fresh in-process cluster whose task workers echo
//! payloads back with the configured suffix.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tasklane_core::{Engine, EventKind, TaskId, WorkerId};
use tasklane_harness::{FnExecutor, HarnessConfig, LocalCluster, TaskExecutor, TaskOutcome};
use tasklane_runtime::{ServerBuilder, ServerHandler, TaskServer};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

/// A payload as printed: text when it is UTF-8, hex otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadView {
    Text(String),
    Hex(String),
}

impl PayloadView {
    pub fn new(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => PayloadView::Text(text.to_string()),
            Err(_) => PayloadView::Hex(hex::encode(bytes)),
        }
    }
}

impl std::fmt::Display for PayloadView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadView::Text(text) => write!(f, "{}", text),
            PayloadView::Hex(hex) => write!(f, "0x{}", hex),
        }
    }
}

/// Decode a payload argument
pub fn parse_payload(arg: &str, as_hex: bool) -> Result<Vec<u8>> {
    if as_hex {
        return Ok(hex::decode(arg.trim_start_matches("0x"))?);
    }
    if arg.is_empty() {
        return Err(CliError::Payload("empty payload".to_string()));
    }
    Ok(arg.as_bytes().to_vec())
}

fn print_output<T: Serialize + std::fmt::Debug>(value: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{:#?}", value);
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Finish Collector
// ----------------------------------------------------------------------------

#[derive(Default)]
struct FinishCollector {
    results: Mutex<Vec<(TaskId, Vec<u8>)>>,
}

impl ServerHandler for FinishCollector {
    fn on_finish(&self, task_id: TaskId, data: Vec<u8>) {
        debug!("Task {} finished with {} bytes", task_id, data.len());
        self.results.lock().push((task_id, data));
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

fn build_executor(config: &AppConfig) -> Arc<dyn TaskExecutor> {
    let suffix = config.cli.echo_suffix.clone().into_bytes();
    let delay = Duration::from_millis(config.cli.task_delay_ms);
    Arc::new(FnExecutor::new(move |_, mut payload: Vec<u8>| {
        payload.extend_from_slice(&suffix);
        if delay.is_zero() {
            TaskOutcome::Reply(payload)
        } else {
            TaskOutcome::ReplyAfter(delay, payload)
        }
    }))
}

pub struct CommandDispatcher;

impl CommandDispatcher {
    pub fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        if let Commands::Config = cli.command {
            print!("{}", config.to_toml()?);
            return Ok(());
        }

        if usize::from(cli.worker) >= config.task.worker_num {
            return Err(CliError::Config(format!(
                "worker {} does not exist (worker_num is {})",
                cli.worker, config.task.worker_num
            )));
        }

        let harness = HarnessConfig {
            queue_depth: config.cli.queue_depth,
            ..HarnessConfig::default()
        };
        let cluster = LocalCluster::start(config.task.clone(), harness, build_executor(&config))?;
        let collector = Arc::new(FinishCollector::default());
        let engine: Arc<dyn Engine> = cluster.worker(cli.worker);
        let server = ServerBuilder::new(engine)
            .with_config(config.task.clone())
            .with_handler(collector.clone())
            .on(EventKind::Finish)
            .build()?;

        let default_timeout = Duration::from_millis(config.cli.default_timeout_ms);
        let timeout_or_default =
            |ms: Option<u64>| ms.map(Duration::from_millis).unwrap_or(default_timeout);

        match cli.command {
            Commands::Submit {
                payloads,
                dst,
                collect_ms,
            } => {
                let mut ids = Vec::with_capacity(payloads.len());
                for arg in &payloads {
                    let payload = parse_payload(arg, cli.hex)?;
                    ids.push(server.submit(&payload, dst)?);
                }
                info!("Submitted {} tasks", ids.len());

                collect_finished(&cluster, &server, cli.worker, ids.len(), collect_ms);

                let results: BTreeMap<u32, PayloadView> = collector
                    .results
                    .lock()
                    .iter()
                    .map(|(id, data)| (id.as_u32(), PayloadView::new(data)))
                    .collect();
                if results.len() < ids.len() {
                    warn!("Only {}/{} results arrived", results.len(), ids.len());
                }
                print_output(&results, cli.json)
            }
            Commands::WaitOne {
                payload,
                dst,
                timeout_ms,
            } => {
                let payload = parse_payload(&payload, cli.hex)?;
                let result = server.wait_one(&payload, timeout_or_default(timeout_ms), dst)?;
                print_output(&PayloadView::new(&result), cli.json)
            }
            Commands::WaitAll {
                payloads,
                timeout_ms,
                fail_index,
            } => {
                let payloads = payloads
                    .iter()
                    .map(|arg| parse_payload(arg, cli.hex))
                    .collect::<Result<Vec<_>>>()?;
                for index in fail_index {
                    cluster.reject_dispatch(index);
                }

                let started = Instant::now();
                let results = server.wait_all(&payloads, timeout_or_default(timeout_ms))?;
                info!(
                    "Wait-all returned {}/{} results in {:?}",
                    results.len(),
                    payloads.len(),
                    started.elapsed()
                );

                let view: BTreeMap<usize, PayloadView> = results
                    .iter()
                    .map(|(index, data)| (*index, PayloadView::new(data)))
                    .collect();
                print_output(&view, cli.json)
            }
            Commands::Config => Ok(()),
        }
    }
}

/// Route finish events from the worker's pipe until `expected` results are
/// in or `collect_ms` passes
fn collect_finished(
    cluster: &LocalCluster,
    server: &TaskServer,
    worker: u16,
    expected: usize,
    collect_ms: u64,
) {
    let deadline = Instant::now().checked_add(Duration::from_millis(collect_ms));
    let mut routed = 0usize;

    while routed < expected && deadline.map_or(true, |deadline| Instant::now() < deadline) {
        let events = cluster.take_events(WorkerId::new(worker));
        if events.is_empty() {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        for event in events {
            match server.handle_event(event) {
                Ok(_) => routed += 1,
                Err(e) => warn!("Failed to route event: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_view() {
        assert_eq!(PayloadView::new(b"ok"), PayloadView::Text("ok".to_string()));
        assert_eq!(
            PayloadView::new(&[0xff, 0x00]),
            PayloadView::Hex("ff00".to_string())
        );
        assert_eq!(PayloadView::new(&[0xff]).to_string(), "0xff");
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("abc", false).unwrap(), b"abc");
        assert_eq!(parse_payload("0x0102", true).unwrap(), vec![1, 2]);
        assert!(parse_payload("zz", true).is_err());
        assert!(parse_payload("", false).is_err());
    }
}
