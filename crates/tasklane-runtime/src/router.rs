//! Event router
//!
//! Typed dispatch table from engine events to application callbacks. The
//! only work it does itself is normalization: datagrams are decoded, receive
//! buffers lose their fixed header, and task, finish and pipe-message frames
//! are unpacked before the handler sees them.

use std::sync::Arc;

use tasklane_core::{
    decode_datagram, split_header, ClientInfo, EngineEvent, EventKind, EventMask, FrameHeader,
    Framer, SessionId, TaskId, TaskResult, WorkerId,
};
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Handler Interface
// ----------------------------------------------------------------------------

/// Application callbacks; every method defaults to doing nothing
pub trait ServerHandler: Send + Sync {
    fn on_start(&self) {}

    fn on_shutdown(&self) {}

    fn on_worker_start(&self, _worker: WorkerId) {}

    fn on_worker_stop(&self, _worker: WorkerId) {}

    fn on_connect(&self, _session: SessionId, _reactor: u16) {}

    fn on_receive(&self, _session: SessionId, _data: Vec<u8>) {}

    fn on_close(&self, _session: SessionId, _reactor: u16) {}

    fn on_packet(&self, _data: Vec<u8>, _client: ClientInfo) {}

    /// Execute a task in a task worker; a returned payload is sent back to
    /// the issuing worker as the task's result
    fn on_task(&self, _task_id: TaskId, _src_worker: WorkerId, _data: Vec<u8>) -> Option<Vec<u8>> {
        None
    }

    /// Result of a fire-and-forget task issued by this worker
    fn on_finish(&self, _task_id: TaskId, _data: Vec<u8>) {}

    fn on_pipe_message(&self, _src_worker: WorkerId, _data: Vec<u8>) {}
}

/// Handler with no callbacks, for servers that only issue tasks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ServerHandler for NoopHandler {}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

/// What became of a routed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The handler was invoked
    Delivered,
    /// No callback registered for this event kind
    Ignored,
    /// Malformed input; the handler was not invoked
    Dropped,
    /// `on_task` produced a result that must be finished for `task`
    Reply { task: FrameHeader, result: Vec<u8> },
}

/// Routes engine events to the callbacks the application registered
pub struct EventRouter {
    handler: Arc<dyn ServerHandler>,
    mask: EventMask,
    receive_header_len: Option<usize>,
}

impl EventRouter {
    pub fn new(handler: Arc<dyn ServerHandler>, mask: EventMask) -> Self {
        Self {
            handler,
            mask,
            receive_header_len: None,
        }
    }

    /// Strip a fixed-length header from every received buffer
    pub fn with_receive_header(mut self, header_len: usize) -> Self {
        self.receive_header_len = Some(header_len);
        self
    }

    /// Callbacks the engine should hook up
    pub fn registered(&self) -> EventMask {
        self.mask
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.mask.contains(kind)
    }

    /// Deliver one engine event to the matching callback
    ///
    /// Framed payloads that cannot be unpacked are reported as an error;
    /// everything else malformed is [`Routed::Dropped`].
    pub fn route(&self, event: EngineEvent) -> TaskResult<Routed> {
        let kind = event.kind();
        if !self.mask.contains(kind) {
            debug!("No callback registered for {:?}", kind);
            if let EngineEvent::Task(frame)
            | EngineEvent::Finish(frame)
            | EngineEvent::PipeMessage(frame) = event
            {
                frame.discard();
            }
            return Ok(Routed::Ignored);
        }

        let handler = self.handler.as_ref();
        match event {
            EngineEvent::Start => handler.on_start(),
            EngineEvent::Shutdown => handler.on_shutdown(),
            EngineEvent::WorkerStart { worker } => handler.on_worker_start(worker),
            EngineEvent::WorkerStop { worker } => handler.on_worker_stop(worker),
            EngineEvent::Connect { session, reactor } => handler.on_connect(session, reactor),
            EngineEvent::Close { session, reactor } => handler.on_close(session, reactor),
            EngineEvent::Receive { session, data } => {
                let data = match self.receive_header_len {
                    Some(header_len) => match split_header(&data, header_len) {
                        Some((_, payload)) => payload,
                        None => {
                            warn!(
                                "Session {} sent {} bytes, not more than the {}-byte header",
                                session,
                                data.len(),
                                header_len
                            );
                            return Ok(Routed::Dropped);
                        }
                    },
                    None => data,
                };
                handler.on_receive(session, data);
            }
            EngineEvent::Packet {
                kind,
                server_socket,
                raw,
            } => match decode_datagram(kind, server_socket, &raw) {
                Some(datagram) => handler.on_packet(datagram.payload, datagram.client),
                None => {
                    warn!("Dropping malformed {:?} datagram of {} bytes", kind, raw.len());
                    return Ok(Routed::Dropped);
                }
            },
            EngineEvent::Task(frame) => {
                let header = frame.header;
                let data = Framer::unpack(frame)?;
                if let Some(result) = handler.on_task(header.task_id, header.origin, data) {
                    return Ok(Routed::Reply {
                        task: header,
                        result,
                    });
                }
            }
            EngineEvent::Finish(frame) => {
                let task_id = frame.task_id();
                let data = Framer::unpack(frame)?;
                handler.on_finish(task_id, data);
            }
            EngineEvent::PipeMessage(frame) => {
                let src_worker = frame.origin();
                let data = Framer::unpack(frame)?;
                handler.on_pipe_message(src_worker, data);
            }
        }

        Ok(Routed::Delivered)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tasklane_core::{encode_datagram, DatagramKind, FrameKind, TaskConfig};

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl ServerHandler for RecordingHandler {
        fn on_receive(&self, session: SessionId, data: Vec<u8>) {
            self.calls
                .lock()
                .push(format!("receive {} {}", session, String::from_utf8_lossy(&data)));
        }

        fn on_packet(&self, data: Vec<u8>, client: ClientInfo) {
            self.calls.lock().push(format!(
                "packet {}:{} {}",
                client.address,
                client.port,
                String::from_utf8_lossy(&data)
            ));
        }

        fn on_task(&self, task_id: TaskId, src_worker: WorkerId, data: Vec<u8>) -> Option<Vec<u8>> {
            self.calls.lock().push(format!("task {} from {}", task_id, src_worker));
            let mut reply = data;
            reply.extend_from_slice(b"-done");
            Some(reply)
        }

        fn on_pipe_message(&self, src_worker: WorkerId, data: Vec<u8>) {
            self.calls
                .lock()
                .push(format!("pipe {} {}", src_worker, String::from_utf8_lossy(&data)));
        }
    }

    fn create_test_router(mask: EventMask) -> (Arc<RecordingHandler>, EventRouter) {
        let handler = Arc::new(RecordingHandler::default());
        let router = EventRouter::new(handler.clone(), mask);
        (handler, router)
    }

    #[test]
    fn test_unregistered_event_is_ignored() {
        let (handler, router) = create_test_router(EventMask::NONE.with(EventKind::Task));
        let routed = router
            .route(EngineEvent::Receive {
                session: 1,
                data: b"hello".to_vec(),
            })
            .unwrap();

        assert_eq!(routed, Routed::Ignored);
        assert!(handler.calls.lock().is_empty());
    }

    #[test]
    fn test_receive_header_split() {
        let (handler, router) = create_test_router(EventMask::all());
        let router = router.with_receive_header(4);

        let routed = router
            .route(EngineEvent::Receive {
                session: 7,
                data: b"HEADbody".to_vec(),
            })
            .unwrap();
        assert_eq!(routed, Routed::Delivered);

        // Header not strictly shorter than the frame
        let routed = router
            .route(EngineEvent::Receive {
                session: 7,
                data: b"HEAD".to_vec(),
            })
            .unwrap();
        assert_eq!(routed, Routed::Dropped);

        assert_eq!(*handler.calls.lock(), vec!["receive 7 body".to_string()]);
    }

    #[test]
    fn test_packet_is_decoded() {
        let (handler, router) = create_test_router(EventMask::all());
        let raw = encode_datagram(DatagramKind::Udp4, "10.0.0.5", 9000, b"ping").unwrap();

        router
            .route(EngineEvent::Packet {
                kind: DatagramKind::Udp4,
                server_socket: 3,
                raw,
            })
            .unwrap();

        assert_eq!(*handler.calls.lock(), vec!["packet 10.0.0.5:9000 ping".to_string()]);
    }

    #[test]
    fn test_task_reply_carries_header() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig::testing().with_tmp_dir(dir.path());
        let framer = Framer::new(&config, WorkerId::new(1));
        let frame = framer.pack(FrameKind::Task, b"job").unwrap();
        let id = frame.task_id();

        let (handler, router) = create_test_router(EventMask::all());
        match router.route(EngineEvent::Task(frame)).unwrap() {
            Routed::Reply { task, result } => {
                assert_eq!(task.task_id, id);
                assert_eq!(task.origin, WorkerId::new(1));
                assert_eq!(result, b"job-done");
            }
            other => panic!("expected reply, got {:?}", other),
        }
        assert_eq!(handler.calls.lock().len(), 1);
    }

    #[test]
    fn test_pipe_message_spilled_payload() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig::testing().with_tmp_dir(dir.path());
        let framer = Framer::new(&config, WorkerId::new(0));
        let big = vec![b'x'; config.ipc_max_size * 2];
        let frame = framer.pack(FrameKind::PipeMessage, &big).unwrap();
        assert!(frame.is_spilled());

        let (handler, router) = create_test_router(EventMask::all());
        router.route(EngineEvent::PipeMessage(frame)).unwrap();

        let calls = handler.calls.lock();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("pipe #0 xxx"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
