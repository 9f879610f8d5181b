//! Server builder
//!
//! Collects configuration, the application handler and the callbacks it
//! wants, then produces the [`TaskServer`] for one process.

use std::sync::Arc;

use tasklane_core::{Engine, EventKind, EventMask, TaskConfig, TaskResult};
use tracing::info;

use crate::router::{EventRouter, NoopHandler, ServerHandler};
use crate::server::TaskServer;

/// Builder for a per-process [`TaskServer`]
pub struct ServerBuilder {
    engine: Arc<dyn Engine>,
    config: TaskConfig,
    handler: Arc<dyn ServerHandler>,
    events: EventMask,
    receive_header_len: Option<usize>,
}

impl ServerBuilder {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            config: TaskConfig::default(),
            handler: Arc::new(NoopHandler),
            events: EventMask::NONE,
            receive_header_len: None,
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ServerHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Register the callback for one event kind
    pub fn on(mut self, kind: EventKind) -> Self {
        self.events = self.events.with(kind);
        self
    }

    /// Register callbacks for every kind in `events`
    pub fn with_events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }

    /// Strip a fixed-length header from received buffers
    pub fn receive_header(mut self, header_len: usize) -> Self {
        self.receive_header_len = Some(header_len);
        self
    }

    pub fn build(self) -> TaskResult<TaskServer> {
        self.config.validate()?;

        let mut router = EventRouter::new(self.handler, self.events);
        if let Some(header_len) = self.receive_header_len {
            router = router.with_receive_header(header_len);
        }

        info!(
            "Task server for {} built with {} callbacks",
            self.engine.role(),
            self.events.kinds().count()
        );
        Ok(TaskServer::new(self.engine, self.config, router))
    }
}
