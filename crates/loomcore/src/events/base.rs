use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events dispatched through a node's middleware during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    BlueprintStarted {
        execution_id: ExecutionId,
        blueprint: String,
        timestamp: DateTime<Utc>,
    },
    BlueprintFinished {
        execution_id: ExecutionId,
        blueprint: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeEntered {
        node_id: String,
        node_type: String,
        slot: String,
        timestamp: DateTime<Utc>,
    },
    NodeExited {
        node_id: String,
        node_type: String,
        slot: String,
        timestamp: DateTime<Utc>,
    },
    NodeErrored {
        node_id: String,
        node_type: String,
        slot: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BlueprintStarted { .. } => "blueprint_started",
            Event::BlueprintFinished { .. } => "blueprint_finished",
            Event::NodeEntered { .. } => "node_entered",
            Event::NodeExited { .. } => "node_exited",
            Event::NodeErrored { .. } => "node_errored",
        }
    }
}

/// Event sink attached to a node and inherited by its descendants
pub trait Middleware: Send + Sync {
    fn dispatch(&self, event: Event);
}

/// Broadcast event bus; subscribers receive every dispatched event
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Middleware for EventBus {
    fn dispatch(&self, event: Event) {
        self.emit(event);
    }
}

/// Writes every event as a trace line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn dispatch(&self, event: Event) {
        match &event {
            Event::BlueprintStarted { execution_id, blueprint, .. } => {
                tracing::info!(%execution_id, blueprint = %blueprint, "blueprint started");
            }
            Event::BlueprintFinished {
                execution_id,
                blueprint,
                success,
                duration_ms,
                ..
            } => {
                tracing::info!(%execution_id, blueprint = %blueprint, success, duration_ms, "blueprint finished");
            }
            Event::NodeEntered { node_id, slot, .. } => {
                tracing::trace!(node = %node_id, slot = %slot, "node entered");
            }
            Event::NodeExited { node_id, slot, .. } => {
                tracing::trace!(node = %node_id, slot = %slot, "node exited");
            }
            Event::NodeErrored { node_id, slot, error, .. } => {
                tracing::error!(node = %node_id, slot = %slot, error = %error, "node errored");
            }
        }
    }
}

/// Fans each event out to several middlewares
#[derive(Default, Clone)]
pub struct Dispatcher {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl Middleware for Dispatcher {
    fn dispatch(&self, event: Event) {
        if let Some((last, rest)) = self.middlewares.split_last() {
            for middleware in rest {
                middleware.dispatch(event.clone());
            }
            last.dispatch(event);
        }
    }
}
