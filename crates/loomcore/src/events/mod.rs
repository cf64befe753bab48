mod base;

pub use base::{Dispatcher, Event, EventBus, ExecutionId, Middleware, TracingMiddleware};
