use crate::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Structured early return; carries the run's result.
    #[error("Returned early")]
    Return(Value),

    /// Structured exit; a non-zero code is a failed run.
    #[error("Exited with code {0}")]
    Exit(i32),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl FlowError {
    /// Return and Exit are expected conditions, not defects.
    pub fn is_control_flow(&self) -> bool {
        matches!(self, FlowError::Return(_) | FlowError::Exit(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Unknown port '{port}' on node {node}")]
    UnknownPort { node: String, port: String },

    #[error("Unknown signal '{signal}' on node {node}")]
    UnknownSignal { node: String, signal: String },

    #[error("Unknown slot '{slot}' on node {node}")]
    UnknownSlot { node: String, slot: String },

    #[error("Port {port} has no getter")]
    MissingGetter { port: String },

    #[error("Invalid value for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node {0} has been dropped")]
    Dropped(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Unknown node type: {0}")]
    TypeNotFound(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Signature mismatch connecting {signal} to {receiver}: {reason}")]
    SignatureMismatch {
        signal: String,
        receiver: String,
        reason: String,
    },

    #[error("Cyclic port resolution at {0}")]
    CyclicResolution(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Duplicate node id '{0}'")]
    DuplicateId(String),
}
