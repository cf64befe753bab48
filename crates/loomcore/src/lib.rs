//! Core abstractions for the loom engine
//!
//! Nodes form an ownership tree. Data moves between them through typed ports
//! resolved on demand, control moves through signals connected to slots, and
//! a blueprint drives the setup, run and teardown of one execution.

mod blueprint;
mod context;
mod error;
pub mod events;
mod library;
mod node;
mod path;
mod port;
mod schema;
mod signal;
mod value;

pub use blueprint::{blueprint_schema, Blueprint, ON_RUN, ON_SETUP, ON_TEARDOWN};
pub use context::{ExecutionContext, Phase};
pub use error::{FlowError, GraphError, NodeError};
pub use events::*;
pub use library::{default_library, set_default_library, Library, NodeFactory, NodeType};
pub use node::{Behavior, Inert, Node, NodeOptions, NodeRef, PortInit, Walk};
pub use path::{Item, ItemPath, SELF_SEGMENT};
pub use port::Port;
pub use schema::{CallableSpec, PortDirection, PortSpec, Schema, SchemaBuilder};
pub use signal::{Callback, Handler, Signal, Slot};
pub use value::{Value, ValueType};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
