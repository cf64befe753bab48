//! Blueprint runtime
//!
//! This crate loads and saves blueprints, validates their wiring before a
//! run, and ties a node library, storage and an event bus together behind
//! [`LoomRuntime`].

mod config;
mod io;
mod runtime;
mod storage;
mod validate;

pub use config::{LibraryConfig, RuntimeConfig, StorageConfig};
pub use io::{
    dump_blueprint, dump_data, dump_library, load_blueprint, parse_blueprint, parse_data,
    read_data, save_blueprint, write_data, BlueprintRecord, Format, LibraryRecord, NodeRecord,
    NodeSchemaRecord, PersistError, PortSchemaRecord,
};
pub use runtime::LoomRuntime;
pub use storage::{FilesystemDriver, Storage, StorageDriver};
pub use validate::validate_blueprint;
