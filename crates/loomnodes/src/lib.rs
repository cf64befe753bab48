//! Standard node library
//!
//! Collection of built-in node types: flow control, math and logging

pub mod flow;
pub mod log;
pub mod math;

use loomcore::{set_default_library, Library};
use std::sync::Arc;

/// Register all standard nodes with a library
pub fn register_all(library: &Library) {
    for node_type in flow::node_types()
        .into_iter()
        .chain(math::node_types())
        .chain(log::node_types())
    {
        library.register(Arc::new(node_type));
    }
}

/// A fresh library holding every standard node type
pub fn standard_library() -> Arc<Library> {
    let library = Library::new();
    register_all(&library);
    Arc::new(library)
}

/// Makes the standard library the process-wide default and returns it
pub fn install_default_library() -> Arc<Library> {
    let library = standard_library();
    set_default_library(library.clone());
    library
}
