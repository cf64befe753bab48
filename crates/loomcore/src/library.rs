use crate::node::{Behavior, Node, NodeOptions, NodeRef};
use crate::schema::Schema;
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Schema shared by every instance of the type.
    fn schema(&self) -> Arc<Schema>;

    /// Fresh behaviour for one node instance.
    fn create(&self) -> Box<dyn Behavior>;

    /// Registry key, `group.name`.
    fn node_type(&self) -> String {
        self.schema().type_name()
    }

    fn description(&self) -> String {
        self.schema().description().to_string()
    }
}

type MakeBehavior = dyn Fn() -> Box<dyn Behavior> + Send + Sync;

/// Factory pairing a schema, built once at registration, with a behaviour constructor.
pub struct NodeType {
    schema: Arc<Schema>,
    make: Box<MakeBehavior>,
}

impl NodeType {
    pub fn new<F>(schema: Arc<Schema>, make: F) -> Self
    where
        F: Fn() -> Box<dyn Behavior> + Send + Sync + 'static,
    {
        Self {
            schema,
            make: Box::new(make),
        }
    }
}

impl NodeFactory for NodeType {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn create(&self) -> Box<dyn Behavior> {
        (self.make)()
    }
}

/// Registry of available node types
pub struct Library {
    version: String,
    factories: RwLock<BTreeMap<String, Arc<dyn NodeFactory>>>,
}

impl Library {
    pub fn new() -> Self {
        Self::with_version("0")
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            factories: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Register a node factory, replacing any factory with the same type name
    pub fn register(&self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type();
        tracing::debug!(node_type = %node_type, "registering node type");
        self.factories.write().insert(node_type, factory);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeFactory>> {
        self.factories.read().get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.read().contains_key(node_type)
    }

    /// Create a detached node instance of a registered type
    pub fn create_node(&self, node_type: &str, options: NodeOptions) -> Result<NodeRef> {
        let factory = self
            .get(node_type)
            .ok_or_else(|| crate::GraphError::TypeNotFound(node_type.to_string()))?;
        Node::build(factory.schema(), factory.create(), options)
    }

    /// Registered type names, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<Arc<Schema>> {
        self.factories.read().values().map(|f| f.schema()).collect()
    }

    pub fn groups(&self) -> BTreeSet<String> {
        self.factories
            .read()
            .values()
            .map(|f| f.schema().group().to_string())
            .collect()
    }

    /// New library holding only the types of the given groups.
    pub fn filtered(&self, groups: &[String]) -> Library {
        let library = Library::with_version(self.version.clone());
        for factory in self.factories.read().values() {
            if groups.iter().any(|g| g == factory.schema().group()) {
                library.register(factory.clone());
            }
        }
        library
    }

    /// Registers every type of `other` into this library.
    pub fn extend(&self, other: &Library) {
        for factory in other.factories.read().values() {
            self.register(factory.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("version", &self.version)
            .field("types", &self.list_node_types())
            .finish()
    }
}

fn default_slot() -> &'static RwLock<Arc<Library>> {
    static DEFAULT: OnceLock<RwLock<Arc<Library>>> = OnceLock::new();
    DEFAULT.get_or_init(|| RwLock::new(Arc::new(Library::new())))
}

/// Process-wide library used by nodes without one of their own.
pub fn default_library() -> Arc<Library> {
    default_slot().read().clone()
}

pub fn set_default_library(library: Arc<Library>) {
    *default_slot().write() = library;
}
