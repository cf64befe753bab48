//! Node hierarchy.
//!
//! Nodes own their ports, signals, slots and children; a child holds a weak
//! back-reference to its parent. Library and middleware are resolved once
//! per node when it is attached (and re-resolved for a moved subtree), while
//! the per-run execution context is found by walking up the parent chain.

use crate::context::ExecutionContext;
use crate::error::{GraphError, NodeError};
use crate::events::{Event, Middleware};
use crate::library::{default_library, Library, NodeFactory};
use crate::path::{Item, ItemPath};
use crate::port::Port;
use crate::schema::Schema;
use crate::signal::{Signal, Slot};
use crate::{Blueprint, Result, Value};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub type NodeRef = Arc<Node>;

tokio::task_local! {
    /// Run roots active on the current task, innermost last.
    static RUNNING: Vec<(Weak<Node>, Arc<ExecutionContext>)>;
}

/// Per-type behaviour behind a node: lifecycle hooks, slot handlers and
/// getters for computed ports.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Runs before the blueprint emits `on_setup`.
    async fn setup(&self, _node: &NodeRef) -> Result<()> {
        Ok(())
    }

    /// Runs after the blueprint emits `on_teardown`.
    async fn teardown(&self, _node: &NodeRef) -> Result<()> {
        Ok(())
    }

    /// Handles an invocation of one of the node's slots.
    async fn call(&self, node: &NodeRef, slot: &str, _args: Vec<Value>) -> Result<()> {
        Err(NodeError::UnknownSlot {
            node: node.id().to_string(),
            slot: slot.to_string(),
        }
        .into())
    }

    /// Produces the value of a computed port.
    async fn compute(&self, node: &NodeRef, port: &str) -> Result<Value> {
        Err(NodeError::MissingGetter {
            port: format!("{}.{}", node.id(), port),
        }
        .into())
    }
}

/// Behaviour for nodes that only group or carry data.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inert;

impl Behavior for Inert {}

/// Initial content of a port
pub enum PortInit {
    Value(Value),
    Source(Arc<Port>),
}

/// Construction options for a node
#[derive(Default)]
pub struct NodeOptions {
    pub id: Option<String>,
    pub label: Option<String>,
    pub values: Vec<(String, PortInit)>,
    pub library: Option<Arc<Library>>,
    pub middleware: Option<Arc<dyn Middleware>>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((port.into(), PortInit::Value(value.into())));
        self
    }

    /// Binds `port` to pull from `source`.
    pub fn with_source(mut self, port: impl Into<String>, source: &Arc<Port>) -> Self {
        self.values.push((port.into(), PortInit::Source(source.clone())));
        self
    }

    pub fn with_library(mut self, library: Arc<Library>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware = Some(middleware);
        self
    }
}

#[derive(Clone, Default)]
struct Environment {
    library: Option<Arc<Library>>,
    middleware: Option<Arc<dyn Middleware>>,
}

pub struct Node {
    id: String,
    label: RwLock<Option<String>>,
    schema: Arc<Schema>,
    behavior: Box<dyn Behavior>,
    ports: BTreeMap<String, Arc<Port>>,
    signals: BTreeMap<String, Arc<Signal>>,
    slots: BTreeMap<String, Arc<Slot>>,
    parent: RwLock<Weak<Node>>,
    children: RwLock<Vec<NodeRef>>,
    own_env: RwLock<Environment>,
    env: RwLock<Environment>,
    context: RwLock<Option<Arc<ExecutionContext>>>,
    alive: AtomicBool,
    this: Weak<Node>,
}

impl Node {
    /// Materializes a detached node from its schema.
    pub fn build(
        schema: Arc<Schema>,
        behavior: Box<dyn Behavior>,
        options: NodeOptions,
    ) -> Result<NodeRef> {
        let id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut literals = HashMap::new();
        let mut sources = Vec::new();
        for (name, init) in options.values {
            let spec = schema.port(&name).ok_or_else(|| NodeError::UnknownPort {
                node: id.clone(),
                port: name.clone(),
            })?;
            match init {
                PortInit::Value(value) => {
                    if !spec.value_type.matches(&value) {
                        return Err(NodeError::InvalidInputType {
                            field: format!("{}.{}", id, name),
                            expected: spec.value_type.to_string(),
                            actual: value.kind().to_string(),
                        }
                        .into());
                    }
                    literals.insert(name, value);
                }
                PortInit::Source(port) => sources.push((name, port)),
            }
        }

        let env = Environment {
            library: options.library,
            middleware: options.middleware,
        };
        let node = Arc::new_cyclic(|this: &Weak<Node>| {
            let ports = schema
                .ports()
                .values()
                .map(|spec| {
                    let literal = literals.remove(&spec.name);
                    (spec.name.clone(), Port::materialize(spec, this.clone(), &id, literal))
                })
                .collect();
            let signals = schema
                .signals()
                .values()
                .map(|spec| {
                    let signal = Signal::owned(&spec.name, spec.params.clone(), &id);
                    (spec.name.clone(), Arc::new(signal))
                })
                .collect();
            let slots = schema
                .slots()
                .values()
                .map(|spec| {
                    let slot = Slot::new(&spec.name, spec.params.clone(), this.clone(), &id);
                    (spec.name.clone(), Arc::new(slot))
                })
                .collect();

            Node {
                id: id.clone(),
                label: RwLock::new(options.label.filter(|l| !l.is_empty())),
                schema: schema.clone(),
                behavior,
                ports,
                signals,
                slots,
                parent: RwLock::new(Weak::new()),
                children: RwLock::new(Vec::new()),
                own_env: RwLock::new(env.clone()),
                env: RwLock::new(env),
                context: RwLock::new(None),
                alive: AtomicBool::new(true),
                this: this.clone(),
            }
        });

        for (name, source) in sources {
            source.connect(node.port(&name)?)?;
        }
        tracing::debug!(node = %node.id, node_type = %node.type_name(), "built node");
        Ok(node)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Explicit label, or the id formatted for display.
    pub fn label(&self) -> String {
        self.label
            .read()
            .clone()
            .unwrap_or_else(|| format_label(&self.id))
    }

    pub fn explicit_label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: Option<String>) {
        *self.label.write() = label.filter(|l| !l.is_empty());
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn type_name(&self) -> String {
        self.schema.type_name()
    }

    pub fn behavior(&self) -> &dyn Behavior {
        self.behavior.as_ref()
    }

    /// Strong handle to this node.
    pub fn to_ref(&self) -> Result<NodeRef> {
        self.this
            .upgrade()
            .ok_or_else(|| NodeError::Dropped(self.id.clone()).into())
    }

    /// False once the node has been deleted from its graph.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    // Hierarchy

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.read().upgrade()
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.children.read().clone()
    }

    /// Children keyed by id.
    pub fn nodes(&self) -> BTreeMap<String, NodeRef> {
        self.children
            .read()
            .iter()
            .map(|child| (child.id.clone(), child.clone()))
            .collect()
    }

    /// Moves this node under `parent`, or detaches it with `None`.
    pub fn set_parent(&self, parent: Option<&NodeRef>) -> Result<()> {
        let this = self.to_ref()?;
        {
            let mut current_slot = self.parent.write();
            let current = current_slot.upgrade();
            match (&current, parent) {
                (Some(current), Some(parent)) if Arc::ptr_eq(current, parent) => return Ok(()),
                (None, None) => return Ok(()),
                _ => {}
            }

            if let Some(parent) = parent {
                if parent.is_self_or_descendant_of(&this) {
                    return Err(GraphError::InvalidHierarchy(format!(
                        "{} cannot be attached under itself or its descendant {}",
                        self.id, parent.id
                    ))
                    .into());
                }
                if parent.find_child(&self.id, false).is_some() {
                    return Err(GraphError::DuplicateId(self.id.clone()).into());
                }
            }

            if let Some(current) = &current {
                current.children.write().retain(|child| !Arc::ptr_eq(child, &this));
            }
            *current_slot = parent.map(Arc::downgrade).unwrap_or_default();
            if let Some(parent) = parent {
                parent.children.write().push(this.clone());
            }
        }
        self.refresh_environment();
        tracing::trace!(node = %self.id, parent = ?parent.map(|p| p.id.clone()), "reparented node");
        Ok(())
    }

    /// Walks up from `self`; stops before touching `ancestor`'s own parent link.
    fn is_self_or_descendant_of(&self, ancestor: &NodeRef) -> bool {
        let mut current = self.to_ref().ok();
        while let Some(node) = current {
            if Arc::ptr_eq(&node, ancestor) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Detaches this node and marks its subtree dead so signals prune its slots.
    pub fn delete(&self) -> Result<()> {
        self.set_parent(None)?;
        self.alive.store(false, Ordering::SeqCst);
        for node in self.walk_nodes() {
            node.alive.store(false, Ordering::SeqCst);
        }
        tracing::debug!(node = %self.id, "deleted node");
        Ok(())
    }

    /// Creates a child from a type registered in the nearest library.
    pub fn create(&self, node_type: &str, options: NodeOptions) -> Result<NodeRef> {
        let library = self.library();
        let factory = library
            .get(node_type)
            .ok_or_else(|| GraphError::TypeNotFound(node_type.to_string()))?;
        self.create_from(factory.as_ref(), options)
    }

    /// Creates a child from an explicit factory.
    pub fn create_from(&self, factory: &dyn NodeFactory, options: NodeOptions) -> Result<NodeRef> {
        let node = Node::build(factory.schema(), factory.create(), options)?;
        node.set_parent(Some(&self.to_ref()?))?;
        Ok(node)
    }

    pub fn find_child(&self, id: &str, recursive: bool) -> Option<NodeRef> {
        for child in self.children() {
            if child.id == id {
                return Some(child);
            }
            if recursive {
                if let Some(found) = child.find_child(id, true) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Nearest ancestor of the given registered type.
    pub fn find_ancestor(&self, node_type: &str) -> Option<NodeRef> {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.type_name() == node_type {
                return Some(node);
            }
            current = node.parent();
        }
        None
    }

    /// Nearest ancestor that is a run root.
    pub fn blueprint(&self) -> Option<Blueprint> {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.schema.is_blueprint() {
                return Blueprint::from_node(node);
            }
            current = node.parent();
        }
        None
    }

    pub fn root(&self) -> Result<NodeRef> {
        let mut current = self.to_ref()?;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        Ok(current)
    }

    /// Depth-first, pre-order traversal of all descendants.
    pub fn walk_nodes(&self) -> Walk {
        Walk {
            stack: self.children().into_iter().rev().collect(),
        }
    }

    /// Dotted path of ids from `ancestor` (exclusive) down to this node.
    pub fn path_from(&self, ancestor: &Node) -> Option<String> {
        let mut ids = Vec::new();
        let mut current = self.to_ref().ok();
        while let Some(node) = current {
            if std::ptr::eq(node.as_ref(), ancestor) {
                ids.reverse();
                return Some(ids.join("."));
            }
            ids.push(node.id.clone());
            current = node.parent();
        }
        None
    }

    // Environment

    pub fn library(&self) -> Arc<Library> {
        self.env.read().library.clone().unwrap_or_else(default_library)
    }

    pub fn set_library(&self, library: Option<Arc<Library>>) {
        self.own_env.write().library = library;
        self.refresh_environment();
    }

    pub fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        self.env.read().middleware.clone()
    }

    pub fn set_middleware(&self, middleware: Option<Arc<dyn Middleware>>) {
        self.own_env.write().middleware = middleware;
        self.refresh_environment();
    }

    fn refresh_environment(&self) {
        let inherited = self
            .parent()
            .map(|parent| parent.env.read().clone())
            .unwrap_or_default();
        let own = self.own_env.read().clone();
        *self.env.write() = Environment {
            library: own.library.or(inherited.library),
            middleware: own.middleware.or(inherited.middleware),
        };
        for child in self.children() {
            child.refresh_environment();
        }
    }

    pub fn dispatch(&self, event: Event) {
        if let Some(middleware) = self.middleware() {
            middleware.dispatch(event);
        }
    }

    // Execution context

    /// Context of the run this node takes part in, found on the nearest ancestor.
    ///
    /// Runs started on the current task take precedence over the context
    /// attached to the node, so concurrent invocations of the same blueprint
    /// each see their own arguments and state.
    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        let mut current = self.to_ref().ok();
        while let Some(node) = current {
            if let Some(context) = node.scoped_context() {
                return Some(context);
            }
            if let Some(context) = node.context.read().clone() {
                return Some(context);
            }
            current = node.parent();
        }
        None
    }

    fn scoped_context(&self) -> Option<Arc<ExecutionContext>> {
        RUNNING
            .try_with(|running| {
                running
                    .iter()
                    .rev()
                    .find(|(owner, _)| owner.ptr_eq(&self.this))
                    .map(|(_, context)| context.clone())
            })
            .ok()
            .flatten()
    }

    /// Polls `fut` with `context` bound to this node for the current task.
    pub(crate) async fn scope_context<F: Future>(
        &self,
        context: Arc<ExecutionContext>,
        fut: F,
    ) -> F::Output {
        let mut running = RUNNING.try_with(Vec::clone).unwrap_or_default();
        running.push((self.this.clone(), context));
        RUNNING.scope(running, fut).await
    }

    pub(crate) fn attach_context(&self, context: Arc<ExecutionContext>) {
        *self.context.write() = Some(context);
    }

    /// Detaches `context` unless a later run has replaced it.
    pub(crate) fn detach_context(&self, context: &Arc<ExecutionContext>) {
        let mut attached = self.context.write();
        if attached.as_ref().is_some_and(|current| Arc::ptr_eq(current, context)) {
            *attached = None;
        }
    }

    // Ports, signals, slots

    pub fn ports(&self) -> &BTreeMap<String, Arc<Port>> {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Result<&Arc<Port>> {
        self.ports.get(name).ok_or_else(|| {
            NodeError::UnknownPort {
                node: self.id.clone(),
                port: name.to_string(),
            }
            .into()
        })
    }

    pub fn signals(&self) -> &BTreeMap<String, Arc<Signal>> {
        &self.signals
    }

    pub fn signal(&self, name: &str) -> Result<&Arc<Signal>> {
        self.signals.get(name).ok_or_else(|| {
            NodeError::UnknownSignal {
                node: self.id.clone(),
                signal: name.to_string(),
            }
            .into()
        })
    }

    pub fn slots(&self) -> &BTreeMap<String, Arc<Slot>> {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Result<&Arc<Slot>> {
        self.slots.get(name).ok_or_else(|| {
            NodeError::UnknownSlot {
                node: self.id.clone(),
                slot: name.to_string(),
            }
            .into()
        })
    }

    pub async fn get(&self, port: &str) -> Result<Value> {
        self.port(port)?.get().await
    }

    /// Resolves several ports concurrently; values come back in request order.
    pub async fn gather(&self, ports: &[&str]) -> Result<Vec<Value>> {
        let ports = ports
            .iter()
            .map(|name| self.port(name))
            .collect::<Result<Vec<_>>>()?;
        try_join_all(ports.into_iter().map(|port| port.get())).await
    }

    pub fn set(&self, port: &str, value: impl Into<Value>) -> Result<()> {
        self.port(port)?.set(value)
    }

    pub async fn emit(&self, signal: &str, args: Vec<Value>) -> Result<()> {
        self.signal(signal)?.emit(args).await
    }

    // Paths

    /// Resolves a dotted path relative to this node.
    pub fn lookup(&self, path: &str) -> Result<Item> {
        let parsed = ItemPath::parse(path)?;
        let not_found = || GraphError::PathNotFound(path.to_string());

        let mut current = self.to_ref()?;
        for segment in parsed.nodes() {
            current = current.find_child(segment, false).ok_or_else(not_found)?;
        }
        let Some(name) = parsed.item() else {
            return Ok(Item::Node(current));
        };
        if let Some(port) = current.ports.get(name) {
            return Ok(Item::Port(port.clone()));
        }
        if let Some(signal) = current.signals.get(name) {
            return Ok(Item::Signal(signal.clone()));
        }
        if let Some(slot) = current.slots.get(name) {
            return Ok(Item::Slot(slot.clone()));
        }
        current
            .find_child(name, false)
            .map(Item::Node)
            .ok_or_else(|| not_found().into())
    }

    /// Wires port → port or signal → slot by path.
    pub fn connect(&self, source: &str, target: &str) -> Result<()> {
        match (self.lookup(source)?, self.lookup(target)?) {
            (Item::Port(from), Item::Port(to)) => from.connect(&to),
            (Item::Signal(signal), Item::Slot(slot)) => signal.connect(slot),
            (from, to) => Err(GraphError::InvalidConnection(format!(
                "cannot connect {} ({}) to {} ({})",
                source,
                from.kind(),
                target,
                to.kind()
            ))
            .into()),
        }
    }

    /// Removes one connection, or every connection of `source` when `target` is `None`.
    pub fn disconnect(&self, source: &str, target: Option<&str>) -> Result<()> {
        let from = self.lookup(source)?;
        let to = target.map(|path| self.lookup(path)).transpose()?;
        match (from, to) {
            (Item::Port(from), None) => from.disconnect(None),
            (Item::Port(from), Some(Item::Port(to))) => from.disconnect(Some(&to)),
            (Item::Signal(signal), None) => signal.disconnect_all(),
            (Item::Signal(signal), Some(Item::Slot(slot))) => signal.disconnect(slot),
            (from, to) => {
                return Err(GraphError::InvalidConnection(format!(
                    "cannot disconnect {} ({}) from {}",
                    source,
                    from.kind(),
                    to.map_or("everything", |item| item.kind())
                ))
                .into())
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type", &self.type_name())
            .field("children", &self.children.read().len())
            .finish()
    }
}

/// Lazy depth-first iterator over a node's descendants
pub struct Walk {
    stack: Vec<NodeRef>,
}

impl Iterator for Walk {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().into_iter().rev());
        Some(node)
    }
}

/// Title-cases an id and turns `_`/`-` into spaces.
fn format_label(id: &str) -> String {
    let mut label = String::with_capacity(id.len());
    let mut previous_cased = false;
    for ch in id.chars() {
        if ch.is_alphabetic() {
            if previous_cased {
                label.extend(ch.to_lowercase());
            } else {
                label.extend(ch.to_uppercase());
            }
            previous_cased = true;
        } else {
            label.push(match ch {
                '_' | '-' => ' ',
                other => other,
            });
            previous_cased = false;
        }
    }
    label
}
