//! Typed data endpoints and pull-based value resolution.
//!
//! A port resolves its value lazily: a computed getter wins, then a bound
//! upstream port (resolved recursively), then a literal override, then the
//! declared default. Wiring is symmetric: `source.connect(target)` records a
//! push edge on the source and binds the target to pull from the source.

use crate::error::{GraphError, NodeError};
use crate::node::{Node, NodeRef};
use crate::schema::{PortDirection, PortSpec};
use crate::{Result, Value, ValueType};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

tokio::task_local! {
    /// Ports being resolved on the current resolution path.
    static RESOLVING: Vec<usize>;
}

#[derive(Clone)]
enum Binding {
    Unset,
    Literal(Value),
    Source(Weak<Port>),
}

pub struct Port {
    name: String,
    value_type: ValueType,
    direction: PortDirection,
    default: Value,
    computed: bool,
    owner: Weak<Node>,
    owner_id: String,
    binding: RwLock<Binding>,
    connections: RwLock<Vec<Weak<Port>>>,
    this: Weak<Port>,
}

impl Port {
    pub(crate) fn materialize(
        spec: &PortSpec,
        owner: Weak<Node>,
        owner_id: &str,
        literal: Option<Value>,
    ) -> Arc<Port> {
        Arc::new_cyclic(|this| Port {
            name: spec.name.clone(),
            value_type: spec.value_type.clone(),
            direction: spec.direction,
            default: spec.default.clone(),
            computed: spec.computed,
            owner,
            owner_id: owner_id.to_string(),
            binding: RwLock::new(literal.map_or(Binding::Unset, Binding::Literal)),
            connections: RwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    pub fn owner(&self) -> Option<NodeRef> {
        self.owner.upgrade()
    }

    /// `node_id.port_name`, used in logs and errors.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner_id, self.name)
    }

    /// The literal override, if one is set.
    pub fn literal(&self) -> Option<Value> {
        match &*self.binding.read() {
            Binding::Literal(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The upstream port this port pulls from, if bound and still alive.
    pub fn source(&self) -> Option<Arc<Port>> {
        match &*self.binding.read() {
            Binding::Source(source) => source.upgrade(),
            _ => None,
        }
    }

    /// Live downstream ports fed by this port.
    pub fn connections(&self) -> Vec<Arc<Port>> {
        let mut connections = self.connections.write();
        connections.retain(|target| target.strong_count() > 0);
        connections.iter().filter_map(Weak::upgrade).collect()
    }

    /// Resolves the current value of this port.
    pub fn get(&self) -> BoxFuture<'_, Result<Value>> {
        let key = self as *const Port as usize;
        let mut path = RESOLVING.try_with(Vec::clone).unwrap_or_default();
        if path.contains(&key) {
            let err = GraphError::CyclicResolution(self.qualified_name());
            return future::ready(Err(err.into())).boxed();
        }
        path.push(key);
        RESOLVING.scope(path, self.resolve()).boxed()
    }

    async fn resolve(&self) -> Result<Value> {
        if self.computed {
            let node = self
                .owner
                .upgrade()
                .ok_or_else(|| NodeError::Dropped(self.owner_id.clone()))?;
            return node.behavior().compute(&node, &self.name).await;
        }
        let binding = self.binding.read().clone();
        match binding {
            Binding::Source(source) => match source.upgrade() {
                Some(source) => source.get().await,
                None => {
                    tracing::warn!(port = %self.qualified_name(), "upstream port dropped, using default");
                    Ok(self.default.clone())
                }
            },
            Binding::Literal(value) => Ok(value),
            Binding::Unset => Ok(self.default.clone()),
        }
    }

    /// Writes a literal override, replacing any pull binding.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if !self.value_type.matches(&value) {
            return Err(NodeError::InvalidInputType {
                field: self.qualified_name(),
                expected: self.value_type.to_string(),
                actual: value.kind().to_string(),
            }
            .into());
        }
        let previous = std::mem::replace(&mut *self.binding.write(), Binding::Literal(value));
        self.release(previous);
        Ok(())
    }

    /// Drops any literal or binding so the port resolves to its default again.
    pub fn clear(&self) {
        let previous = std::mem::replace(&mut *self.binding.write(), Binding::Unset);
        self.release(previous);
    }

    /// Feeds `target` from this port.
    pub fn connect(&self, target: &Arc<Port>) -> Result<()> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| NodeError::Dropped(self.owner_id.clone()))?;
        if Arc::ptr_eq(&this, target) {
            return Err(GraphError::InvalidConnection(format!(
                "{} cannot feed itself",
                self.qualified_name()
            ))
            .into());
        }
        if !target.value_type.accepts(&self.value_type) {
            return Err(GraphError::InvalidConnection(format!(
                "{} ({}) cannot feed {} ({})",
                self.qualified_name(),
                self.value_type,
                target.qualified_name(),
                target.value_type
            ))
            .into());
        }

        target.bind_source(&this);
        {
            let mut connections = self.connections.write();
            connections.retain(|existing| existing.strong_count() > 0);
            if !connections.iter().any(|existing| existing.as_ptr() == Arc::as_ptr(target)) {
                connections.push(Arc::downgrade(target));
            }
        }
        tracing::debug!(source = %self.qualified_name(), target = %target.qualified_name(), "connected ports");
        Ok(())
    }

    /// Removes the edge to `target`, or every edge when `target` is `None`.
    pub fn disconnect(&self, target: Option<&Arc<Port>>) {
        let removed: Vec<Arc<Port>> = {
            let mut connections = self.connections.write();
            let mut removed = Vec::new();
            connections.retain(|existing| match existing.upgrade() {
                None => false,
                Some(port) => {
                    if target.map_or(true, |t| Arc::ptr_eq(t, &port)) {
                        removed.push(port);
                        false
                    } else {
                        true
                    }
                }
            });
            removed
        };
        for port in removed {
            port.unbind_from(self);
            tracing::debug!(source = %self.qualified_name(), target = %port.qualified_name(), "disconnected ports");
        }
    }

    fn bind_source(&self, source: &Arc<Port>) {
        let previous = std::mem::replace(
            &mut *self.binding.write(),
            Binding::Source(Arc::downgrade(source)),
        );
        if let Binding::Source(old) = &previous {
            if old.as_ptr() == Arc::as_ptr(source) {
                return;
            }
        }
        self.release(previous);
    }

    fn unbind_from(&self, source: &Port) {
        let mut binding = self.binding.write();
        if let Binding::Source(current) = &*binding {
            if current.as_ptr() == source as *const Port {
                *binding = Binding::Unset;
            }
        }
    }

    /// Keeps the previous source's edge set consistent after a rebind.
    fn release(&self, previous: Binding) {
        if let Binding::Source(old) = previous {
            if let Some(old) = old.upgrade() {
                old.forget_target(self);
            }
        }
    }

    fn forget_target(&self, target: &Port) {
        self.connections
            .write()
            .retain(|existing| existing.strong_count() > 0 && existing.as_ptr() != target as *const Port);
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.qualified_name())
            .field("value_type", &self.value_type)
            .field("direction", &self.direction)
            .finish()
    }
}
