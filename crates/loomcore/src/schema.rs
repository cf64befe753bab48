//! Per-type node descriptors.
//!
//! A [`Schema`] is built once per node type with [`SchemaBuilder`] and shared
//! by every instance of that type. Nodes materialize their ports, signals and
//! slots from it at construction time.

use crate::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

/// Declared port of a node type
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub value_type: ValueType,
    pub direction: PortDirection,
    pub default: Value,
    /// Value is produced by the node type's getter instead of a binding.
    pub computed: bool,
}

/// Declared signal or slot with its parameter signature
#[derive(Debug, Clone)]
pub struct CallableSpec {
    pub name: String,
    pub params: Vec<ValueType>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    group: String,
    name: String,
    description: String,
    blueprint: bool,
    ports: BTreeMap<String, PortSpec>,
    signals: BTreeMap<String, CallableSpec>,
    slots: BTreeMap<String, CallableSpec>,
}

impl Schema {
    pub fn builder(group: impl Into<String>, name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema {
                group: group.into(),
                name: name.into(),
                description: String::new(),
                blueprint: false,
                ports: BTreeMap::new(),
                signals: BTreeMap::new(),
                slots: BTreeMap::new(),
            },
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry key, `group.name`.
    pub fn type_name(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_blueprint(&self) -> bool {
        self.blueprint
    }

    pub fn ports(&self) -> &BTreeMap<String, PortSpec> {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&PortSpec> {
        self.ports.get(name)
    }

    pub fn signals(&self) -> &BTreeMap<String, CallableSpec> {
        &self.signals
    }

    pub fn slots(&self) -> &BTreeMap<String, CallableSpec> {
        &self.slots
    }
}

pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.schema.description = description.into();
        self
    }

    /// Marks the type as a run root.
    pub fn blueprint(mut self) -> Self {
        self.schema.blueprint = true;
        self
    }

    pub fn input(self, name: &str, value_type: ValueType) -> Self {
        self.port(name, value_type, PortDirection::Input, Value::Null, false)
    }

    pub fn input_with_default(
        self,
        name: &str,
        value_type: ValueType,
        default: impl Into<Value>,
    ) -> Self {
        self.port(name, value_type, PortDirection::Input, default.into(), false)
    }

    /// Output port written by the node's slots.
    pub fn output(self, name: &str, value_type: ValueType) -> Self {
        self.port(name, value_type, PortDirection::Output, Value::Null, false)
    }

    /// Output port whose value comes from the node type's getter.
    pub fn computed(self, name: &str, value_type: ValueType) -> Self {
        self.port(name, value_type, PortDirection::Output, Value::Null, true)
    }

    fn port(
        mut self,
        name: &str,
        value_type: ValueType,
        direction: PortDirection,
        default: Value,
        computed: bool,
    ) -> Self {
        self.schema.ports.insert(
            name.to_string(),
            PortSpec {
                name: name.to_string(),
                value_type,
                direction,
                default,
                computed,
            },
        );
        self
    }

    pub fn signal(self, name: &str) -> Self {
        self.signal_with(name, Vec::new())
    }

    pub fn signal_with(mut self, name: &str, params: Vec<ValueType>) -> Self {
        self.schema.signals.insert(
            name.to_string(),
            CallableSpec {
                name: name.to_string(),
                params,
            },
        );
        self
    }

    pub fn slot(self, name: &str) -> Self {
        self.slot_with(name, Vec::new())
    }

    pub fn slot_with(mut self, name: &str, params: Vec<ValueType>) -> Self {
        self.schema.slots.insert(
            name.to_string(),
            CallableSpec {
                name: name.to_string(),
                params,
            },
        );
        self
    }

    pub fn build(self) -> Arc<Schema> {
        Arc::new(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_declarations() {
        let schema = Schema::builder("test", "Move")
            .input("x", ValueType::Integer)
            .input_with_default("y", ValueType::Integer, 4)
            .computed("distance", ValueType::Number)
            .signal("moved")
            .slot_with("move_by", vec![ValueType::Integer])
            .build();

        assert_eq!(schema.type_name(), "test.Move");
        assert_eq!(schema.ports().len(), 3);
        assert_eq!(schema.port("y").map(|p| p.default.clone()), Some(Value::from(4)));
        assert!(schema.port("distance").map(|p| p.computed).unwrap_or(false));
        assert!(schema.signals().contains_key("moved"));
        assert_eq!(schema.slots()["move_by"].params, vec![ValueType::Integer]);
        assert!(!schema.is_blueprint());
    }
}
