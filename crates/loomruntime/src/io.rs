//! Blueprint persistence.
//!
//! Blueprints are stored as a tree of [`NodeRecord`]s keyed by node id. Each
//! record lists the node's type, the input literals that differ from their
//! declared defaults, and the outgoing connections of its output ports and
//! signals as target paths relative to the blueprint. YAML is the default
//! format, JSON is also accepted.

use loomcore::{
    blueprint_schema, Blueprint, FlowError, Handler, Library, Node, NodeOptions, PortDirection,
    Schema, Value,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

type Result<T> = std::result::Result<T, PersistError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    /// Accepts `.yaml`, `.yml` and `.json`, with or without the dot.
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.trim_start_matches('.') {
            "yaml" | "yml" => Ok(Format::Yaml),
            "json" => Ok(Format::Json),
            other => Err(PersistError::UnknownFormat(other.to_string())),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| PersistError::UnknownFormat(path.display().to_string()))?;
        Self::from_extension(ext)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Format::Yaml => ".yaml",
            Format::Json => ".json",
        }
    }
}

impl FromStr for Format {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension()[1..])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeRecord>,
    /// Blueprint signal name to slot paths.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connect: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeRecord>,
    /// Input literals that differ from the declared default.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, Value>,
    /// Output port or signal name to target paths.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connect: BTreeMap<String, Vec<String>>,
}

impl NodeRecord {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            label: None,
            node_type: node_type.into(),
            nodes: BTreeMap::new(),
            set: BTreeMap::new(),
            connect: BTreeMap::new(),
        }
    }
}

/// Captures the structure, literals and wiring of a blueprint.
pub fn dump_blueprint(blueprint: &Blueprint) -> BlueprintRecord {
    let root: &Node = blueprint;
    let version = root.library().version().to_string();
    BlueprintRecord {
        label: root.explicit_label(),
        version: (version != "0").then_some(version),
        nodes: child_records(root, root),
        connect: connections(root, root),
    }
}

fn child_records(node: &Node, root: &Node) -> BTreeMap<String, NodeRecord> {
    node.children()
        .iter()
        .map(|child| (child.id().to_string(), node_record(child, root)))
        .collect()
}

fn node_record(node: &Node, root: &Node) -> NodeRecord {
    let set = node
        .ports()
        .values()
        .filter(|port| port.direction() == PortDirection::Input)
        .filter_map(|port| {
            port.literal()
                .filter(|value| value != port.default_value())
                .map(|value| (port.name().to_string(), value))
        })
        .collect();
    NodeRecord {
        label: node.explicit_label(),
        node_type: node.type_name(),
        nodes: child_records(node, root),
        set,
        connect: connections(node, root),
    }
}

fn connections(node: &Node, root: &Node) -> BTreeMap<String, Vec<String>> {
    let mut connect = BTreeMap::new();
    for (name, port) in node.ports() {
        let mut targets: Vec<String> = port
            .connections()
            .iter()
            .filter_map(|target| item_path(root, &*target.owner()?, target.name()))
            .collect();
        if !targets.is_empty() {
            targets.sort();
            connect.insert(name.clone(), targets);
        }
    }
    for (name, signal) in node.signals() {
        let mut targets: Vec<String> = signal
            .receivers()
            .iter()
            .filter_map(Handler::as_slot)
            .filter_map(|slot| item_path(root, &*slot.receiver()?, slot.name()))
            .collect();
        if !targets.is_empty() {
            targets.sort();
            connect.insert(name.clone(), targets);
        }
    }
    connect
}

fn item_path(root: &Node, owner: &Node, item: &str) -> Option<String> {
    let node_path = owner.path_from(root)?;
    Some(if node_path.is_empty() {
        item.to_string()
    } else {
        format!("{}.{}", node_path, item)
    })
}

/// Rebuilds a blueprint; `options` supplies library, middleware and defaults.
pub fn parse_blueprint(record: &BlueprintRecord, options: NodeOptions) -> Result<Blueprint> {
    let mut options = options;
    if options.label.is_none() {
        options.label = record.label.clone();
    }
    let blueprint = Blueprint::with_options(options)?;

    let library_version = blueprint.library().version().to_string();
    if let Some(version) = &record.version {
        if *version != library_version {
            tracing::warn!(
                blueprint_version = %version,
                library_version = %library_version,
                "blueprint was saved with a different library version"
            );
        }
    }

    let mut edges: Vec<(String, Vec<String>)> = record
        .connect
        .iter()
        .map(|(name, targets)| (name.clone(), targets.clone()))
        .collect();
    for (id, node) in &record.nodes {
        build_node(&blueprint, id, node, "", &mut edges)?;
    }
    for (source, targets) in edges {
        for target in targets {
            blueprint.connect(&source, &target)?;
        }
    }
    tracing::debug!(blueprint = %blueprint.id(), nodes = blueprint.walk_nodes().count(), "parsed blueprint");
    Ok(blueprint)
}

fn build_node(
    parent: &Node,
    id: &str,
    record: &NodeRecord,
    prefix: &str,
    edges: &mut Vec<(String, Vec<String>)>,
) -> Result<()> {
    let mut options = NodeOptions::new().with_id(id);
    if let Some(label) = &record.label {
        options = options.with_label(label.clone());
    }
    for (port, value) in &record.set {
        options = options.with_value(port.clone(), value.clone());
    }
    let node = parent.create(&record.node_type, options)?;

    let path = if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{}.{}", prefix, id)
    };
    for (child_id, child) in &record.nodes {
        build_node(&node, child_id, child, &path, edges)?;
    }
    for (name, targets) in &record.connect {
        edges.push((format!("{}.{}", path, name), targets.clone()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryRecord {
    pub version: String,
    pub nodes: Vec<NodeSchemaRecord>,
    pub blueprints: Vec<NodeSchemaRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchemaRecord {
    pub group: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSchemaRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSchemaRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub direction: PortDirection,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub default: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub computed: bool,
}

impl From<&Schema> for NodeSchemaRecord {
    fn from(schema: &Schema) -> Self {
        Self {
            group: schema.group().to_string(),
            name: schema.name().to_string(),
            description: schema.description().to_string(),
            ports: schema
                .ports()
                .values()
                .map(|port| PortSchemaRecord {
                    name: port.name.clone(),
                    value_type: port.value_type.to_string(),
                    direction: port.direction,
                    default: port.default.clone(),
                    computed: port.computed,
                })
                .collect(),
            signals: schema.signals().keys().cloned().collect(),
            slots: schema.slots().keys().cloned().collect(),
        }
    }
}

/// Describes every registered type, sorted by type name.
pub fn dump_library(library: &Library) -> LibraryRecord {
    let (blueprints, nodes): (Vec<_>, Vec<_>) = library
        .schemas()
        .into_iter()
        .partition(|schema| schema.is_blueprint());
    let mut blueprints: Vec<NodeSchemaRecord> =
        blueprints.iter().map(|schema| schema.as_ref().into()).collect();
    if !blueprints.iter().any(|bp| bp.group == "blueprint" && bp.name == "Blueprint") {
        blueprints.insert(0, blueprint_schema().as_ref().into());
    }
    LibraryRecord {
        version: library.version().to_string(),
        nodes: nodes.iter().map(|schema| schema.as_ref().into()).collect(),
        blueprints,
    }
}

pub fn parse_data<T: DeserializeOwned>(content: &str, format: Format) -> Result<T> {
    Ok(match format {
        Format::Yaml => serde_yaml::from_str(content)?,
        Format::Json => serde_json::from_str(content)?,
    })
}

pub fn dump_data<T: Serialize>(data: &T, format: Format) -> Result<String> {
    Ok(match format {
        Format::Yaml => serde_yaml::to_string(data)?,
        Format::Json => serde_json::to_string_pretty(data)?,
    })
}

/// Reads a file in the format implied by its extension.
pub fn read_data<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    parse_data(&content, format)
}

pub fn write_data<T: Serialize>(path: impl AsRef<Path>, data: &T) -> Result<()> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    std::fs::write(path, dump_data(data, format)?)?;
    Ok(())
}

pub fn load_blueprint(path: impl AsRef<Path>, options: NodeOptions) -> Result<Blueprint> {
    let record: BlueprintRecord = read_data(path)?;
    parse_blueprint(&record, options)
}

pub fn save_blueprint(path: impl AsRef<Path>, blueprint: &Blueprint) -> Result<()> {
    write_data(path, &dump_blueprint(blueprint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_extensions() {
        assert_eq!(Format::from_path("a/b.yaml").unwrap(), Format::Yaml);
        assert_eq!(Format::from_path("b.yml").unwrap(), Format::Yaml);
        assert_eq!(Format::from_path("b.json").unwrap(), Format::Json);
        assert!(matches!(
            Format::from_path("b.toml"),
            Err(PersistError::UnknownFormat(_))
        ));
        assert!(Format::from_path("b").is_err());
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!(Format::default().to_string(), "yaml");
    }

    #[test]
    fn records_parse_from_yaml() {
        let content = r#"
label: Demo
nodes:
  a:
    type: flow.Input
    set:
      default: 3
    connect:
      value: [sq.base]
  sq:
    type: math.Pow
connect:
  on_run: [c.return_]
"#;
        let record: BlueprintRecord = parse_data(content, Format::Yaml).unwrap();
        assert_eq!(record.label.as_deref(), Some("Demo"));
        assert_eq!(record.nodes["a"].node_type, "flow.Input");
        assert_eq!(record.nodes["a"].set["default"], Value::from(3));
        assert_eq!(record.nodes["a"].connect["value"], vec!["sq.base"]);
        assert!(record.nodes["sq"].set.is_empty());
        assert_eq!(record.connect["on_run"], vec!["c.return_"]);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let record = BlueprintRecord {
            nodes: [("x".to_string(), NodeRecord::new("math.Add"))].into(),
            ..BlueprintRecord::default()
        };
        let json = dump_data(&record, Format::Json).unwrap();
        let round: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(round, serde_json::json!({"nodes": {"x": {"type": "math.Add"}}}));
    }

    #[test]
    fn unknown_format_is_reported() {
        assert!(matches!(
            read_data::<BlueprintRecord>("blueprint.txt"),
            Err(PersistError::UnknownFormat(_))
        ));
    }
}
