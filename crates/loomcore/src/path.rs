use crate::error::GraphError;
use crate::node::NodeRef;
use crate::port::Port;
use crate::signal::{Signal, Slot};
use crate::Result;
use std::sync::Arc;

/// Segment naming the node a path is resolved from.
pub const SELF_SEGMENT: &str = "__self__";

/// Anything a dotted path can address
#[derive(Debug, Clone)]
pub enum Item {
    Node(NodeRef),
    Port(Arc<Port>),
    Signal(Arc<Signal>),
    Slot(Arc<Slot>),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Node(_) => "node",
            Item::Port(_) => "port",
            Item::Signal(_) => "signal",
            Item::Slot(_) => "slot",
        }
    }
}

/// A parsed dotted path: child ids to descend through, then the final name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPath {
    nodes: Vec<String>,
    item: Option<String>,
}

impl ItemPath {
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(GraphError::PathNotFound(path.to_string()).into());
        }
        let mut segments: Vec<String> = path
            .split('.')
            .filter(|segment| *segment != SELF_SEGMENT)
            .map(str::to_string)
            .collect();
        let item = segments.pop();
        Ok(Self {
            nodes: segments,
            item,
        })
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// `None` when the path names the starting node itself.
    pub fn item(&self) -> Option<&str> {
        self.item.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segments() {
        let path = ItemPath::parse("a.b.value").unwrap();
        assert_eq!(path.nodes(), ["a".to_string(), "b".to_string()]);
        assert_eq!(path.item(), Some("value"));
    }

    #[test]
    fn self_segments_are_skipped() {
        let path = ItemPath::parse("__self__.on_run").unwrap();
        assert!(path.nodes().is_empty());
        assert_eq!(path.item(), Some("on_run"));
        assert_eq!(ItemPath::parse("__self__").unwrap().item(), None);
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!(ItemPath::parse("").is_err());
        assert!(ItemPath::parse("a..b").is_err());
        assert!(ItemPath::parse("a.").is_err());
    }
}
