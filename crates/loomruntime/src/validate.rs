use loomcore::{Blueprint, GraphError, Handler, NodeRef, Port, PortDirection, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;

/// Checks a blueprint's wiring before it runs.
///
/// Pull bindings plus the implicit input → computed-output dependency inside
/// each node must form a DAG, and every slot a signal targets must belong to
/// a live node of the same blueprint.
pub fn validate_blueprint(blueprint: &Blueprint) -> Result<()> {
    let nodes: Vec<NodeRef> = std::iter::once(blueprint.node().clone())
        .chain(blueprint.walk_nodes())
        .collect();

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut indices: HashMap<usize, NodeIndex> = HashMap::new();
    let mut index_of = |graph: &mut DiGraph<String, ()>, port: &Arc<Port>| {
        *indices
            .entry(Arc::as_ptr(port) as usize)
            .or_insert_with(|| graph.add_node(port.qualified_name()))
    };

    for node in &nodes {
        let computed: Vec<&Arc<Port>> = node.ports().values().filter(|p| p.is_computed()).collect();
        for port in node.ports().values() {
            let target = index_of(&mut graph, port);
            if let Some(source) = port.source() {
                let source = index_of(&mut graph, &source);
                graph.add_edge(source, target, ());
            }
            if port.direction() == PortDirection::Input {
                for output in &computed {
                    let output = index_of(&mut graph, output);
                    graph.add_edge(target, output, ());
                }
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        let port = graph[cycle.node_id()].clone();
        tracing::warn!(blueprint = %blueprint.id(), port = %port, "cyclic port bindings");
        return Err(GraphError::CyclicResolution(port).into());
    }

    let root = blueprint.node();
    for node in &nodes {
        for signal in node.signals().values() {
            for handler in signal.receivers() {
                let Handler::Slot(slot) = handler else {
                    continue;
                };
                let inside = slot
                    .receiver()
                    .is_some_and(|receiver| receiver.is_alive() && receiver.path_from(root).is_some());
                if !inside {
                    return Err(GraphError::InvalidConnection(format!(
                        "{} targets {} outside the blueprint",
                        signal.qualified_name(),
                        slot.qualified_name()
                    ))
                    .into());
                }
            }
        }
    }

    tracing::debug!(blueprint = %blueprint.id(), ports = graph.node_count(), "blueprint validated");
    Ok(())
}
