//! A whole-program view of the registry as a petgraph graph.

use std::{fmt, path::Path};

use dg_ir::{FunctionId, Module};
use internment::Intern;
use petgraph::{
    dot,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

use crate::{
    graph::{NodeId, NodeKey},
    registry::GraphRegistry,
};

/// A node in the exported graph.
#[derive(Clone, Debug)]
pub struct DepNode {
    pub id: NodeId,
    pub key: NodeKey,
    /// Function of the owning graph. `None` for globals.
    pub function: Option<FunctionId>,
    /// Pretty representation of what the node stands for.
    pub label: Intern<String>,
}

impl fmt::Display for DepNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label.as_str())
    }
}

/// A kind of edge in the dependence graph.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, strum::EnumIs)]
pub enum DepEdgeKind {
    /// The source decides whether the target executes.
    Control,
    /// The target reads what the source produces.
    Data,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DepEdge {
    pub kind: DepEdgeKind,
}

impl fmt::Display for DepEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

/// The dependence graph of every live node of a registry.
#[derive(Clone, Debug)]
pub struct DepGraph {
    pub graph: DiGraph<DepNode, DepEdge>,
}

impl DepGraph {
    /// Writes the graph to `path` in dot format.
    pub fn generate_graphviz(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let graph_dot = format!(
            "{}",
            dot::Dot::with_attr_getters(
                &self.graph,
                &[],
                &|_, e| match e.weight().kind {
                    DepEdgeKind::Control => "style=dashed".to_string(),
                    DepEdgeKind::Data => String::new(),
                },
                &|_, (_, _)| "fontname=\"Courier New\",shape=box".to_string(),
            )
        );
        std::fs::write(path, graph_dot)?;
        Ok(())
    }

    pub fn find(&self, id: NodeId) -> Option<NodeIndex> {
        self.graph.node_indices().find(|&ix| self.graph[ix].id == id)
    }
}

fn node_label(module: &Module, key: NodeKey) -> String {
    match key {
        NodeKey::Value(v) => {
            let value = module.value(v);
            match (module.instruction(v), module.value_name(v)) {
                (Some(inst), _) => format!("{v} = {}", inst.kind.as_ref()),
                (None, Some(name)) if value.kind.is_function() => format!("entry {name}"),
                (None, Some(name)) => format!("{v} {name}"),
                (None, None) => v.to_string(),
            }
        }
        NodeKey::Exit { function, kind } => {
            format!("exit({}) {}", kind.as_ref(), module.function(function).name)
        }
        NodeKey::VarArg(function) => format!("vararg {}", module.function(function).name),
    }
}

impl GraphRegistry {
    /// Exports all live nodes and their control and data edges. A block level
    /// control dependence becomes an edge from the last node of the
    /// controlling block to the first node of the controlled one.
    pub fn to_petgraph(&self, module: &Module) -> DepGraph {
        let mut graph = DiGraph::new();
        let mut index: FxHashMap<NodeId, NodeIndex> = FxHashMap::default();
        for (id, node) in self.live_nodes() {
            let function = node
                .graph()
                .and_then(|g| self.try_graph(g))
                .map(|g| g.function());
            let ix = graph.add_node(DepNode {
                id,
                key: node.key(),
                function,
                label: Intern::new(node_label(module, node.key())),
            });
            index.insert(id, ix);
        }
        for (id, node) in self.live_nodes() {
            let from = index[&id];
            for (targets, kind) in [
                (node.control_dependences(), DepEdgeKind::Control),
                (node.data_dependences(), DepEdgeKind::Data),
            ] {
                for target in targets {
                    if let Some(&to) = index.get(target) {
                        graph.add_edge(from, to, DepEdge { kind });
                    }
                }
            }
        }
        for (_, g) in self.graphs() {
            for unit in g.blocks().values() {
                let Some(last) = unit.last_node() else {
                    continue;
                };
                for &controlled in unit.control_dependences() {
                    let Some(first) = g.block(controlled).and_then(|u| u.first_node()) else {
                        continue;
                    };
                    graph.add_edge(
                        index[&last],
                        index[&first],
                        DepEdge {
                            kind: DepEdgeKind::Control,
                        },
                    );
                }
            }
        }
        DepGraph { graph }
    }
}
