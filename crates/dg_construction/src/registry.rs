//! Owner of every graph and node built for a module.
//!
//! Graphs are kept alive by the call nodes that link to them. A graph that is
//! created for a root construction additionally holds one reference on behalf
//! of whoever asked for it; [`GraphRegistry::release`] gives it back.

use dg_ir::{FunctionId, InstructionKind, Module, ValueId};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::graph::{BlockKey, BuildState, DependenceGraph, GraphId, Node, NodeId, NodeKey};

#[derive(Default, Debug)]
pub struct GraphRegistry {
    graphs: Vec<Option<DependenceGraph>>,
    by_function: FxHashMap<FunctionId, GraphId>,
    nodes: Vec<Option<Node>>,
    globals: IndexMap<ValueId, NodeId>,
    pub(crate) gathered: IndexSet<NodeId>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The graph built for `function`, if any.
    pub fn lookup(&self, function: FunctionId) -> Option<GraphId> {
        self.by_function.get(&function).copied()
    }

    /// # Panics
    ///
    /// If the graph has been destroyed.
    pub fn graph(&self, id: GraphId) -> &DependenceGraph {
        self.try_graph(id)
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: graph {id} was destroyed"))
    }

    pub fn try_graph(&self, id: GraphId) -> Option<&DependenceGraph> {
        self.graphs.get(id.as_usize()).and_then(Option::as_ref)
    }

    pub(crate) fn graph_mut(&mut self, id: GraphId) -> &mut DependenceGraph {
        self.graphs
            .get_mut(id.as_usize())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: graph {id} was destroyed"))
    }

    /// All live graphs in creation order.
    pub fn graphs(&self) -> impl Iterator<Item = (GraphId, &DependenceGraph)> + '_ {
        self.graphs
            .iter()
            .enumerate()
            .filter_map(|(idx, g)| Some((GraphId::from_usize(idx), g.as_ref()?)))
    }

    /// Number of live graphs.
    pub fn len(&self) -> usize {
        self.by_function.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_function.is_empty()
    }

    /// # Panics
    ///
    /// If the node has been freed.
    pub fn node(&self, id: NodeId) -> &Node {
        self.try_node(id)
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: node {id} was freed"))
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(id.as_usize())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: node {id} was freed"))
    }

    /// Number of live nodes, including the global pool.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, n)| Some((NodeId::from_usize(idx), n.as_ref()?)))
    }

    /// The shared node of a global variable.
    pub fn global_node(&self, value: ValueId) -> Option<NodeId> {
        self.globals.get(&value).copied()
    }

    pub fn global_nodes(&self) -> &IndexMap<ValueId, NodeId> {
        &self.globals
    }

    /// Call nodes collected because their callee had the configured name.
    pub fn gathered_call_sites(&self) -> &IndexSet<NodeId> {
        &self.gathered
    }

    /// Creates the global pool. Later calls only add globals not seen before.
    pub(crate) fn add_globals(&mut self, module: &Module) {
        for &g in module.globals() {
            if !self.globals.contains_key(&g) {
                let node = self.new_node(NodeKey::Value(g));
                self.globals.insert(g, node);
            }
        }
    }

    /// Registers a fresh graph for `function`. The graph starts out with one
    /// reference.
    pub(crate) fn create(&mut self, function: FunctionId) -> GraphId {
        assert!(
            !self.by_function.contains_key(&function),
            "INVARIANT VIOLATED: graph for {function} created twice"
        );
        let id = GraphId::from_usize(self.graphs.len());
        self.graphs.push(Some(DependenceGraph::new(function)));
        self.by_function.insert(function, id);
        id
    }

    pub(crate) fn new_node(&mut self, key: NodeKey) -> NodeId {
        let id = NodeId::from_usize(self.nodes.len());
        self.nodes.push(Some(Node::new(key)));
        id
    }

    /// Allocates a node owned by `graph` and indexes it by its key. If `block`
    /// is given the node is appended to that block unit.
    pub(crate) fn add_graph_node(
        &mut self,
        graph: GraphId,
        key: NodeKey,
        block: Option<BlockKey>,
    ) -> NodeId {
        let id = self.new_node(key);
        let node = self.node_mut(id);
        node.set_graph(graph);
        if let Some(block) = block {
            node.set_block(block);
        }
        let g = self.graph_mut(graph);
        let previous = g.nodes.insert(key, id);
        assert!(
            previous.is_none(),
            "INVARIANT VIOLATED: {key} added to {graph} twice"
        );
        if let Some(block) = block {
            g.block_mut(block).append(id);
        }
        id
    }

    /// Allocates a parameter node. It belongs to `graph` but is not indexed,
    /// since its key is shared with the value it stands for.
    pub(crate) fn add_parameter_node(&mut self, graph: GraphId, key: NodeKey) -> NodeId {
        let id = self.new_node(key);
        self.node_mut(id).set_graph(graph);
        id
    }

    pub(crate) fn add_control_dependence(&mut self, from: NodeId, to: NodeId) -> bool {
        let added = self.node_mut(from).control_deps.insert(to);
        self.node_mut(to).rev_control_deps.insert(from);
        added
    }

    pub(crate) fn add_data_dependence(&mut self, from: NodeId, to: NodeId) -> bool {
        let added = self.node_mut(from).data_deps.insert(to);
        self.node_mut(to).rev_data_deps.insert(from);
        added
    }

    /// Links a callee graph to a call node. Returns `false` if it already was.
    pub(crate) fn add_subgraph(&mut self, call: NodeId, sub: GraphId) -> bool {
        if !self.node_mut(call).subgraphs.insert(sub) {
            return false;
        }
        let g = self.graph_mut(sub);
        g.callers.insert(call);
        g.refcount += 1;
        true
    }

    /// Adds a reference to `id`.
    pub fn retain(&mut self, id: GraphId) {
        self.graph_mut(id).refcount += 1;
    }

    /// Drops a reference to `id` and tears the graph down once none are left.
    pub fn release(&mut self, id: GraphId) {
        self.unref(id, true);
    }

    pub(crate) fn unref(&mut self, id: GraphId, delete_on_zero: bool) {
        let Some(Some(graph)) = self.graphs.get_mut(id.as_usize()) else {
            return;
        };
        if graph.refcount == 0 {
            assert!(
                graph.state.is_destroying(),
                "INVARIANT VIOLATED: unref of {id} without references"
            );
            return;
        }
        graph.refcount -= 1;
        trace!("unref {id}, {} left", graph.refcount);
        if delete_on_zero && graph.refcount == 0 && !graph.state.is_destroying() {
            self.destroy(id);
        }
    }

    /// Tears down a graph regardless of its reference count. Owned nodes and
    /// parameter nodes are freed and every callee subgraph is released.
    pub fn destroy(&mut self, id: GraphId) {
        let graph = self.graph_mut(id);
        if graph.state.is_destroying() {
            return;
        }
        graph.state = BuildState::Destroying;
        let function = graph.function();
        let owned: Vec<NodeId> = graph.nodes.values().copied().collect();
        let formals: Vec<NodeId> = graph.parameters.nodes().collect();
        let callers: Vec<NodeId> = graph.callers.iter().copied().collect();
        debug!("Destroying graph {id} of {function} ({} nodes)", owned.len());

        for caller in callers {
            if let Some(node) = self.nodes[caller.as_usize()].as_mut() {
                node.subgraphs.shift_remove(&id);
            }
        }
        for node in owned {
            let (subgraphs, actuals) = {
                let n = self.node(node);
                let actuals: Vec<NodeId> = n
                    .parameters
                    .as_ref()
                    .map(|p| p.nodes().collect())
                    .unwrap_or_default();
                (n.subgraphs.clone(), actuals)
            };
            for sub in subgraphs {
                if let Some(Some(g)) = self.graphs.get_mut(sub.as_usize()) {
                    g.callers.shift_remove(&node);
                }
                // A recursive call links the graph to itself, which is
                // already going away.
                self.unref(sub, sub != id);
            }
            for actual in actuals {
                self.free_node(actual);
            }
            self.free_node(node);
        }
        for formal in formals {
            self.free_node(formal);
        }
        if self.by_function.get(&function) == Some(&id) {
            self.by_function.remove(&function);
        }
        self.graphs[id.as_usize()] = None;
    }

    fn free_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.as_usize()).and_then(Option::take) else {
            return;
        };
        for other in &node.control_deps {
            if let Some(Some(o)) = self.nodes.get_mut(other.as_usize()) {
                o.rev_control_deps.shift_remove(&id);
            }
        }
        for other in &node.rev_control_deps {
            if let Some(Some(o)) = self.nodes.get_mut(other.as_usize()) {
                o.control_deps.shift_remove(&id);
            }
        }
        for other in &node.data_deps {
            if let Some(Some(o)) = self.nodes.get_mut(other.as_usize()) {
                o.rev_data_deps.shift_remove(&id);
            }
        }
        for other in &node.rev_data_deps {
            if let Some(Some(o)) = self.nodes.get_mut(other.as_usize()) {
                o.data_deps.shift_remove(&id);
            }
        }
    }

    /// Call nodes, across every live graph, that call a function named in
    /// `names`.
    ///
    /// A linked call matches if any of its callee graphs belongs to such a
    /// function. An unlinked call matches by its statically known callee.
    pub fn call_sites(&self, module: &Module, names: &[&str]) -> IndexSet<NodeId> {
        let mut found = IndexSet::new();
        for (_, graph) in self.graphs() {
            for &call in graph.call_nodes() {
                if self.call_matches(module, call, names) {
                    found.insert(call);
                }
            }
        }
        found
    }

    pub(crate) fn call_matches(&self, module: &Module, call: NodeId, names: &[&str]) -> bool {
        let node = self.node(call);
        if node.has_subgraphs() {
            return node.subgraphs().iter().any(|&sub| {
                self.try_graph(sub).is_some_and(|g| {
                    names.contains(&module.function(g.function()).name.as_str())
                })
            });
        }
        let Some(inst) = node.key().as_value().and_then(|v| module.instruction(v)) else {
            return false;
        };
        let InstructionKind::Call { callee, .. } = &inst.kind else {
            return false;
        };
        module
            .as_function(module.strip_pointer_casts(*callee))
            .is_some_and(|f| names.contains(&module.function(f).name.as_str()))
    }
}
