//! The representation of the dependence graph.
//!
//! All nodes and graphs live in the arenas of a
//! [`GraphRegistry`](crate::GraphRegistry) and refer to one another by
//! [`NodeId`] and [`GraphId`]. The types in this module only hold those
//! handles, which is what lets a call node point at the graph that contains it
//! in the recursive case.

use std::fmt;

use dg_ir::{BlockId, FunctionId, ValueId};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::parameters::ParameterSet;

/// Label of the synthetic edge from a returning block into the unified exit
/// block. Ordinary successor edges use their position, which must stay below
/// this value.
pub const EXIT_EDGE_LABEL: u8 = u8::MAX;

macro_rules! handle_type {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn from_usize(idx: usize) -> Self {
                Self(u32::try_from(idx).expect(concat!(stringify!($name), " overflow")))
            }

            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// A node in the [`GraphRegistry`](crate::GraphRegistry).
    NodeId,
    "n"
);
handle_type!(
    /// A per-function [`DependenceGraph`] in the
    /// [`GraphRegistry`](crate::GraphRegistry).
    GraphId,
    "g"
);

/// How the synthetic exit of a function came to be.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ExitKind {
    /// Unifies one or more return instructions.
    Return,
    /// The function never returns normally.
    Unreachable,
}

/// What a [`Node`] stands for.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize, strum::EnumIs)]
pub enum NodeKey {
    /// A value of the module: an instruction, a function (entry nodes), an
    /// argument, a global or a heap allocation site (parameter nodes).
    Value(ValueId),
    /// The phony exit of a function. Has no counterpart in the program text.
    Exit { function: FunctionId, kind: ExitKind },
    /// Placeholder for the variadic arguments of a function.
    VarArg(FunctionId),
}

impl NodeKey {
    /// Artificial nodes are not backed by an IR value.
    pub fn is_artificial(self) -> bool {
        !self.is_value()
    }

    pub fn as_value(self) -> Option<ValueId> {
        match self {
            NodeKey::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Value(v) => write!(f, "{v}"),
            NodeKey::Exit { function, kind } => write!(f, "{function}::exit({})", kind.as_ref()),
            NodeKey::VarArg(function) => write!(f, "{function}::vararg"),
        }
    }
}

/// Identifies a [`BasicBlockUnit`] within its graph.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum BlockKey {
    Block(BlockId),
    /// The one-node block holding the unified exit.
    Exit,
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKey::Block(b) => write!(f, "{b}"),
            BlockKey::Exit => f.write_str("exit"),
        }
    }
}

/// A labeled edge between two blocks of the same graph.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct BlockEdge {
    /// The other end of the edge. For predecessor lists this is the source.
    pub target: BlockKey,
    pub label: u8,
}

/// A node in the dependence graph.
///
/// Call nodes additionally carry the graphs of their possible callees and the
/// actual parameters bound to those callees' formals.
#[derive(Debug, Clone)]
pub struct Node {
    key: NodeKey,
    graph: Option<GraphId>,
    block: Option<BlockKey>,
    pub(crate) control_deps: IndexSet<NodeId>,
    pub(crate) rev_control_deps: IndexSet<NodeId>,
    pub(crate) data_deps: IndexSet<NodeId>,
    pub(crate) rev_data_deps: IndexSet<NodeId>,
    pub(crate) subgraphs: IndexSet<GraphId>,
    pub(crate) parameters: Option<ParameterSet>,
}

impl Node {
    pub(crate) fn new(key: NodeKey) -> Self {
        Self {
            key,
            graph: None,
            block: None,
            control_deps: IndexSet::new(),
            rev_control_deps: IndexSet::new(),
            data_deps: IndexSet::new(),
            rev_data_deps: IndexSet::new(),
            subgraphs: IndexSet::new(),
            parameters: None,
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn is_artificial(&self) -> bool {
        self.key.is_artificial()
    }

    /// The graph owning this node. `None` only for the shared global nodes.
    pub fn graph(&self) -> Option<GraphId> {
        self.graph
    }

    pub fn block(&self) -> Option<BlockKey> {
        self.block
    }

    /// Nodes that are control dependent on this one.
    pub fn control_dependences(&self) -> &IndexSet<NodeId> {
        &self.control_deps
    }

    /// Nodes this one is control dependent on.
    pub fn rev_control_dependences(&self) -> &IndexSet<NodeId> {
        &self.rev_control_deps
    }

    /// Nodes that are data dependent on this one.
    pub fn data_dependences(&self) -> &IndexSet<NodeId> {
        &self.data_deps
    }

    pub fn rev_data_dependences(&self) -> &IndexSet<NodeId> {
        &self.rev_data_deps
    }

    /// Graphs of the functions this call node may call.
    pub fn subgraphs(&self) -> &IndexSet<GraphId> {
        &self.subgraphs
    }

    pub fn has_subgraphs(&self) -> bool {
        !self.subgraphs.is_empty()
    }

    /// Actual parameters of a call node.
    pub fn parameters(&self) -> Option<&ParameterSet> {
        self.parameters.as_ref()
    }

    pub(crate) fn set_graph(&mut self, graph: GraphId) {
        if let Some(old) = self.graph {
            assert_eq!(
                old, graph,
                "INVARIANT VIOLATED: node {} already belongs to {old}",
                self.key
            );
        }
        self.graph = Some(graph);
    }

    pub(crate) fn set_block(&mut self, block: BlockKey) {
        self.block = Some(block);
    }
}

/// The nodes of one basic block, in instruction order.
#[derive(Debug, Clone)]
pub struct BasicBlockUnit {
    key: BlockKey,
    nodes: Vec<NodeId>,
    successors: IndexSet<BlockEdge>,
    predecessors: IndexSet<BlockEdge>,
    call_sites: IndexSet<NodeId>,
    control_deps: IndexSet<BlockKey>,
    rev_control_deps: IndexSet<BlockKey>,
}

impl BasicBlockUnit {
    pub(crate) fn new(key: BlockKey) -> Self {
        Self {
            key,
            nodes: vec![],
            successors: IndexSet::new(),
            predecessors: IndexSet::new(),
            call_sites: IndexSet::new(),
            control_deps: IndexSet::new(),
            rev_control_deps: IndexSet::new(),
        }
    }

    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    pub fn successors(&self) -> &IndexSet<BlockEdge> {
        &self.successors
    }

    pub fn predecessors(&self) -> &IndexSet<BlockEdge> {
        &self.predecessors
    }

    pub fn successors_num(&self) -> usize {
        self.successors.len()
    }

    pub fn has_self_loop(&self) -> bool {
        self.successors.iter().any(|e| e.target == self.key)
    }

    /// Call nodes in this block that were linked to at least one callee graph.
    pub fn call_sites(&self) -> &IndexSet<NodeId> {
        &self.call_sites
    }

    /// Blocks that are control dependent on this one.
    pub fn control_dependences(&self) -> &IndexSet<BlockKey> {
        &self.control_deps
    }

    pub fn rev_control_dependences(&self) -> &IndexSet<BlockKey> {
        &self.rev_control_deps
    }

    pub(crate) fn append(&mut self, node: NodeId) {
        self.nodes.push(node);
    }

    pub(crate) fn add_call_site(&mut self, node: NodeId) {
        self.call_sites.insert(node);
    }
}

/// Where a graph is in its life cycle.
#[derive(PartialEq, Eq, Clone, Copy, Debug, strum::EnumIs)]
pub enum BuildState {
    /// Registered, body not yet visited.
    Unbuilt,
    /// Body construction is in progress. Recursive requests for the function
    /// observe this graph and must only look at its entry and parameters.
    Building,
    Built,
    /// Teardown is in progress.
    Destroying,
}

/// The dependence graph of a single function.
#[derive(Debug)]
pub struct DependenceGraph {
    function: FunctionId,
    pub(crate) state: BuildState,
    pub(crate) refcount: usize,
    pub(crate) entry: Option<NodeId>,
    pub(crate) exit: Option<NodeId>,
    pub(crate) entry_block: Option<BlockId>,
    pub(crate) blocks: IndexMap<BlockId, BasicBlockUnit>,
    pub(crate) exit_block: Option<BasicBlockUnit>,
    /// Every node owned by this graph except the parameter nodes.
    pub(crate) nodes: IndexMap<NodeKey, NodeId>,
    pub(crate) parameters: ParameterSet,
    /// All call nodes of this graph, resolved or not.
    pub(crate) call_nodes: IndexSet<NodeId>,
    /// Call nodes of other graphs (or this one) linked to this graph.
    pub(crate) callers: IndexSet<NodeId>,
}

impl DependenceGraph {
    pub(crate) fn new(function: FunctionId) -> Self {
        Self {
            function,
            state: BuildState::Unbuilt,
            refcount: 1,
            entry: None,
            exit: None,
            entry_block: None,
            blocks: IndexMap::new(),
            exit_block: None,
            nodes: IndexMap::new(),
            parameters: ParameterSet::default(),
            call_nodes: IndexSet::new(),
            callers: IndexSet::new(),
        }
    }

    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Number of call-node references to this graph, plus one for the
    /// caller of a root construction.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn exit(&self) -> Option<NodeId> {
        self.exit
    }

    pub fn entry_block(&self) -> Option<&BasicBlockUnit> {
        self.entry_block.and_then(|b| self.blocks.get(&b))
    }

    pub fn exit_block(&self) -> Option<&BasicBlockUnit> {
        self.exit_block.as_ref()
    }

    /// The block units of the function's basic blocks. Does not include the
    /// exit block.
    pub fn blocks(&self) -> &IndexMap<BlockId, BasicBlockUnit> {
        &self.blocks
    }

    pub fn block(&self, key: BlockKey) -> Option<&BasicBlockUnit> {
        match key {
            BlockKey::Block(b) => self.blocks.get(&b),
            BlockKey::Exit => self.exit_block.as_ref(),
        }
    }

    pub fn nodes(&self) -> &IndexMap<NodeKey, NodeId> {
        &self.nodes
    }

    /// The node of an instruction (or of the function itself for the entry).
    pub fn node_for(&self, value: ValueId) -> Option<NodeId> {
        self.nodes.get(&NodeKey::Value(value)).copied()
    }

    /// Formal parameters of the function.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn call_nodes(&self) -> &IndexSet<NodeId> {
        &self.call_nodes
    }

    pub fn callers(&self) -> &IndexSet<NodeId> {
        &self.callers
    }

    pub(crate) fn block_mut(&mut self, key: BlockKey) -> &mut BasicBlockUnit {
        let unit = match key {
            BlockKey::Block(b) => self.blocks.get_mut(&b),
            BlockKey::Exit => self.exit_block.as_mut(),
        };
        unit.unwrap_or_else(|| panic!("INVARIANT VIOLATED: missing block unit {key}"))
    }

    pub(crate) fn add_block_successor(&mut self, from: BlockKey, to: BlockKey, label: u8) {
        self.block_mut(from).successors.insert(BlockEdge { target: to, label });
        self.block_mut(to)
            .predecessors
            .insert(BlockEdge { target: from, label });
    }

    pub(crate) fn add_block_control_dependence(&mut self, from: BlockKey, to: BlockKey) {
        self.block_mut(from).control_deps.insert(to);
        self.block_mut(to).rev_control_deps.insert(from);
    }
}
