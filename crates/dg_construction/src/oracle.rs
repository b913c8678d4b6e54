//! Analyses the constructor consumes but does not implement.

use std::{cell::RefCell, rc::Rc};

use dg_ir::{BlockId, FunctionId, Module, ValueId};
use indexmap::IndexSet;
use petgraph::{
    algo::dominators,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

/// One entry of a points-to set.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct Pointer {
    pub target: ValueId,
    /// Invalid pointers (null, unknown memory) are ignored.
    pub valid: bool,
}

impl Pointer {
    pub fn new(target: ValueId) -> Self {
        Self {
            target,
            valid: true,
        }
    }

    pub fn invalid(target: ValueId) -> Self {
        Self {
            target,
            valid: false,
        }
    }
}

/// Resolves the possible targets of function pointers.
pub trait PointsToOracle {
    fn points_to(&self, module: &Module, value: ValueId) -> Vec<Pointer>;
}

/// Wraps a closure as a [`PointsToOracle`].
pub struct PointsToFn<'a> {
    f: Box<dyn Fn(&Module, ValueId) -> Vec<Pointer> + 'a>,
}

impl<'a> PointsToFn<'a> {
    pub fn new(f: impl Fn(&Module, ValueId) -> Vec<Pointer> + 'a) -> Self {
        Self { f: Box::new(f) }
    }
}

impl PointsToOracle for PointsToFn<'_> {
    fn points_to(&self, module: &Module, value: ValueId) -> Vec<Pointer> {
        (self.f)(module, value)
    }
}

/// Computes the control scope of a predicate block: the blocks whose
/// execution is decided by the branch at the end of `predicate`.
pub trait ControlScopes {
    fn control_scope(&self, module: &Module, function: FunctionId, predicate: BlockId)
        -> Vec<BlockId>;
}

type ScopeMap = FxHashMap<BlockId, Vec<BlockId>>;

/// Block-level control dependence derived from post-dominators.
///
/// For a predicate `B` and each of its successors `S`, every block on the
/// post-dominator tree path from `S` up to (excluding) the immediate
/// post-dominator of `B` is in `B`'s scope. Results are computed once per
/// function.
#[derive(Default)]
pub struct PostDominatorScopes {
    cache: RefCell<FxHashMap<FunctionId, Rc<ScopeMap>>>,
}

impl PostDominatorScopes {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute(module: &Module, function: FunctionId) -> ScopeMap {
        let blocks = &module.function(function).blocks;
        // Edges point from successor to predecessor, so the dominator tree of
        // this graph rooted at the virtual exit is the post-dominator tree.
        let mut cfg: DiGraph<Option<BlockId>, ()> = DiGraph::new();
        let exit = cfg.add_node(None);
        let index: FxHashMap<BlockId, NodeIndex> =
            blocks.iter().map(|&b| (b, cfg.add_node(Some(b)))).collect();
        for &b in blocks {
            let succs = module.successors(b);
            if succs.is_empty() {
                cfg.add_edge(exit, index[&b], ());
            }
            for s in succs {
                if let Some(&s) = index.get(&s) {
                    cfg.add_edge(s, index[&b], ());
                }
            }
        }
        let post_dominators = dominators::simple_fast(&cfg, exit);

        let mut scopes = ScopeMap::default();
        for &b in blocks {
            let succs = module.successors(b);
            if succs.len() < 2 {
                continue;
            }
            let stop = post_dominators.immediate_dominator(index[&b]);
            let mut scope = IndexSet::new();
            for s in succs {
                let mut runner = index.get(&s).copied();
                while let Some(r) = runner {
                    if Some(r) == stop {
                        break;
                    }
                    let Some(block) = cfg[r] else { break };
                    scope.insert(block);
                    runner = post_dominators.immediate_dominator(r);
                }
            }
            scopes.insert(b, scope.into_iter().collect());
        }
        scopes
    }
}

impl ControlScopes for PostDominatorScopes {
    fn control_scope(
        &self,
        module: &Module,
        function: FunctionId,
        predicate: BlockId,
    ) -> Vec<BlockId> {
        let scopes = self
            .cache
            .borrow_mut()
            .entry(function)
            .or_insert_with(|| Rc::new(Self::compute(module, function)))
            .clone();
        scopes.get(&predicate).cloned().unwrap_or_default()
    }
}
