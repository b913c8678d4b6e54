//! Compute interprocedural dependence graphs for the call graph of a module.
//!
//! Every function reachable from the entry gets one [`DependenceGraph`] of
//! control and data dependences. Call nodes link to the graphs of their
//! callees, and globals or heap objects a callee touches become parameters of
//! all of its callers.

pub use dg_ir;

pub use crate::{
    config::DgConfig,
    construct::{ConstructionError, DgConstructor},
    export::{DepEdge, DepEdgeKind, DepGraph, DepNode},
    graph::{
        BasicBlockUnit, BlockEdge, BlockKey, BuildState, DependenceGraph, ExitKind, GraphId, Node,
        NodeId, NodeKey, EXIT_EDGE_LABEL,
    },
    oracle::{ControlScopes, Pointer, PointsToFn, PointsToOracle, PostDominatorScopes},
    parameters::{Parameter, ParameterSet},
    registry::GraphRegistry,
    verify::VerifyError,
};

mod builder;
mod calling_convention;
pub mod config;
mod construct;
mod control;
mod export;
pub mod graph;
pub mod oracle;
mod parameters;
mod registry;
mod verify;

/// Builds the graphs for everything reachable from `entry`, or from `main`.
pub fn compute_dg<'m>(
    module: &'m dg_ir::Module,
    entry: Option<&str>,
) -> Result<DgConstructor<'m>, ConstructionError> {
    let mut constructor = DgConstructor::new(module);
    constructor.construct_root(entry)?;
    Ok(constructor)
}
