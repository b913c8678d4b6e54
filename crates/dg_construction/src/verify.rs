//! Structural checks over everything in a [`GraphRegistry`].

use dg_ir::{InstructionKind, Module};
use thiserror::Error;

use crate::{
    graph::{BlockKey, NodeId, EXIT_EDGE_LABEL},
    registry::GraphRegistry,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("graph of {function} has no entry node")]
    MissingEntry { function: String },
    #[error("graph of {function} has no exit node")]
    MissingExit { function: String },
    #[error("graph of {function} has no entry block")]
    MissingEntryBlock { function: String },
    #[error("graph of {function} has no exit block")]
    MissingExitBlock { function: String },
    #[error("block {block} of {function} has no nodes")]
    EmptyBlock { function: String, block: BlockKey },
    #[error("node {node} in block {block} of {function} does not belong there")]
    Misplaced {
        function: String,
        block: BlockKey,
        node: NodeId,
    },
    #[error("edge labeled {label} from {block} of {function} does not fit its target")]
    BadExitEdge {
        function: String,
        block: BlockKey,
        label: u8,
    },
    #[error("return {node} of {function} is not connected to the exit node")]
    DetachedReturn { function: String, node: NodeId },
    #[error("caller {node} of {function} does not link to its graph")]
    DanglingCaller { function: String, node: NodeId },
}

impl GraphRegistry {
    /// Checks every fully built graph and reports the first problem found.
    pub fn verify(&self, module: &Module) -> Result<(), VerifyError> {
        for (id, graph) in self.graphs() {
            if !graph.state().is_built() {
                continue;
            }
            let function = module.function(graph.function()).name.to_string();
            let Some(exit) = graph.exit() else {
                return Err(VerifyError::MissingExit { function });
            };
            if graph.entry().is_none() {
                return Err(VerifyError::MissingEntry { function });
            }
            if graph.entry_block().is_none() {
                return Err(VerifyError::MissingEntryBlock { function });
            }
            let Some(exit_block) = graph.exit_block() else {
                return Err(VerifyError::MissingExitBlock { function });
            };

            for unit in graph.blocks().values().chain([exit_block]) {
                let block = unit.key();
                if unit.nodes().is_empty() {
                    return Err(VerifyError::EmptyBlock { function, block });
                }
                for &node in unit.nodes() {
                    let n = self.node(node);
                    if n.block() != Some(block) || n.graph() != Some(id) {
                        return Err(VerifyError::Misplaced {
                            function,
                            block,
                            node,
                        });
                    }
                    let is_return = n
                        .key()
                        .as_value()
                        .and_then(|v| module.instruction(v))
                        .is_some_and(|inst| matches!(inst.kind, InstructionKind::Return { .. }));
                    if is_return && !n.control_dependences().contains(&exit) {
                        return Err(VerifyError::DetachedReturn { function, node });
                    }
                }
                for edge in unit.successors() {
                    if (edge.label == EXIT_EDGE_LABEL) != (edge.target == BlockKey::Exit) {
                        return Err(VerifyError::BadExitEdge {
                            function,
                            block,
                            label: edge.label,
                        });
                    }
                }
            }

            for &node in graph.callers() {
                if !self.node(node).subgraphs().contains(&id) {
                    return Err(VerifyError::DanglingCaller { function, node });
                }
            }
        }
        Ok(())
    }
}
