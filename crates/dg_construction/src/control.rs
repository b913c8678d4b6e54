//! Control dependence beyond the per-instruction edges added while building.

use dg_ir::{BlockId, InstructionKind};

use crate::{
    builder::Builder,
    graph::{BlockKey, GraphId, NodeId},
};

impl Builder<'_, '_> {
    pub(crate) fn add_control_dependences(&mut self, g: GraphId) {
        if self.config.control_scopes() {
            self.add_scope_dependences(g);
        }
        if self.config.phi_control() {
            self.add_phi_dependences(g);
        }
        if self.config.self_loops() {
            self.add_self_loop_dependences(g);
        }
    }

    /// Every predicate block controls the blocks in its control scope.
    fn add_scope_dependences(&mut self, g: GraphId) {
        let graph = self.registry.graph(g);
        let function = graph.function();
        let predicates: Vec<BlockId> = graph
            .blocks()
            .iter()
            .filter(|(_, unit)| unit.successors_num() > 1)
            .map(|(&b, _)| b)
            .collect();
        for predicate in predicates {
            let scope = self
                .control_scopes
                .control_scope(self.module, function, predicate);
            let graph = self.registry.graph_mut(g);
            for block in scope {
                graph.add_block_control_dependence(
                    BlockKey::Block(predicate),
                    BlockKey::Block(block),
                );
            }
        }
    }

    /// The last node of each block flowing into a phi controls the phi, except
    /// for the phi's own block.
    ///
    /// This over-approximates: a block holding nothing but a jump still
    /// decides which value the phi takes.
    fn add_phi_dependences(&mut self, g: GraphId) {
        let module = self.module;
        let graph = self.registry.graph(g);
        let mut edges: Vec<(NodeId, NodeId)> = vec![];
        for (&block, unit) in graph.blocks() {
            for &node in unit.nodes() {
                let Some(InstructionKind::Phi { incoming }) = self
                    .registry
                    .node(node)
                    .key()
                    .as_value()
                    .and_then(|v| module.instruction(v))
                    .map(|inst| &inst.kind)
                else {
                    continue;
                };
                for &(_, pred) in incoming {
                    if pred == block {
                        continue;
                    }
                    let last = graph
                        .blocks()
                        .get(&pred)
                        .and_then(|u| u.last_node())
                        .unwrap_or_else(|| {
                            panic!("INVARIANT VIOLATED: incoming block {pred} of phi {node} was not built")
                        });
                    edges.push((last, node));
                }
            }
        }
        for (from, to) in edges {
            self.registry.add_control_dependence(from, to);
        }
    }

    /// A predicate block that may branch back to itself controls itself.
    fn add_self_loop_dependences(&mut self, g: GraphId) {
        let graph = self.registry.graph_mut(g);
        let looping: Vec<BlockKey> = graph
            .blocks()
            .values()
            .filter(|unit| unit.successors_num() > 1 && unit.has_self_loop())
            .map(|unit| unit.key())
            .collect();
        for block in looping {
            graph.add_block_control_dependence(block, block);
        }
    }
}
