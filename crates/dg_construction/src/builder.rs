//! Construction of a single function's graph.
//!
//! Building a function may build its callees. A graph is registered before its
//! body is visited, so a recursive request finds the graph in
//! [`BuildState::Building`] and links to it instead of descending again.

use dg_ir::{BlockId, FunctionId, Instruction, InstructionKind, Module, ValueId};
use log::{debug, trace, warn};

use crate::{
    calling_convention::call_is_compatible,
    config::DgConfig,
    graph::{
        BasicBlockUnit, BlockKey, BuildState, ExitKind, GraphId, NodeId, NodeKey, EXIT_EDGE_LABEL,
    },
    oracle::{ControlScopes, PointsToOracle},
    registry::GraphRegistry,
};

pub(crate) struct Builder<'a, 'm> {
    pub(crate) module: &'m Module,
    pub(crate) config: &'a DgConfig,
    pub(crate) points_to: Option<&'a (dyn PointsToOracle + 'm)>,
    pub(crate) control_scopes: &'a (dyn ControlScopes + 'm),
    pub(crate) registry: &'a mut GraphRegistry,
}

impl Builder<'_, '_> {
    /// The graph for `function`, building it if this is the first request.
    ///
    /// # Panics
    ///
    /// If `function` is only a declaration.
    pub(crate) fn get_or_build(&mut self, function: FunctionId) -> GraphId {
        if let Some(g) = self.registry.lookup(function) {
            return g;
        }
        let g = self.registry.create(function);
        let built = self.build(g);
        assert!(
            built,
            "INVARIANT VIOLATED: requested a graph for declaration {}",
            self.module.function(function).name
        );
        // From here on only the call nodes linking to it keep the graph alive.
        self.registry.unref(g, false);
        g
    }

    /// Builds the body of a registered graph. Returns `false` if the function
    /// has no blocks.
    pub(crate) fn build(&mut self, g: GraphId) -> bool {
        let module = self.module;
        let function = module.function(self.registry.graph(g).function());
        if !function.is_defined() {
            return false;
        }
        debug!("Building graph {g} for {}", function.name);
        self.registry.graph_mut(g).state = BuildState::Building;

        let entry = self
            .registry
            .add_graph_node(g, NodeKey::Value(function.value), None);
        self.registry.graph_mut(g).entry = Some(entry);

        self.add_formal_parameters(g);

        for &block in &function.blocks {
            self.build_block(g, block);
        }
        self.registry.graph_mut(g).entry_block = function.entry_block();

        for &block in &function.blocks {
            self.add_successors(g, block);
        }

        if self.registry.graph(g).exit().is_none() {
            self.add_exit(g, ExitKind::Unreachable);
        }

        self.add_control_dependences(g);

        let graph = self.registry.graph(g);
        let first = graph
            .entry_block()
            .and_then(BasicBlockUnit::first_node)
            .unwrap_or_else(|| {
                panic!("INVARIANT VIOLATED: no entry block in graph of {}", function.name)
            });
        assert!(
            graph.exit_block().is_some(),
            "INVARIANT VIOLATED: no exit block in graph of {}",
            function.name
        );
        self.registry.add_control_dependence(entry, first);

        self.registry.graph_mut(g).state = BuildState::Built;
        debug!(
            "Built graph {g} for {} with {} nodes",
            function.name,
            self.registry.graph(g).nodes().len()
        );
        true
    }

    fn build_block(&mut self, g: GraphId, block: BlockId) {
        let module = self.module;
        let key = BlockKey::Block(block);
        let instructions = &module.block(block).instructions;
        assert!(
            !instructions.is_empty(),
            "INVARIANT VIOLATED: block {block} has no instructions"
        );
        // The unit exists before its nodes so call handling can record call
        // sites in it.
        self.registry
            .graph_mut(g)
            .blocks
            .insert(block, BasicBlockUnit::new(key));

        for &value in instructions {
            let node = self.registry.add_graph_node(g, NodeKey::Value(value), Some(key));
            let inst = module.instruction(value).unwrap_or_else(|| {
                panic!("INVARIANT VIOLATED: {value} in {block} is not an instruction")
            });
            trace!("{node}: {value} = {}", inst.kind.as_ref());
            self.handle_instruction(g, node, value, inst);
            if inst.kind.is_return() {
                self.unify_return(g, block, node);
            }
        }
    }

    fn handle_instruction(
        &mut self,
        g: GraphId,
        node: NodeId,
        value: ValueId,
        inst: &Instruction,
    ) {
        match &inst.kind {
            InstructionKind::Call { callee, args } => {
                self.handle_call(g, inst.block, node, value, *callee, args)
            }
            InstructionKind::Load { address }
            | InstructionKind::GetElementPtr { base: address, .. } => {
                self.check_global_operand(g, *address)
            }
            InstructionKind::Store { value, address } => {
                self.check_global_operand(g, *value);
                self.check_global_operand(g, *address);
            }
            _ => (),
        }
    }

    fn check_global_operand(&mut self, g: GraphId, operand: ValueId) {
        let base = self.module.strip_in_bounds_offsets(operand);
        if self.module.is_global_variable(base) {
            self.discover_global(g, base);
        }
    }

    fn handle_call(
        &mut self,
        g: GraphId,
        block: BlockId,
        node: NodeId,
        call: ValueId,
        callee: ValueId,
        args: &[ValueId],
    ) {
        let module = self.module;
        self.registry.graph_mut(g).call_nodes.insert(node);
        let Some(function) = module.as_function(module.strip_pointer_casts(callee)) else {
            self.resolve_indirect_call(g, block, node, call, callee, args);
            return;
        };
        let target = module.function(function);
        let name = target.name.as_str();
        if self.config.gather_callsites() == Some(name) {
            self.registry.gathered.insert(node);
        }
        if target.is_defined() {
            self.build_call_subgraph(block, node, function);
        }
        if self.config.is_alloc_function(name) {
            trace!("{call} allocates a heap object");
            self.discover_heap(g, call);
        }
    }

    fn resolve_indirect_call(
        &mut self,
        g: GraphId,
        block: BlockId,
        node: NodeId,
        call: ValueId,
        callee: ValueId,
        args: &[ValueId],
    ) {
        let module = self.module;
        let Some(points_to) = self.points_to else {
            warn!("No points-to information for indirect call {call} in {g}");
            return;
        };
        let mut resolved = false;
        for pointer in points_to.points_to(module, callee) {
            if !pointer.valid {
                continue;
            }
            let target = module.strip_pointer_casts(pointer.target);
            let Some(function) = module.as_function(target) else {
                assert!(
                    !module.value(pointer.target).kind.is_alias(),
                    "INVARIANT VIOLATED: {} is an alias of {target}, which is not a function",
                    pointer.target
                );
                continue;
            };
            let f = module.function(function);
            if !f.is_defined() || !call_is_compatible(module, f, call, args) {
                trace!("Skipping {} as target of {call}", f.name);
                continue;
            }
            self.build_call_subgraph(block, node, function);
            resolved = true;
        }
        if !resolved {
            warn!("Indirect call {call} in {g} has no compatible target");
        }
    }

    /// Links the graph of `callee` to the call node `node`, building it if
    /// needed, and binds the call's actual parameters to its formals.
    ///
    /// # Panics
    ///
    /// If `node` is not a call.
    pub(crate) fn build_call_subgraph(
        &mut self,
        block: BlockId,
        node: NodeId,
        callee: FunctionId,
    ) -> GraphId {
        let key = self.registry.node(node).key();
        assert!(
            key.as_value()
                .and_then(|v| self.module.instruction(v))
                .is_some_and(|inst| inst.kind.is_call()),
            "INVARIANT VIOLATED: linking a subgraph to {key}, which is not a call"
        );
        let caller = self
            .registry
            .node(node)
            .graph()
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: call {node} has no graph"));

        let sub = self.get_or_build(callee);
        if self.registry.add_subgraph(node, sub) {
            debug!(
                "Linked call {node} in {caller} to {sub} ({})",
                self.module.function(callee).name
            );
        }
        let entry = self
            .registry
            .graph(sub)
            .entry()
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: {sub} has no entry node"));
        self.registry.add_control_dependence(node, entry);
        self.registry
            .graph_mut(caller)
            .block_mut(BlockKey::Block(block))
            .add_call_site(node);

        self.absorb_callee_parameters(caller, sub);
        self.add_actual_parameters(node, sub);
        sub
    }

    fn add_exit(&mut self, g: GraphId, kind: ExitKind) -> NodeId {
        let function = self.registry.graph(g).function();
        self.registry.graph_mut(g).exit_block = Some(BasicBlockUnit::new(BlockKey::Exit));
        let exit = self
            .registry
            .add_graph_node(g, NodeKey::Exit { function, kind }, Some(BlockKey::Exit));
        self.registry.graph_mut(g).exit = Some(exit);
        exit
    }

    /// Every return flows into one exit node.
    fn unify_return(&mut self, g: GraphId, block: BlockId, node: NodeId) {
        let exit = match self.registry.graph(g).exit() {
            Some(exit) => exit,
            None => self.add_exit(g, ExitKind::Return),
        };
        self.registry.add_control_dependence(node, exit);
        self.registry.graph_mut(g).add_block_successor(
            BlockKey::Block(block),
            BlockKey::Exit,
            EXIT_EDGE_LABEL,
        );
    }

    fn add_successors(&mut self, g: GraphId, block: BlockId) {
        let graph = self.registry.graph_mut(g);
        for (idx, succ) in self.module.successors(block).into_iter().enumerate() {
            let label = u8::try_from(idx)
                .ok()
                .filter(|&l| l != EXIT_EDGE_LABEL)
                .unwrap_or_else(|| {
                    panic!("INVARIANT VIOLATED: block {block} has more than 255 successors")
                });
            assert!(
                graph.blocks.contains_key(&succ),
                "INVARIANT VIOLATED: successor {succ} of {block} was not built"
            );
            graph.add_block_successor(BlockKey::Block(block), BlockKey::Block(succ), label);
        }
    }
}
