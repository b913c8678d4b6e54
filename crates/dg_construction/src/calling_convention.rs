//! Formal and actual parameters, and how globals and heap objects a callee
//! touches become parameters of every function that (transitively) calls it.

use dg_ir::{Function, InstructionKind, Module, ValueId};
use log::trace;

use crate::{
    builder::Builder,
    graph::{GraphId, NodeId, NodeKey},
    parameters::{Parameter, ParameterSet},
};

/// Could `function` be the target of `call` with the given arguments.
///
/// The call needs at least as many arguments as `function` declares, each
/// losslessly convertible to the declared type, and the return type must
/// losslessly convert to the type of the call.
pub(crate) fn call_is_compatible(
    module: &Module,
    function: &Function,
    call: ValueId,
    args: &[ValueId],
) -> bool {
    if function.params.len() > args.len() {
        return false;
    }
    if !function
        .return_type
        .can_losslessly_bitcast_to(&module.value(call).ty)
    {
        return false;
    }
    function
        .params
        .iter()
        .zip(args)
        .all(|(&formal, &actual)| {
            module
                .value(actual)
                .ty
                .can_losslessly_bitcast_to(&module.value(formal).ty)
        })
}

impl Builder<'_, '_> {
    /// Seeds the declared parameters, plus a vararg pair for variadic
    /// functions.
    pub(crate) fn add_formal_parameters(&mut self, g: GraphId) {
        let module = self.module;
        let function_id = self.registry.graph(g).function();
        let function = module.function(function_id);
        for &param in &function.params {
            self.add_formal_parameter(g, param);
        }
        if function.var_arg {
            let pair = self.new_formal_pair(g, NodeKey::VarArg(function_id));
            self.registry.add_data_dependence(pair.input, pair.output);
            self.registry.graph_mut(g).parameters.set_vararg(pair);
        }
    }

    fn new_formal_pair(&mut self, g: GraphId, key: NodeKey) -> Parameter {
        let entry = self
            .registry
            .graph(g)
            .entry()
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: {g} has no entry node"));
        let input = self.registry.add_parameter_node(g, key);
        let output = self.registry.add_parameter_node(g, key);
        self.registry.add_control_dependence(entry, input);
        self.registry.add_control_dependence(entry, output);
        Parameter { input, output }
    }

    /// Returns `false` if `value` already is a parameter of `g`.
    pub(crate) fn add_formal_parameter(&mut self, g: GraphId, value: ValueId) -> bool {
        if self.registry.graph(g).parameters.contains(value) {
            return false;
        }
        let pair = self.new_formal_pair(g, NodeKey::Value(value));
        self.registry.graph_mut(g).parameters.add(value, pair)
    }

    /// Returns `false` if `value` already is a parameter of `g`.
    pub(crate) fn add_formal_global(&mut self, g: GraphId, value: ValueId) -> bool {
        if self.registry.graph(g).parameters.contains(value) {
            return false;
        }
        let pair = self.new_formal_pair(g, NodeKey::Value(value));
        self.registry.graph_mut(g).parameters.add_global(value, pair)
    }

    /// A global accessed directly in `g`.
    pub(crate) fn discover_global(&mut self, g: GraphId, global: ValueId) {
        if self.add_formal_global(g, global) {
            trace!("{global} is a new global parameter of {g}");
            self.propagate_to_callers(g);
        }
    }

    /// The result of an allocation call in `g`.
    pub(crate) fn discover_heap(&mut self, g: GraphId, allocation: ValueId) {
        if self.add_formal_parameter(g, allocation) {
            trace!("{allocation} is a new heap parameter of {g}");
            self.propagate_to_callers(g);
        }
    }

    /// Makes every global and heap parameter of `sub` a parameter of `g` as
    /// well. Callers of `g` are updated if anything was added.
    pub(crate) fn absorb_callee_parameters(&mut self, g: GraphId, sub: GraphId) -> bool {
        let module = self.module;
        let formals = &self.registry.graph(sub).parameters;
        let globals: Vec<ValueId> = formals.globals().keys().copied().collect();
        let heap: Vec<ValueId> = formals
            .params()
            .keys()
            .copied()
            .filter(|&k| !module.value(k).kind.is_argument())
            .collect();

        let mut changed = false;
        for global in globals {
            changed |= self.add_formal_global(g, global);
        }
        for object in heap {
            changed |= self.add_formal_parameter(g, object);
        }
        if changed {
            trace!("{g} took over parameters of {sub}");
            self.propagate_to_callers(g);
        }
        changed
    }

    /// Brings every call site of `g` up to date with its formals.
    /// Terminates because adding a parameter twice is not a change.
    pub(crate) fn propagate_to_callers(&mut self, g: GraphId) {
        let callers: Vec<NodeId> = self.registry.graph(g).callers().iter().copied().collect();
        for call in callers {
            let Some(caller) = self.registry.node(call).graph() else {
                continue;
            };
            self.add_actual_parameters(call, g);
            self.absorb_callee_parameters(caller, g);
        }
    }

    /// Binds the actual parameters of `call` to the formals of `sub`. Actual
    /// pairs that already exist are reused, so every candidate callee of an
    /// indirect call shares the pair of each operand.
    pub(crate) fn add_actual_parameters(&mut self, call: NodeId, sub: GraphId) {
        let module = self.module;
        let node = self.registry.node(call);
        let caller = node
            .graph()
            .unwrap_or_else(|| panic!("INVARIANT VIOLATED: call {call} has no graph"));
        let args: &[ValueId] = match node
            .key()
            .as_value()
            .and_then(|v| module.instruction(v))
            .map(|inst| &inst.kind)
        {
            Some(InstructionKind::Call { args, .. }) => args,
            _ => panic!("INVARIANT VIOLATED: {call} is not a call"),
        };
        let formals: ParameterSet = self.registry.graph(sub).parameters.clone();
        let declared = &module.function(self.registry.graph(sub).function()).params;

        // Declared arguments bind by position, keyed by the operand passed.
        for (param, &arg) in declared.iter().zip(args) {
            if let Some(&formal) = formals.find(*param) {
                self.bind_actual(call, caller, arg, formal, false);
            }
        }
        for (&key, &formal) in formals.params() {
            if !declared.contains(&key) {
                self.bind_actual(call, caller, key, formal, false);
            }
        }
        for (&key, &formal) in formals.globals() {
            self.bind_actual(call, caller, key, formal, true);
        }
        if let Some(vararg) = formals.vararg() {
            for &arg in args.iter().skip(declared.len()) {
                self.bind_actual(call, caller, arg, vararg, false);
            }
        }
    }

    fn bind_actual(
        &mut self,
        call: NodeId,
        caller: GraphId,
        key: ValueId,
        formal: Parameter,
        global: bool,
    ) {
        let existing = self
            .registry
            .node(call)
            .parameters()
            .and_then(|p| p.find(key))
            .copied();
        let actual = match existing {
            Some(actual) => actual,
            None => {
                let input = self.registry.add_parameter_node(caller, NodeKey::Value(key));
                let output = self.registry.add_parameter_node(caller, NodeKey::Value(key));
                self.registry.add_control_dependence(call, input);
                self.registry.add_control_dependence(call, output);
                let actual = Parameter { input, output };
                let params = self
                    .registry
                    .node_mut(call)
                    .parameters
                    .get_or_insert_with(ParameterSet::default);
                if global {
                    params.add_global(key, actual);
                } else {
                    params.add(key, actual);
                }
                actual
            }
        };
        self.registry.add_data_dependence(actual.input, formal.input);
        self.registry.add_data_dependence(formal.output, actual.output);
    }
}
