//! Formal and actual parameter sets.

use dg_ir::ValueId;
use indexmap::IndexMap;

use crate::graph::NodeId;

/// The input and output node standing for one parameter.
///
/// For formals the input node receives the value from the caller and the
/// output node hands the (possibly modified) value back. For actuals at a call
/// site it is the other way around.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct Parameter {
    pub input: NodeId,
    pub output: NodeId,
}

/// Parameters of a function or of a call site.
///
/// `params` holds declared arguments as well as heap objects keyed by their
/// allocation call. Globals are kept apart so that they can be propagated to
/// callers wholesale.
#[derive(Clone, Debug, Default)]
pub struct ParameterSet {
    params: IndexMap<ValueId, Parameter>,
    globals: IndexMap<ValueId, Parameter>,
    vararg: Option<Parameter>,
}

impl ParameterSet {
    pub fn find(&self, key: ValueId) -> Option<&Parameter> {
        self.params.get(&key).or_else(|| self.globals.get(&key))
    }

    pub fn find_global(&self, key: ValueId) -> Option<&Parameter> {
        self.globals.get(&key)
    }

    pub fn contains(&self, key: ValueId) -> bool {
        self.params.contains_key(&key) || self.globals.contains_key(&key)
    }

    pub fn params(&self) -> &IndexMap<ValueId, Parameter> {
        &self.params
    }

    pub fn globals(&self) -> &IndexMap<ValueId, Parameter> {
        &self.globals
    }

    pub fn vararg(&self) -> Option<Parameter> {
        self.vararg
    }

    pub fn len(&self) -> usize {
        self.params.len() + self.globals.len() + usize::from(self.vararg.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every input and output node in this set.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.params
            .values()
            .chain(self.globals.values())
            .chain(self.vararg.iter())
            .flat_map(|p| [p.input, p.output])
    }

    /// Returns `false` and leaves the set untouched if `key` is already present
    /// in either map.
    pub(crate) fn add(&mut self, key: ValueId, param: Parameter) -> bool {
        if self.contains(key) {
            return false;
        }
        self.params.insert(key, param);
        true
    }

    pub(crate) fn add_global(&mut self, key: ValueId, param: Parameter) -> bool {
        if self.contains(key) {
            return false;
        }
        self.globals.insert(key, param);
        true
    }

    pub(crate) fn set_vararg(&mut self, param: Parameter) {
        assert!(
            self.vararg.is_none(),
            "INVARIANT VIOLATED: vararg parameter set twice"
        );
        self.vararg = Some(param);
    }
}
