//! The representation of an IR module.

use std::{fmt, io::Read};

use internment::Intern;
use serde::{Deserialize, Serialize};

use crate::ty::Type;

macro_rules! index_type {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(
            PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub fn from_usize(idx: usize) -> Self {
                Self(u32::try_from(idx).expect(concat!(stringify!($name), " overflow")))
            }

            pub fn as_usize(self) -> usize {
                self.0 as usize
            }

            pub fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

index_type!(
    /// Identifies a function of a [`Module`].
    FunctionId,
    "fn"
);
index_type!(
    /// Identifies a basic block. Unique across the whole module.
    BlockId,
    "bb"
);
index_type!(
    /// Identifies a value. Functions, arguments, globals, constants and
    /// instructions all share this index space.
    ValueId,
    "%"
);

/// A value in the module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Value {
    pub kind: ValueKind,
    pub ty: Type,
    pub name: Option<Intern<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, strum::EnumIs)]
pub enum ValueKind {
    /// The address of a function.
    Function(FunctionId),
    /// A formal argument of a function.
    Argument { function: FunctionId, index: u32 },
    /// A global variable.
    Global,
    /// Any constant that is not an expression over another value.
    Constant,
    /// A global alias of another value.
    Alias { aliasee: ValueId },
    ConstantExpr(ConstantExpr),
    Instruction(Instruction),
}

/// Constant expressions that matter when stripping pointer adjustments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConstantExpr {
    Cast { operand: ValueId },
    GetElementPtr { base: ValueId, in_bounds: bool },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instruction {
    pub function: FunctionId,
    pub block: BlockId,
    pub kind: InstructionKind,
}

/// The instruction kinds the dependence graph constructor distinguishes.
#[derive(Clone, Debug, Serialize, Deserialize, strum::EnumIs, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum InstructionKind {
    Call {
        callee: ValueId,
        args: Vec<ValueId>,
    },
    Return {
        value: Option<ValueId>,
    },
    Load {
        address: ValueId,
    },
    Store {
        value: ValueId,
        address: ValueId,
    },
    GetElementPtr {
        base: ValueId,
        indices: Vec<ValueId>,
        in_bounds: bool,
    },
    Phi {
        incoming: Vec<(ValueId, BlockId)>,
    },
    Cast {
        operand: ValueId,
    },
    Branch {
        target: BlockId,
    },
    CondBranch {
        condition: ValueId,
        if_true: BlockId,
        if_false: BlockId,
    },
    Switch {
        condition: ValueId,
        default: BlockId,
        cases: Vec<BlockId>,
    },
    Unreachable,
    Other {
        opcode: Intern<String>,
        operands: Vec<ValueId>,
    },
}

impl InstructionKind {
    /// Control flow successors of a terminator in operand order. Duplicate
    /// targets are preserved, so the position of a target is its edge index.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstructionKind::Branch { target } => vec![*target],
            InstructionKind::CondBranch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            InstructionKind::Switch { default, cases, .. } => {
                std::iter::once(*default).chain(cases.iter().copied()).collect()
            }
            _ => vec![],
        }
    }

    /// Every value this instruction reads, callee included.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            InstructionKind::Call { callee, args } => {
                std::iter::once(*callee).chain(args.iter().copied()).collect()
            }
            InstructionKind::Return { value } => value.iter().copied().collect(),
            InstructionKind::Load { address } => vec![*address],
            InstructionKind::Store { value, address } => vec![*value, *address],
            InstructionKind::GetElementPtr { base, indices, .. } => {
                std::iter::once(*base).chain(indices.iter().copied()).collect()
            }
            InstructionKind::Phi { incoming } => incoming.iter().map(|&(v, _)| v).collect(),
            InstructionKind::Cast { operand } => vec![*operand],
            InstructionKind::CondBranch { condition, .. }
            | InstructionKind::Switch { condition, .. } => vec![*condition],
            InstructionKind::Other { operands, .. } => operands.clone(),
            InstructionKind::Branch { .. } | InstructionKind::Unreachable => vec![],
        }
    }

    /// Successors plus the incoming blocks of a phi.
    pub fn referenced_blocks(&self) -> Vec<BlockId> {
        match self {
            InstructionKind::Phi { incoming } => incoming.iter().map(|&(_, b)| b).collect(),
            _ => self.successors(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionKind::Return { .. }
                | InstructionKind::Branch { .. }
                | InstructionKind::CondBranch { .. }
                | InstructionKind::Switch { .. }
                | InstructionKind::Unreachable
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub name: Intern<String>,
    /// The value standing for the address of this function.
    pub value: ValueId,
    pub params: Vec<ValueId>,
    pub var_arg: bool,
    pub return_type: Type,
    /// Basic blocks in layout order. The first one is the entry block. Empty
    /// for declarations.
    pub blocks: Vec<BlockId>,
}

impl Function {
    /// Does this function have a body.
    pub fn is_defined(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub function: FunctionId,
    pub name: Option<Intern<String>>,
    pub instructions: Vec<ValueId>,
}

/// A whole program.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub(crate) functions: Vec<Function>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) values: Vec<Value>,
    pub(crate) globals: Vec<ValueId>,
}

impl Module {
    /// Read a module that a front-end serialized as JSON.
    pub fn from_json(reader: impl Read) -> anyhow::Result<Module> {
        let module: Module = serde_json::from_reader(reader)?;
        module.check_indices()?;
        Ok(module)
    }

    fn check_indices(&self) -> anyhow::Result<()> {
        let value = |v: ValueId| v.as_usize() < self.values.len();
        let block = |b: BlockId| b.as_usize() < self.blocks.len();
        let function = |f: FunctionId| f.as_usize() < self.functions.len();

        for (idx, f) in self.functions.iter().enumerate() {
            let name = f.name.as_str();
            anyhow::ensure!(
                value(f.value),
                "function {idx} refers to missing value {}",
                f.value
            );
            for &p in &f.params {
                anyhow::ensure!(value(p), "function {name} has missing parameter {p}");
            }
            for &b in &f.blocks {
                anyhow::ensure!(block(b), "function {name} refers to missing block {b}");
            }
        }
        for (idx, b) in self.blocks.iter().enumerate() {
            anyhow::ensure!(
                function(b.function),
                "block bb{idx} belongs to missing function {}",
                b.function
            );
            for &v in &b.instructions {
                anyhow::ensure!(value(v), "block bb{idx} refers to missing value {v}");
            }
        }
        for &g in &self.globals {
            anyhow::ensure!(value(g), "missing global {g}");
        }
        for (idx, v) in self.values.iter().enumerate() {
            let id = ValueId::from_usize(idx);
            match &v.kind {
                ValueKind::Function(f) | ValueKind::Argument { function: f, .. } => {
                    anyhow::ensure!(function(*f), "{id} refers to missing function {f}")
                }
                ValueKind::Global | ValueKind::Constant => (),
                ValueKind::Alias { aliasee } => {
                    anyhow::ensure!(value(*aliasee), "{id} aliases missing value {aliasee}")
                }
                ValueKind::ConstantExpr(
                    ConstantExpr::Cast { operand: base } | ConstantExpr::GetElementPtr { base, .. },
                ) => anyhow::ensure!(value(*base), "{id} refers to missing value {base}"),
                ValueKind::Instruction(inst) => {
                    anyhow::ensure!(
                        function(inst.function) && block(inst.block),
                        "{id} is placed in missing {} or {}",
                        inst.function,
                        inst.block
                    );
                    for op in inst.kind.operands() {
                        anyhow::ensure!(value(op), "{id} reads missing value {op}");
                    }
                    for b in inst.kind.referenced_blocks() {
                        anyhow::ensure!(block(b), "{id} refers to missing block {b}");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> + '_ {
        self.functions
            .iter()
            .enumerate()
            .map(|(idx, f)| (FunctionId::from_usize(idx), f))
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.as_usize()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions()
            .find(|(_, f)| f.name.as_str() == name)
            .map(|(id, _)| id)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.as_usize()]
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.as_usize()]
    }

    /// All global variables, in declaration order.
    pub fn globals(&self) -> &[ValueId] {
        &self.globals
    }

    pub fn instruction(&self, id: ValueId) -> Option<&Instruction> {
        match &self.value(id).kind {
            ValueKind::Instruction(inst) => Some(inst),
            _ => None,
        }
    }

    /// The last instruction of the block.
    pub fn terminator(&self, block: BlockId) -> Option<&Instruction> {
        let last = *self.block(block).instructions.last()?;
        self.instruction(last)
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map_or_else(Vec::new, |t| t.kind.successors())
    }

    /// Returns the function if `value` is the address of a function.
    pub fn as_function(&self, value: ValueId) -> Option<FunctionId> {
        match self.value(value).kind {
            ValueKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_global_variable(&self, value: ValueId) -> bool {
        self.value(value).kind.is_global()
    }

    /// Name of a value, if it has one. Functions report their own name.
    pub fn value_name(&self, value: ValueId) -> Option<&str> {
        match &self.value(value).kind {
            ValueKind::Function(f) => Some(self.function(*f).name.as_str()),
            _ => self.value(value).name.as_ref().map(|n| n.as_str()),
        }
    }

    /// Follows casts and aliases back to the value they wrap.
    pub fn strip_pointer_casts(&self, value: ValueId) -> ValueId {
        self.strip(value, false)
    }

    /// Like [`Self::strip_pointer_casts`] but also looks through in-bounds
    /// address computations, yielding the base object.
    pub fn strip_in_bounds_offsets(&self, value: ValueId) -> ValueId {
        self.strip(value, true)
    }

    fn strip(&self, mut value: ValueId, in_bounds_offsets: bool) -> ValueId {
        // Bounded by the number of values, so malformed alias cycles terminate.
        for _ in 0..=self.values.len() {
            let next = match &self.value(value).kind {
                ValueKind::Alias { aliasee } => *aliasee,
                ValueKind::ConstantExpr(ConstantExpr::Cast { operand }) => *operand,
                ValueKind::ConstantExpr(ConstantExpr::GetElementPtr { base, in_bounds })
                    if in_bounds_offsets && *in_bounds =>
                {
                    *base
                }
                ValueKind::Instruction(Instruction {
                    kind: InstructionKind::Cast { operand },
                    ..
                }) => *operand,
                ValueKind::Instruction(Instruction {
                    kind:
                        InstructionKind::GetElementPtr {
                            base, in_bounds, ..
                        },
                    ..
                }) if in_bounds_offsets && *in_bounds => *base,
                _ => return value,
            };
            value = next;
        }
        value
    }
}
