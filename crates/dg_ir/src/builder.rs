//! Incremental construction of a [`Module`].
//!
//! This is the interface front-ends lower into. Blocks are created before
//! their instructions so that branches may refer forward.

use internment::Intern;

use crate::{
    ir::{
        Block, BlockId, ConstantExpr, Function, FunctionId, Instruction, InstructionKind, Module,
        Value, ValueId, ValueKind,
    },
    ty::Type,
};

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    fn add_value(&mut self, kind: ValueKind, ty: Type, name: Option<&str>) -> ValueId {
        let id = ValueId::from_usize(self.module.values.len());
        self.module.values.push(Value {
            kind,
            ty,
            name: name.map(|n| Intern::new(n.to_owned())),
        });
        id
    }

    pub fn add_global(&mut self, name: &str, ty: Type) -> ValueId {
        let id = self.add_value(ValueKind::Global, ty, Some(name));
        self.module.globals.push(id);
        id
    }

    pub fn add_constant(&mut self, ty: Type) -> ValueId {
        self.add_value(ValueKind::Constant, ty, None)
    }

    pub fn add_constant_expr(&mut self, expr: ConstantExpr, ty: Type) -> ValueId {
        self.add_value(ValueKind::ConstantExpr(expr), ty, None)
    }

    pub fn add_alias(&mut self, name: &str, aliasee: ValueId) -> ValueId {
        let ty = self.module.value(aliasee).ty.clone();
        self.add_value(ValueKind::Alias { aliasee }, ty, Some(name))
    }

    /// Declares a function together with its argument values. It stays a
    /// declaration until a block is added to it.
    pub fn add_function(
        &mut self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        var_arg: bool,
    ) -> FunctionId {
        let id = FunctionId::from_usize(self.module.functions.len());
        let value = self.add_value(ValueKind::Function(id), Type::ptr(), Some(name));
        let params = params
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.add_value(
                    ValueKind::Argument {
                        function: id,
                        index: index as u32,
                    },
                    ty,
                    None,
                )
            })
            .collect();
        self.module.functions.push(Function {
            name: Intern::new(name.to_owned()),
            value,
            params,
            var_arg,
            return_type,
            blocks: vec![],
        });
        id
    }

    pub fn function_value(&self, function: FunctionId) -> ValueId {
        self.module.function(function).value
    }

    pub fn param(&self, function: FunctionId, index: usize) -> ValueId {
        self.module.function(function).params[index]
    }

    pub fn add_block(&mut self, function: FunctionId, name: &str) -> BlockId {
        let id = BlockId::from_usize(self.module.blocks.len());
        self.module.blocks.push(Block {
            function,
            name: Some(Intern::new(name.to_owned())),
            instructions: vec![],
        });
        self.module.functions[function.as_usize()].blocks.push(id);
        id
    }

    /// Appends an instruction to `block`.
    pub fn push(&mut self, block: BlockId, kind: InstructionKind, ty: Type) -> ValueId {
        let function = self.module.block(block).function;
        let id = self.add_value(
            ValueKind::Instruction(Instruction {
                function,
                block,
                kind,
            }),
            ty,
            None,
        );
        self.module.blocks[block.as_usize()].instructions.push(id);
        id
    }

    /// Adds an incoming edge to a phi that was pushed before its operands
    /// were known.
    ///
    /// # Panics
    ///
    /// If `phi` is not a phi instruction.
    pub fn add_phi_incoming(&mut self, phi: ValueId, value: ValueId, block: BlockId) {
        match &mut self.module.values[phi.as_usize()].kind {
            ValueKind::Instruction(Instruction {
                kind: InstructionKind::Phi { incoming },
                ..
            }) => incoming.push((value, block)),
            other => panic!("{phi} is not a phi node: {other:?}"),
        }
    }

    pub fn finish(self) -> Module {
        self.module
    }
}
