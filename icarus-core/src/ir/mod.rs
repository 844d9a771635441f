//! SSA-style intermediate representation (§3.4) and the tools that
//! produce/consume it: the builder (§4.7) and the compile-time evaluator
//! (§4.7, §4.7.1).
//!
//! The full opcode list in the original source is generated from an
//! x-macro enumerating one tag per primitive type per operation (`op.
//! xmacro.h`); this workspace models the operationally distinct opcodes
//! directly as enum variants carrying their operand type, rather than
//! generating one variant per primitive — Rust's type system doesn't need
//! the macro trick C++ does to keep that table in sync, so `Operand`
//! alone carries which primitive a value is.

pub mod builder;
pub mod evaluator;

use crate::types::TypeHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubroutineId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Reg(Reg),
    ImmI64(i64),
    ImmF64(f64),
    ImmBool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One SSA command. Each opcode declares its input operand slots, an
/// optional result register, and (implicitly, via the register's entry in
/// `Subroutine::registers`) its static type.
#[derive(Debug, Clone)]
pub enum Cmd {
    Arith { op: ArithOp, dst: Reg, lhs: Operand, rhs: Operand },
    Cmp { op: CmpOp, dst: Reg, lhs: Operand, rhs: Operand },
    And { dst: Reg, lhs: Operand, rhs: Operand },
    Or { dst: Reg, lhs: Operand, rhs: Operand },
    Not { dst: Reg, src: Operand },
    Negate { dst: Reg, src: Operand },
    /// Stack-allocates `size` bytes, `dst` receives the address.
    Alloca { dst: Reg, size: u32 },
    Load { dst: Reg, addr: Operand, size: u32 },
    Store { addr: Operand, value: Operand, size: u32 },
    /// `addr + offset`, used for `Field`/`Index` lvalues.
    PtrIncr { dst: Reg, addr: Operand, offset: Operand },
    Call { dst: Option<Reg>, callee: SubroutineId, args: Vec<Operand> },
    Phi { dst: Reg, incoming: Vec<(BlockId, Operand)> },
}

#[derive(Debug, Clone)]
pub enum Exit {
    Uncond(BlockId),
    Cond { cond: Operand, if_true: BlockId, if_false: BlockId },
    Return(Vec<Operand>),
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub cmds: Vec<Cmd>,
    pub exit: Exit,
}

#[derive(Debug, Clone)]
pub struct RegInfo {
    pub frame_offset: u32,
    pub byte_size: u32,
    pub ty: Option<TypeHandle>,
}

/// A function-or-jump-or-scope body (§3.4). Registers are SSA and locally
/// scoped to the subroutine they belong to.
#[derive(Debug)]
pub struct Subroutine {
    pub id: SubroutineId,
    pub blocks: Vec<BasicBlock>,
    pub registers: Vec<RegInfo>,
    /// First register index reserved for incoming parameters.
    pub param_reg_prefix: u32,
    /// First register index reserved for named out-parameters.
    pub out_param_reg_prefix: u32,
}

impl Subroutine {
    pub fn new(id: SubroutineId) -> Self {
        Subroutine { id, blocks: Vec::new(), registers: Vec::new(), param_reg_prefix: 0, out_param_reg_prefix: 0 }
    }

    pub fn alloc_reg(&mut self, byte_size: u32, ty: Option<TypeHandle>) -> Reg {
        let index = self.registers.len() as u32;
        let frame_offset = self.registers.iter().map(|r| r.byte_size).sum();
        self.registers.push(RegInfo { frame_offset, byte_size, ty });
        Reg(index)
    }

    pub fn alloc_block(&mut self, exit: Exit) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock { cmds: Vec::new(), exit });
        id
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }
}

/// A compiled module's subroutines, owned by the `CompiledModule` they
/// belong to (§5 "Resource discipline").
#[derive(Debug, Default)]
pub struct Module {
    pub subroutines: Vec<Subroutine>,
}

impl Module {
    pub fn push(&mut self, subroutine: Subroutine) -> SubroutineId {
        let id = subroutine.id;
        self.subroutines.push(subroutine);
        id
    }

    pub fn get(&self, id: SubroutineId) -> &Subroutine {
        &self.subroutines[id.0 as usize]
    }
}
