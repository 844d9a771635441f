//! IR Builder (§4.7): lowers verified expressions to `Cmd` sequences.
//!
//! Lowering itself is syntax-directed over the verified AST and needs the
//! verifier's `QualType`s to know which opcode a given `Binop` lowers to
//! (e.g. `+` on `F64` vs `+` on `I64`); this module supplies the
//! mechanical part — block/register allocation and the control-flow
//! skeletons every `if`/`while`/call lowers through — and leaves "which
//! `Cmd` a given verified node produces" to the caller driving it
//! (`verify`/`compile`), which has that type information in hand.

use crate::ir::{ArithOp, BlockId, Cmd, CmpOp, Exit, Operand, Reg, Subroutine};
use crate::types::TypeHandle;

pub struct Builder<'sub> {
    subroutine: &'sub mut Subroutine,
    current: BlockId,
}

impl<'sub> Builder<'sub> {
    /// Starts building into `subroutine`, with one entry block whose exit
    /// is a placeholder `Return([])` until [`Builder::set_exit`] replaces
    /// it.
    pub fn new(subroutine: &'sub mut Subroutine) -> Self {
        let entry = subroutine.alloc_block(Exit::Return(vec![]));
        Builder { subroutine, current: entry }
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn new_block(&mut self) -> BlockId {
        self.subroutine.alloc_block(Exit::Return(vec![]))
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn set_exit(&mut self, block: BlockId, exit: Exit) {
        self.subroutine.block_mut(block).exit = exit;
    }

    pub fn push(&mut self, cmd: Cmd) {
        self.subroutine.block_mut(self.current).cmds.push(cmd);
    }

    pub fn alloc_reg(&mut self, byte_size: u32, ty: Option<TypeHandle>) -> Reg {
        self.subroutine.alloc_reg(byte_size, ty)
    }

    pub fn emit_arith(&mut self, op: ArithOp, lhs: Operand, rhs: Operand, byte_size: u32, ty: Option<TypeHandle>) -> Reg {
        let dst = self.alloc_reg(byte_size, ty);
        self.push(Cmd::Arith { op, dst, lhs, rhs });
        dst
    }

    pub fn emit_cmp(&mut self, op: CmpOp, lhs: Operand, rhs: Operand) -> Reg {
        let dst = self.alloc_reg(1, None);
        self.push(Cmd::Cmp { op, dst, lhs, rhs });
        dst
    }

    pub fn emit_negate(&mut self, src: Operand, byte_size: u32, ty: Option<TypeHandle>) -> Reg {
        let dst = self.alloc_reg(byte_size, ty);
        self.push(Cmd::Negate { dst, src });
        dst
    }

    pub fn emit_alloca(&mut self, size: u32, ty: Option<TypeHandle>) -> Reg {
        let dst = self.alloc_reg(size, ty);
        self.push(Cmd::Alloca { dst, size });
        dst
    }

    /// `if` lowering (§4.7): `CondJump` + two blocks + a landing block.
    /// `lower_then`/`lower_else` each receive the builder positioned at
    /// their block and must leave it ready to fall through (its exit is
    /// overwritten to jump to the landing block afterward).
    pub fn lower_if(
        &mut self,
        cond: Operand,
        lower_then: impl FnOnce(&mut Self),
        lower_else: Option<impl FnOnce(&mut Self)>,
    ) -> BlockId {
        let then_block = self.new_block();
        let else_block = self.new_block();
        let landing = self.new_block();

        self.set_exit(self.current, Exit::Cond { cond, if_true: then_block, if_false: else_block });

        self.switch_to(then_block);
        lower_then(self);
        self.set_exit(then_block, Exit::Uncond(landing));

        self.switch_to(else_block);
        if let Some(lower_else) = lower_else {
            lower_else(self);
        }
        self.set_exit(else_block, Exit::Uncond(landing));

        self.switch_to(landing);
        landing
    }

    /// `while` lowering (§4.7): header/body/landing. `cond` is
    /// re-evaluated by `lower_cond` each time the header runs.
    pub fn lower_while(&mut self, mut lower_cond: impl FnMut(&mut Self) -> Operand, lower_body: impl FnOnce(&mut Self)) -> BlockId {
        let header = self.new_block();
        let body = self.new_block();
        let landing = self.new_block();

        self.set_exit(self.current, Exit::Uncond(header));

        self.switch_to(header);
        let cond = lower_cond(self);
        self.set_exit(header, Exit::Cond { cond, if_true: body, if_false: landing });

        self.switch_to(body);
        lower_body(self);
        self.set_exit(body, Exit::Uncond(header));

        self.switch_to(landing);
        landing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SubroutineId;

    #[test]
    fn if_lowering_produces_four_blocks_joined_at_a_landing_block() {
        let mut sub = Subroutine::new(SubroutineId(0));
        let mut builder = Builder::new(&mut sub);
        let landing = builder.lower_if(Operand::ImmBool(true), |_| {}, None::<fn(&mut Builder)>);
        assert_eq!(landing, BlockId(3));
        assert_eq!(sub.blocks.len(), 4);
    }

    #[test]
    fn while_lowering_loops_body_back_to_header() {
        let mut sub = Subroutine::new(SubroutineId(0));
        let mut builder = Builder::new(&mut sub);
        builder.lower_while(|_| Operand::ImmBool(false), |_| {});
        // entry -> header -> body -> landing
        assert_eq!(sub.blocks.len(), 4);
        match &sub.blocks[2].exit {
            Exit::Uncond(BlockId(1)) => {}
            other => panic!("body must jump back to header, got {other:?}"),
        }
    }
}
