//! Interpreter over the IR (§4.7, §4.7.1): executes a `Subroutine` against
//! a register file and a growable byte stack. Used both to drive compile-
//! time constant folding and to run the instantiation-triggering bodies
//! of generic callees.

use thiserror::Error;

use crate::ir::{ArithOp, BlockId, Cmd, CmpOp, Exit, Module, Operand, Reg, Subroutine, SubroutineId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I64(i64),
    F64(f64),
    Bool(bool),
    /// Offset into the evaluator's byte stack.
    Addr(usize),
}

impl Value {
    fn as_i64(self) -> Result<i64, EvalError> {
        match self {
            Value::I64(v) => Ok(v),
            other => Err(EvalError::TypeMismatch(format!("{other:?}"))),
        }
    }

    fn as_f64(self) -> Result<f64, EvalError> {
        match self {
            Value::F64(v) => Ok(v),
            other => Err(EvalError::TypeMismatch(format!("{other:?}"))),
        }
    }

    fn as_bool(self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(v) => Ok(v),
            other => Err(EvalError::TypeMismatch(format!("{other:?}"))),
        }
    }

    fn as_addr(self) -> Result<usize, EvalError> {
        match self {
            Value::Addr(a) => Ok(a),
            other => Err(EvalError::TypeMismatch(format!("{other:?}"))),
        }
    }
}

/// Fatal-for-the-work-item errors (§7): "failure inside IR generation of
/// a thunk used for compile-time evaluation" — the evaluator cannot
/// recover a constant value once one of these happens, so the caller
/// abandons this evaluation rather than trying to continue.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("register {0:?} read before being written")]
    UninitializedRegister(Reg),
    #[error("division by zero")]
    DivisionByZero,
    #[error("value of unexpected kind: {0}")]
    TypeMismatch(String),
    #[error("out-of-bounds stack access at offset {0}")]
    OutOfBoundsAccess(u32),
    #[error("phi node reached from a block not listed among its incoming edges")]
    UnlistedPredecessor,
}

pub struct Evaluator<'m> {
    module: &'m Module,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m Module) -> Self {
        Evaluator { module }
    }

    /// Runs `subroutine` with `args` bound to its parameter registers,
    /// returning its `Return` operands' values. Calls recurse into nested
    /// frames; there is no shared mutable state between them beyond the
    /// module's subroutine table, which is read-only during evaluation.
    pub fn evaluate(&self, id: SubroutineId, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let subroutine = self.module.get(id);
        let mut frame = Frame::new(subroutine);
        for (i, arg) in args.into_iter().enumerate() {
            frame.regs[subroutine.param_reg_prefix as usize + i] = Some(arg);
        }

        let mut prev_block: Option<BlockId> = None;
        let mut current = BlockId(0);
        loop {
            let block = &subroutine.blocks[current.0 as usize];
            for cmd in &block.cmds {
                self.exec(cmd, &mut frame, prev_block)?;
            }
            match &block.exit {
                Exit::Uncond(next) => {
                    prev_block = Some(current);
                    current = *next;
                }
                Exit::Cond { cond, if_true, if_false } => {
                    let taken = frame.read(cond)?.as_bool()?;
                    prev_block = Some(current);
                    current = if taken { *if_true } else { *if_false };
                }
                Exit::Return(operands) => {
                    return operands.iter().map(|op| frame.read(op)).collect();
                }
            }
        }
    }

    fn exec(&self, cmd: &Cmd, frame: &mut Frame, prev_block: Option<BlockId>) -> Result<(), EvalError> {
        match cmd {
            Cmd::Arith { op, dst, lhs, rhs } => {
                let lhs = frame.read(lhs)?;
                let rhs = frame.read(rhs)?;
                let result = match (lhs, rhs) {
                    (Value::I64(a), Value::I64(b)) => Value::I64(eval_arith_i64(*op, a, b)?),
                    (Value::F64(a), Value::F64(b)) => Value::F64(eval_arith_f64(*op, a, b)),
                    _ => return Err(EvalError::TypeMismatch("arithmetic operand kind mismatch".into())),
                };
                frame.write(*dst, result);
            }
            Cmd::Cmp { op, dst, lhs, rhs } => {
                let lhs = frame.read(lhs)?;
                let rhs = frame.read(rhs)?;
                let result = match (lhs, rhs) {
                    (Value::I64(a), Value::I64(b)) => eval_cmp(*op, a.partial_cmp(&b)),
                    (Value::F64(a), Value::F64(b)) => eval_cmp(*op, a.partial_cmp(&b)),
                    (Value::Bool(a), Value::Bool(b)) => eval_cmp(*op, a.partial_cmp(&b)),
                    _ => return Err(EvalError::TypeMismatch("comparison operand kind mismatch".into())),
                };
                frame.write(*dst, Value::Bool(result));
            }
            Cmd::And { dst, lhs, rhs } => {
                let v = frame.read(lhs)?.as_bool()? && frame.read(rhs)?.as_bool()?;
                frame.write(*dst, Value::Bool(v));
            }
            Cmd::Or { dst, lhs, rhs } => {
                let v = frame.read(lhs)?.as_bool()? || frame.read(rhs)?.as_bool()?;
                frame.write(*dst, Value::Bool(v));
            }
            Cmd::Not { dst, src } => {
                let v = frame.read(src)?.as_bool()?;
                frame.write(*dst, Value::Bool(!v));
            }
            Cmd::Negate { dst, src } => {
                let result = match frame.read(src)? {
                    Value::I64(v) => Value::I64(-v),
                    Value::F64(v) => Value::F64(-v),
                    other => return Err(EvalError::TypeMismatch(format!("{other:?}"))),
                };
                frame.write(*dst, result);
            }
            Cmd::Alloca { dst, size } => {
                let addr = frame.stack.len();
                frame.stack.resize(addr + *size as usize, 0);
                frame.write(*dst, Value::Addr(addr));
            }
            Cmd::Store { addr, value, size } => {
                let addr = frame.read(addr)?.as_addr()?;
                let value = frame.read(value)?;
                frame.store(addr, *size, value)?;
            }
            Cmd::Load { dst, addr, size } => {
                let addr = frame.read(addr)?.as_addr()?;
                let value = frame.load(addr, *size)?;
                frame.write(*dst, value);
            }
            Cmd::PtrIncr { dst, addr, offset } => {
                let addr = frame.read(addr)?.as_addr()?;
                let offset = frame.read(offset)?.as_i64()?;
                frame.write(*dst, Value::Addr((addr as i64 + offset) as usize));
            }
            Cmd::Call { dst, callee, args } => {
                let args = args.iter().map(|a| frame.read(a)).collect::<Result<Vec<_>, _>>()?;
                let mut results = self.evaluate(*callee, args)?;
                if let Some(dst) = dst {
                    frame.write(*dst, results.drain(..).next().ok_or(EvalError::UninitializedRegister(*dst))?);
                }
            }
            Cmd::Phi { dst, incoming } => {
                let prev = prev_block.ok_or(EvalError::UnlistedPredecessor)?;
                let (_, operand) = incoming.iter().find(|(b, _)| *b == prev).ok_or(EvalError::UnlistedPredecessor)?;
                let value = frame.read(operand)?;
                frame.write(*dst, value);
            }
        }
        Ok(())
    }
}

fn eval_arith_i64(op: ArithOp, a: i64, b: i64) -> Result<i64, EvalError> {
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div => a.checked_div(b).ok_or(EvalError::DivisionByZero)?,
        ArithOp::Mod => a.checked_rem(b).ok_or(EvalError::DivisionByZero)?,
    })
}

fn eval_arith_f64(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => a % b,
    }
}

fn eval_cmp(op: CmpOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match (op, ordering) {
        (CmpOp::Eq, Some(Equal)) => true,
        (CmpOp::Ne, Some(o)) => o != Equal,
        (CmpOp::Lt, Some(Less)) => true,
        (CmpOp::Le, Some(Less | Equal)) => true,
        (CmpOp::Gt, Some(Greater)) => true,
        (CmpOp::Ge, Some(Greater | Equal)) => true,
        _ => false,
    }
}

struct Frame {
    regs: Vec<Option<Value>>,
    stack: Vec<u8>,
}

impl Frame {
    fn new(subroutine: &Subroutine) -> Self {
        Frame { regs: vec![None; subroutine.registers.len()], stack: Vec::new() }
    }

    fn read(&self, operand: &Operand) -> Result<Value, EvalError> {
        match operand {
            Operand::Reg(r) => self.regs[r.0 as usize].ok_or(EvalError::UninitializedRegister(*r)),
            Operand::ImmI64(v) => Ok(Value::I64(*v)),
            Operand::ImmF64(v) => Ok(Value::F64(*v)),
            Operand::ImmBool(v) => Ok(Value::Bool(*v)),
        }
    }

    fn write(&mut self, reg: Reg, value: Value) {
        self.regs[reg.0 as usize] = Some(value);
    }

    fn store(&mut self, addr: usize, size: u32, value: Value) -> Result<(), EvalError> {
        if addr + size as usize > self.stack.len() {
            return Err(EvalError::OutOfBoundsAccess(addr as u32));
        }
        let bytes = match (value, size) {
            (Value::I64(v), 8) => v.to_le_bytes().to_vec(),
            (Value::Bool(v), 1) => vec![v as u8],
            (Value::F64(v), 8) => v.to_le_bytes().to_vec(),
            _ => return Err(EvalError::TypeMismatch("store size/value kind mismatch".into())),
        };
        self.stack[addr..addr + size as usize].copy_from_slice(&bytes);
        Ok(())
    }

    fn load(&self, addr: usize, size: u32) -> Result<Value, EvalError> {
        if addr + size as usize > self.stack.len() {
            return Err(EvalError::OutOfBoundsAccess(addr as u32));
        }
        let bytes = &self.stack[addr..addr + size as usize];
        Ok(match size {
            8 => Value::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
            1 => Value::Bool(bytes[0] != 0),
            _ => return Err(EvalError::TypeMismatch(format!("unsupported load size {size}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;

    /// `X ::= 3 + 4` (§8 scenario 1): a single block computing `3 + 4` and
    /// returning it.
    #[test]
    fn evaluates_constant_addition() {
        let mut module = Module::default();
        let mut sub = Subroutine::new(SubroutineId(0));
        {
            let mut builder = Builder::new(&mut sub);
            let sum = builder.emit_arith(ArithOp::Add, Operand::ImmI64(3), Operand::ImmI64(4), 8, None);
            builder.set_exit(builder.current_block(), Exit::Return(vec![Operand::Reg(sum)]));
        }
        module.push(sub);

        let evaluator = Evaluator::new(&module);
        let result = evaluator.evaluate(SubroutineId(0), vec![]).unwrap();
        assert_eq!(result, vec![Value::I64(7)]);
    }

    /// `f ::= (n: i64) -> i64 { if n == 0 { return 1 } else { return n *
    /// f(n - 1) } }; F ::= f(5)` (§8 scenario 3): `F == 120`.
    #[test]
    fn evaluates_recursive_factorial() {
        let mut module = Module::default();
        let mut sub = Subroutine::new(SubroutineId(0));
        sub.param_reg_prefix = 0;
        let n = sub.alloc_reg(8, None);
        {
            let mut builder = Builder::new(&mut sub);
            let is_zero = builder.emit_cmp(CmpOp::Eq, Operand::Reg(n), Operand::ImmI64(0));
            builder.lower_if(
                Operand::Reg(is_zero),
                |b| {
                    b.set_exit(b.current_block(), Exit::Return(vec![Operand::ImmI64(1)]));
                },
                Some(|b: &mut Builder| {
                    let n_minus_1 = b.emit_arith(ArithOp::Sub, Operand::Reg(n), Operand::ImmI64(1), 8, None);
                    let recur_reg = b.alloc_reg(8, None);
                    b.push(Cmd::Call { dst: Some(recur_reg), callee: SubroutineId(0), args: vec![Operand::Reg(n_minus_1)] });
                    let product = b.emit_arith(ArithOp::Mul, Operand::Reg(n), Operand::Reg(recur_reg), 8, None);
                    b.set_exit(b.current_block(), Exit::Return(vec![Operand::Reg(product)]));
                }),
            );
        }
        module.push(sub);

        let evaluator = Evaluator::new(&module);
        let result = evaluator.evaluate(SubroutineId(0), vec![Value::I64(5)]).unwrap();
        assert_eq!(result, vec![Value::I64(120)]);
    }

    #[test]
    fn division_by_zero_is_a_fatal_evaluation_error() {
        let mut module = Module::default();
        let mut sub = Subroutine::new(SubroutineId(0));
        {
            let mut builder = Builder::new(&mut sub);
            let quotient = builder.emit_arith(ArithOp::Div, Operand::ImmI64(1), Operand::ImmI64(0), 8, None);
            builder.set_exit(builder.current_block(), Exit::Return(vec![Operand::Reg(quotient)]));
        }
        module.push(sub);

        let evaluator = Evaluator::new(&module);
        assert!(matches!(evaluator.evaluate(SubroutineId(0), vec![]), Err(EvalError::DivisionByZero)));
    }
}
