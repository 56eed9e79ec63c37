//! Target lowering.
//!
//! Rewrites instructions so that each maps onto ARM instructions one to one,
//! without touching control flow. Operands that the target can only take in a
//! register are materialised into fresh temporaries (`%lt{n}`), immediates
//! that fit the rotated encoding are steered into the second operand slot,
//! division becomes a runtime call, and call arguments past the fourth move to
//! the outgoing stack area. Instructions whose operands are all constant are
//! left alone; code generation folds them.
//!
//! Every temporary has exactly one definition, so SSA form is preserved.

use crate::arm::asm::is_valid_operand2;
use crate::ir::{BinaryOp, Callee, Inst, Procedure, Rval, Type, VarId};

/// Runtime routine for signed integer division.
pub const IDIV: &str = "__aeabi_idiv";

/// Call arguments passed in registers; the rest go on the stack.
pub const REGISTER_ARGS: usize = 4;

/// Lower every block of `proc`. Returns the number of temporaries introduced.
pub fn lower_procedure(proc: &mut Procedure) -> usize {
    let mut lowerer = Lowerer { temps: 0 };
    for block in proc.block_ids().collect::<Vec<_>>() {
        let insts = std::mem::take(&mut proc.block_mut(block).insts);
        let mut out = Vec::with_capacity(insts.len());
        for inst in insts {
            lowerer.lower(proc, &mut out, inst);
        }
        proc.block_mut(block).insts = out;
    }
    log::debug!("lower: {} introduced {} temporaries", proc.name, lowerer.temps);
    lowerer.temps
}

/// Constant that fits the second operand of a data-processing instruction.
fn fits_operand2(rval: &Rval) -> bool {
    match rval {
        Rval::Null | Rval::Bool(_) => true,
        Rval::Int(i) => is_valid_operand2(*i),
        Rval::Str(_) | Rval::Var(_) => false,
    }
}

struct Lowerer {
    temps: usize,
}

impl Lowerer {
    fn temp(&mut self, proc: &mut Procedure, ty: Type) -> VarId {
        let name = format!("%lt{}", self.temps);
        self.temps += 1;
        proc.add_local(name, ty)
    }

    /// Make sure `rval` is a variable, emitting an assignment if needed.
    fn materialize(&mut self, proc: &mut Procedure, out: &mut Vec<Inst>, rval: &mut Rval) -> VarId {
        if let Rval::Var(v) = rval {
            return *v;
        }
        let tmp = self.temp(proc, rval.ty(proc));
        let src = std::mem::replace(rval, Rval::Var(tmp));
        out.push(Inst::Assign { dst: tmp, src });
        tmp
    }

    fn lower(&mut self, proc: &mut Procedure, out: &mut Vec<Inst>, inst: Inst) {
        match inst {
            Inst::Cmp {
                mut op,
                mut a,
                mut b,
                target,
            } => {
                if !(a.is_constant() && b.is_constant()) {
                    if !fits_operand2(&b) && fits_operand2(&a) {
                        std::mem::swap(&mut a, &mut b);
                        op = op.flip();
                    }
                    self.materialize(proc, out, &mut a);
                    if !fits_operand2(&b) {
                        self.materialize(proc, out, &mut b);
                    }
                }
                out.push(Inst::Cmp { op, a, b, target });
            }
            Inst::Binary {
                dst,
                mut op,
                mut a,
                mut b,
            } => {
                let divides_by_zero = op == BinaryOp::Div && b.int_value() == Some(0);
                if a.is_constant() && b.is_constant() && !divides_by_zero {
                    out.push(Inst::Binary { dst, op, a, b });
                    return;
                }
                if op == BinaryOp::Div {
                    let call = Inst::Call {
                        dst: Some(dst),
                        callee: Callee::Extern(IDIV.to_string()),
                        args: vec![a, b],
                    };
                    self.lower(proc, out, call);
                    return;
                }
                let commutes = matches!(op, BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Rsb);
                if commutes && !fits_operand2(&b) && fits_operand2(&a) {
                    std::mem::swap(&mut a, &mut b);
                    op = match op {
                        BinaryOp::Minus => BinaryOp::Rsb,
                        BinaryOp::Rsb => BinaryOp::Minus,
                        other => other,
                    };
                }
                self.materialize(proc, out, &mut a);
                if op == BinaryOp::Mul || !fits_operand2(&b) {
                    self.materialize(proc, out, &mut b);
                }
                out.push(Inst::Binary { dst, op, a, b });
            }
            Inst::Unary { dst, op, mut a } => {
                if !a.is_constant() {
                    self.materialize(proc, out, &mut a);
                }
                out.push(Inst::Unary { dst, op, a });
            }
            Inst::FieldLoad { dst, mut base, field } => {
                // Immediate-offset ldr needs the base in a register
                self.materialize(proc, out, &mut base);
                out.push(Inst::FieldLoad { dst, base, field });
            }
            Inst::FieldStore { base, field, mut src } => {
                self.materialize(proc, out, &mut src);
                out.push(Inst::FieldStore { base, field, src });
            }
            Inst::Call {
                dst,
                callee,
                mut args,
            } => {
                while args.len() > REGISTER_ARGS {
                    let index = args.len() - 1;
                    let mut rval = args.remove(index);
                    let var = self.materialize(proc, out, &mut rval);
                    out.push(Inst::StackArg {
                        var,
                        index: index - REGISTER_ARGS,
                    });
                }
                for arg in &mut args {
                    self.materialize(proc, out, arg);
                }
                // Calls always define a value, even a discarded one
                let dst = match dst {
                    Some(dst) => dst,
                    None => self.temp(proc, Type::Void),
                };
                out.push(Inst::Call {
                    dst: Some(dst),
                    callee,
                    args,
                });
            }
            other => out.push(other),
        }
    }
}
