//! ARM calling convention and frame layout.
//!
//! Arguments go in r0..r3, then in the caller's outgoing area. Results come
//! back in r0 and calls clobber r0..r3 only. From sp upwards a frame
//! holds outgoing stack arguments, one slot per phi-web that needs one, and
//! the registers pushed by the prologue. Its size is rounded to keep sp
//! 8-byte aligned.

use super::asm::is_valid_operand2;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{Reg, RegBitSet};
use crate::ir::{Inst, Procedure, WebId};
use bumpalo::{collections::Vec as BumpVec, Bump};

/// Registers carrying the first four arguments.
pub const ARG_REGS: [Reg; 4] = [Reg::R0, Reg::R1, Reg::R2, Reg::R3];

/// Register holding a call's result.
pub const RESULT_REG: Reg = Reg::R0;

/// Scratch register for frame adjustments too large for an immediate.
pub const FRAME_SCRATCH: Reg = Reg::R4;

/// Registers a call may clobber.
pub fn caller_saved() -> RegBitSet {
    RegBitSet::from_regs(ARG_REGS)
}

/// Stack frame of one procedure.
#[derive(Debug)]
pub struct FrameLayout<'a> {
    /// Registers pushed by the prologue.
    pub callee_saved: RegBitSet,
    /// Words reserved for outgoing stack arguments.
    pub outgoing_words: usize,
    /// Total words of the frame, callee-saved registers included.
    pub total_words: usize,
    /// Bytes the prologue subtracts from sp after the push.
    pub stack_adjust: i32,
    /// Stack offset of each phi-web that owns a slot.
    pub web_slots: BumpVec<'a, (WebId, i32)>,
}

impl<'a> FrameLayout<'a> {
    /// Lay out the frame of a colored procedure.
    pub fn compute(proc: &Procedure, arena: &'a Bump) -> CompileResult<Self> {
        let mut callee_saved = RegBitSet::new();
        for &v in &proc.locals {
            if let Some(reg) = proc.var(v).reg {
                callee_saved.set(reg);
            }
        }
        callee_saved.subtract(&caller_saved());

        let mut stack_webs: BumpVec<'a, WebId> = BumpVec::new_in(arena);
        let mut max_stack_arg: Option<usize> = None;
        for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
            match inst {
                Inst::Spill { var } | Inst::Reload { dst: var } => {
                    let web = proc.var(*var).web.ok_or_else(|| CompileError::MissingPhiWeb {
                        var: proc.var_name(*var).to_string(),
                    })?;
                    if !stack_webs.contains(&web) {
                        stack_webs.push(web);
                    }
                }
                Inst::StackArg { index, .. } => {
                    max_stack_arg = Some(max_stack_arg.map_or(*index, |m| m.max(*index)));
                }
                Inst::Call { .. } => callee_saved.set(Reg::LR),
                _ => {}
            }
        }

        let outgoing_words = max_stack_arg.map_or(0, |m| m + 1);
        let mut frame = Self {
            callee_saved,
            outgoing_words,
            total_words: 0,
            stack_adjust: 0,
            web_slots: BumpVec::with_capacity_in(stack_webs.len(), arena),
        };
        frame.size(stack_webs.len());
        if !is_valid_operand2(frame.stack_adjust) {
            frame.callee_saved.set(FRAME_SCRATCH);
            frame.size(stack_webs.len());
        }

        let mut offset = (outgoing_words * 4) as i32;
        for &web in &stack_webs {
            frame.web_slots.push((web, offset));
            offset += 4;
        }
        // Our own stack arguments sit in the caller's outgoing area
        for (i, &arg) in proc.args.iter().enumerate().skip(ARG_REGS.len()) {
            let web = proc.var(arg).web.ok_or_else(|| CompileError::MissingPhiWeb {
                var: proc.var_name(arg).to_string(),
            })?;
            let slot = ((frame.total_words + i - ARG_REGS.len()) * 4) as i32;
            match frame.web_slots.iter_mut().find(|(w, _)| *w == web) {
                Some(entry) => entry.1 = slot,
                None => frame.web_slots.push((web, slot)),
            }
        }

        log::debug!(
            "frame: {} has {} words, {} stack webs, saves {} registers",
            proc.name,
            frame.total_words,
            stack_webs.len(),
            frame.callee_saved.count()
        );
        Ok(frame)
    }

    fn size(&mut self, stack_webs: usize) {
        let saved = self.callee_saved.count() as usize;
        let mut words = self.outgoing_words + stack_webs + saved;
        if words % 2 == 1 {
            words += 1;
        }
        self.total_words = words;
        self.stack_adjust = ((words - saved) * 4) as i32;
    }

    /// Stack offset of `web`'s slot.
    pub fn slot(&self, web: WebId) -> Option<i32> {
        self.web_slots.iter().find(|(w, _)| *w == web).map(|&(_, off)| off)
    }

    /// Does the prologue save lr?
    pub fn saves_lr(&self) -> bool {
        self.callee_saved.contains(Reg::LR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Callee, Rval, Type};

    fn leaf() -> Procedure {
        let mut proc = Procedure::new("f", Type::Int);
        let a = proc.add_arg("a", Type::Int);
        let x = proc.add_local("x", Type::Int);
        let web = proc.new_web();
        proc.var_mut(a).reg = Some(Reg::R0);
        proc.var_mut(a).web = Some(web);
        proc.var_mut(x).reg = Some(Reg::R5);
        proc.var_mut(x).web = Some(web);
        proc
    }

    #[test]
    fn test_leaf_frame() {
        let arena = Bump::new();
        let proc = leaf();
        let frame = FrameLayout::compute(&proc, &arena).unwrap();
        assert_eq!(frame.callee_saved.iter().collect::<Vec<_>>(), vec![Reg::R5]);
        assert!(!frame.saves_lr());
        // One saved register, padded to two words
        assert_eq!(frame.total_words, 2);
        assert_eq!(frame.stack_adjust, 4);
    }

    #[test]
    fn test_spilled_webs_and_outgoing_arguments() {
        let arena = Bump::new();
        let mut proc = leaf();
        let x = proc.locals[0];
        let tmp = proc.add_local("t", Type::Void);
        proc.var_mut(tmp).reg = Some(Reg::R0);
        proc.blocks[0].insts = vec![
            Inst::Spill { var: x },
            Inst::StackArg { var: x, index: 1 },
            Inst::Call {
                dst: Some(tmp),
                callee: Callee::Extern("g".into()),
                args: vec![Rval::Var(x)],
            },
        ];
        let frame = FrameLayout::compute(&proc, &arena).unwrap();
        assert!(frame.saves_lr());
        assert_eq!(frame.outgoing_words, 2);
        // The web's slot sits just above the outgoing area
        assert_eq!(frame.slot(proc.var(x).web.unwrap()), Some(8));
        // 2 outgoing + 1 web + r5 and lr = 5, rounded to 6
        assert_eq!(frame.total_words, 6);
        assert_eq!(frame.stack_adjust, 16);
    }

    #[test]
    fn test_stack_arguments_live_in_caller_frame() {
        let arena = Bump::new();
        let mut proc = Procedure::new("g", Type::Int);
        for i in 0..6 {
            let arg = proc.add_arg(format!("a{}", i), Type::Int);
            let web = proc.new_web();
            proc.var_mut(arg).web = Some(web);
            proc.var_mut(arg).reg = Reg::from_index(i).filter(|r| *r < Reg::R4);
        }
        let frame = FrameLayout::compute(&proc, &arena).unwrap();
        assert_eq!(frame.total_words, 0);
        let fifth = proc.var(proc.args[4]).web.unwrap();
        let sixth = proc.var(proc.args[5]).web.unwrap();
        assert_eq!(frame.slot(fifth), Some(0));
        assert_eq!(frame.slot(sixth), Some(4));
    }

    #[test]
    fn test_large_frame_borrows_scratch_register() {
        let arena = Bump::new();
        let mut proc = leaf();
        let x = proc.locals[0];
        proc.blocks[0].insts = vec![Inst::StackArg { var: x, index: 300 }];
        let frame = FrameLayout::compute(&proc, &arena).unwrap();
        assert!(frame.callee_saved.contains(FRAME_SCRATCH));
        assert!(!is_valid_operand2(frame.stack_adjust));
        assert_eq!(frame.stack_adjust, 301 * 4 + 4);
    }
}
