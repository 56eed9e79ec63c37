//! Parallel-copy sequentialization.
//!
//! A parallel copy moves a set of registers "at once": every destination
//! receives the value its source held before any move happened. The moves
//! form a graph where each destination has exactly one source; trees are
//! emitted leaf first, and each remaining cycle is broken by saving one of
//! its registers in a spare register. The spare is the lowest register that
//! is neither read nor written by the copy and is free to clobber; when
//! there is none, `lr` is saved on the stack and borrowed.

use super::asm::Instr;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{Reg, RegBitSet, NUM_CORE_REGISTERS};

/// What it took to sequentialize one parallel copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Moves emitted, excluding the lr save and restore.
    pub moves: usize,
    /// Cycles broken through the spare register.
    pub cycles_broken: usize,
    /// Whether lr had to be borrowed as the spare.
    pub borrowed_lr: bool,
}

/// Append moves performing `copies` (source, destination) simultaneously.
/// `clobberable` lists registers that may serve as the spare when they are
/// not part of the copy.
pub fn sequentialize(
    copies: &[(Reg, Reg)],
    clobberable: RegBitSet,
    out: &mut Vec<Instr>,
) -> CompileResult<CopyOutcome> {
    let mut pred: [Option<Reg>; NUM_CORE_REGISTERS] = [None; NUM_CORE_REGISTERS];
    let mut loc: [Option<Reg>; NUM_CORE_REGISTERS] = [None; NUM_CORE_REGISTERS];
    let mut touched = RegBitSet::new();
    // Registers that must keep their current value
    let mut pinned = RegBitSet::new();
    let mut todo: Vec<Reg> = Vec::new();

    for &(src, dst) in copies {
        touched.set(src);
        touched.set(dst);
        let conflict = if src == dst {
            pinned.set(dst);
            pred[dst.index()].is_some()
        } else {
            pinned.contains(dst) || pred[dst.index()].is_some_and(|existing| existing != src)
        };
        if conflict {
            return Err(CompileError::ParallelCopyConflict {
                reg: dst.to_string(),
            });
        }
        if src == dst || pred[dst.index()].is_some() {
            continue;
        }
        loc[src.index()] = Some(src);
        pred[dst.index()] = Some(src);
        todo.push(dst);
    }
    // Highest register first so the stack pops in ascending order
    todo.sort_unstable_by(|a, b| b.cmp(a));

    let mut ready: Vec<Reg> = todo.iter().copied().filter(|d| loc[d.index()].is_none()).collect();
    let mut spare_pool = clobberable;
    spare_pool.subtract(&touched);
    let spare = spare_pool.first_at_or_above(Reg::R0);

    let mut done = [false; NUM_CORE_REGISTERS];
    let mut outcome = CopyOutcome::default();
    while !todo.is_empty() {
        while let Some(dst) = ready.pop() {
            let Some(src) = pred[dst.index()] else { continue };
            let Some(from) = loc[src.index()] else { continue };
            log::trace!("parallel copy: mov {}, {}", dst, from);
            out.push(Instr::mov(dst, from));
            outcome.moves += 1;
            done[dst.index()] = true;
            loc[src.index()] = Some(dst);
            if src == from && pred[src.index()].is_some() {
                ready.push(src);
            }
        }

        let Some(dst) = todo.pop() else { break };
        if done[dst.index()] {
            continue;
        }
        // Everything left is on a cycle: park dst's value and carry on
        let tmp = match spare {
            Some(reg) => reg,
            None => {
                if !outcome.borrowed_lr {
                    out.push(Instr::push(RegBitSet::from_regs([Reg::LR]))?);
                    outcome.borrowed_lr = true;
                }
                Reg::LR
            }
        };
        log::trace!("parallel copy: break cycle at {} through {}", dst, tmp);
        out.push(Instr::mov(tmp, dst));
        outcome.moves += 1;
        outcome.cycles_broken += 1;
        loc[dst.index()] = Some(tmp);
        ready.push(dst);
    }

    if outcome.borrowed_lr {
        out.push(Instr::pop(RegBitSet::from_regs([Reg::LR]))?);
    }
    Ok(outcome)
}
