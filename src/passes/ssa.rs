// This module converts a procedure into SSA form. Phi placement follows the classic
// dominance-frontier scheme restricted to "global" variables (those read in some block before
// being written there): for each such variable, starting from the blocks that define it, a phi
// is inserted at the head of every frontier block exactly once, and a block receiving a phi
// joins the worklist so its own frontier propagates. Renaming walks the dominator tree in
// preorder without an explicit definition stack. Each original variable keeps a reaching
// definition pointer, and before every use the pointer is walked back through the chain of
// earlier definitions until it reaches one whose defining block dominates the current block.
// Every definition mints a fresh variable `name_N`. After a block's own instructions, the phis of
// its successors take the reaching definition as seen at the end of the block; when none
// exists the argument stays `None` so the gap is visible to verification instead of being
// papered over. Procedure arguments are their own initial definitions at the entry; locals
// start undefined. A use with no reaching definition at all mints a fresh variable in place.
// The chain walk may revisit long chains after many redefinitions; its cost is bounded by the
// dominator-tree depth per step and is left as is.

use super::dominance::{DomFrontiers, DomTree};
use crate::core::error::CompileResult;
use crate::core::session::CompilationSession;
use crate::ir::{BlockId, Inst, Phi, Procedure, VarId, VarSet};

/// Place phis and rename every variable into SSA form.
pub fn construct_ssa(
    proc: &mut Procedure,
    dom: &DomTree,
    frontiers: &DomFrontiers,
    session: &CompilationSession,
) -> CompileResult<()> {
    let phis = place_phis(proc, frontiers);
    Renamer::new(proc, dom).run(proc);
    session.record_phis_placed(phis);
    log::debug!("ssa: {} placed {} phis, {} locals after renaming", proc.name, phis, proc.locals.len());
    Ok(())
}

/// Variables read in some block before any write to them in that block.
fn global_vars(proc: &Procedure) -> VarSet {
    let mut globals = VarSet::with_capacity(proc.num_vars());
    for block in &proc.blocks {
        let mut killed = VarSet::new();
        for inst in &block.insts {
            for v in inst.uses() {
                if !killed.contains(v) {
                    globals.insert(v);
                }
            }
            killed.extend(inst.defs().iter().copied());
        }
    }
    globals
}

fn place_phis(proc: &mut Procedure, frontiers: &DomFrontiers) -> usize {
    let globals = global_vars(proc);
    let candidates: Vec<VarId> = proc
        .args
        .iter()
        .chain(&proc.locals)
        .copied()
        .filter(|&v| globals.contains(v))
        .collect();

    let mut placed = 0;
    for var in candidates {
        placed += place_phis_for(proc, frontiers, var);
    }
    placed
}

fn place_phis_for(proc: &mut Procedure, frontiers: &DomFrontiers, var: VarId) -> usize {
    let num_blocks = proc.blocks.len();
    let defs: Vec<bool> = proc
        .blocks
        .iter()
        .map(|b| b.insts.iter().any(|i| i.defs().contains(&var)))
        .collect();

    let mut has_phi = vec![false; num_blocks];
    let mut queued = defs.clone();
    let mut worklist: Vec<BlockId> = (0..num_blocks).rev().filter(|&i| defs[i]).map(BlockId::new).collect();
    let mut placed = 0;

    while let Some(x) = worklist.pop() {
        for &y in frontiers.frontier(x) {
            if has_phi[y.index()] {
                continue;
            }
            let arity = proc.block(y).preds.len();
            proc.block_mut(y).insts.insert(
                0,
                Inst::Phi(Phi {
                    dst: var,
                    original: var,
                    args: vec![None; arity],
                    memory: false,
                }),
            );
            has_phi[y.index()] = true;
            placed += 1;
            if !queued[y.index()] {
                queued[y.index()] = true;
                worklist.push(y);
            }
        }
    }
    placed
}

struct Renamer<'d> {
    dom: &'d DomTree,
    reaching_def: Vec<Option<VarId>>,
    definition: Vec<Option<BlockId>>,
    new_locals: Vec<VarId>,
    local_num: usize,
}

impl<'d> Renamer<'d> {
    fn new(proc: &Procedure, dom: &'d DomTree) -> Self {
        let n = proc.num_vars();
        let mut renamer = Self {
            dom,
            reaching_def: vec![None; n],
            definition: vec![None; n],
            new_locals: Vec::new(),
            local_num: 0,
        };
        let entry = proc.entry();
        for &arg in &proc.args {
            // Arguments are defined on entry
            renamer.reaching_def[arg.index()] = Some(arg);
            renamer.definition[arg.index()] = Some(entry);
        }
        for &local in &proc.locals {
            renamer.definition[local.index()] = Some(entry);
        }
        renamer
    }

    fn run(mut self, proc: &mut Procedure) {
        let preorder = self.dom.preorder().to_vec();
        for block in preorder {
            let mut insts = std::mem::take(&mut proc.block_mut(block).insts);
            for inst in &mut insts {
                // For each variable read
                inst.for_each_use_mut(|v| *v = self.use_of(proc, *v, block));

                // For each variable defined
                for def in inst.defs_mut() {
                    let original = *def;
                    self.update_reaching_def(original, block);
                    let fresh = self.mint(proc, original, block);
                    self.reaching_def[fresh.index()] = self.reaching_def[original.index()];
                    self.reaching_def[original.index()] = Some(fresh);
                    *def = fresh;
                }
            }
            proc.block_mut(block).insts = insts;

            let (direct, cond) = (proc.block(block).direct, proc.block(block).cond);
            for succ in [direct, cond].into_iter().flatten() {
                self.fill_phis(proc, block, succ);
            }
        }
        proc.locals = self.new_locals;
    }

    fn mint(&mut self, proc: &mut Procedure, original: VarId, block: BlockId) -> VarId {
        let var = proc.var(original);
        let name = format!("{}_{}", var.name, self.local_num);
        let ty = var.ty.clone();
        self.local_num += 1;
        let fresh = proc.new_var(name, ty);
        self.new_locals.push(fresh);
        if self.definition.len() <= fresh.index() {
            self.definition.resize(fresh.index() + 1, None);
            self.reaching_def.resize(fresh.index() + 1, None);
        }
        self.definition[fresh.index()] = Some(block);
        fresh
    }

    fn use_of(&mut self, proc: &mut Procedure, var: VarId, block: BlockId) -> VarId {
        self.update_reaching_def(var, block);
        match self.reaching_def[var.index()] {
            Some(reach) => reach,
            None => {
                // Read before any definition: stands for the unassigned original
                let fresh = self.mint(proc, var, block);
                self.reaching_def[var.index()] = Some(fresh);
                fresh
            }
        }
    }

    /// Walk back to the nearest earlier definition that dominates `block`.
    fn update_reaching_def(&mut self, var: VarId, block: BlockId) {
        let mut r = self.reaching_def[var.index()];
        while let Some(def) = r {
            match self.definition[def.index()] {
                Some(def_block) if self.dom.dominates(def_block, block) => break,
                _ => r = self.reaching_def[def.index()],
            }
        }
        self.reaching_def[var.index()] = r;
    }

    fn fill_phis(&mut self, proc: &mut Procedure, pred: BlockId, succ: BlockId) {
        // A compare whose both edges reach `succ` appears twice among its preds
        let slots: Vec<usize> = proc
            .block(succ)
            .preds
            .iter()
            .enumerate()
            .filter(|(_, &p)| p == pred)
            .map(|(i, _)| i)
            .collect();
        let phi_count = proc.block(succ).phi_count();
        for i in 0..phi_count {
            let Some(original) = proc.block(succ).insts[i].as_phi().map(|p| p.original) else {
                continue;
            };
            self.update_reaching_def(original, pred);
            let Some(reach) = self.reaching_def[original.index()] else {
                continue;
            };
            if let Some(phi) = proc.block_mut(succ).insts[i].as_phi_mut() {
                for &slot in &slots {
                    phi.args[slot] = Some(reach);
                }
            }
        }
    }
}
