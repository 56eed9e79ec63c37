//! Spilling under a bounded register budget.
//!
//! Each block simulates a working set W of values held in registers, after
//! Braun and Hack. Operands missing from W are reloaded, and when W would
//! exceed the budget (K minus the instruction's definitions, or K minus the
//! argument registers at a call) the values used furthest away are evicted.
//! A block's entry set keeps values in registers on every incoming edge, then
//! fills up with values in registers on some edges, closest use first. A first
//! dry run estimates every exit set so loop headers have something to go on.
//!
//! Eviction itself never stores anything. Every value that is later reloaded,
//! or that flows into a memory phi, is stored once right after its
//! definition, so its slot is valid on every path. Edges are then reconciled
//! with reloads at the end of each predecessor, and the values that gained
//! stores or reloads are handed to SSA repair.

use super::dominance::{DomFrontiers, DomTree};
use super::liveness::inst_uses;
use super::ssa_repair::repair_ssa;
use crate::core::config::BackendConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;
use crate::ir::{BlockId, Inst, Procedure, VarId, VarSet};
use bumpalo::collections::Vec as BumpVec;
use hashbrown::HashMap;

/// Per-block state of the spiller.
#[derive(Debug, Default)]
struct BlockInfo {
    /// Distance from the block entry to the next use of each variable.
    next_use_in: HashMap<VarId, usize>,
    /// Distance from the block exit to the next use of each variable.
    next_use_out: HashMap<VarId, usize>,
    /// Values in registers on entry, not counting register phis.
    w_entry: VarSet,
    /// Values in registers on exit.
    w_exit: VarSet,
}

/// Insert spills and reloads so that no point of `proc` needs more than
/// `config.num_registers` registers, then repair SSA form.
pub fn spill_procedure(
    proc: &mut Procedure,
    dom: &DomTree,
    frontiers: &DomFrontiers,
    config: &BackendConfig,
    session: &CompilationSession<'_>,
) -> CompileResult<()> {
    let arena = session.arena();
    let mut infos = BumpVec::with_capacity_in(proc.blocks.len(), arena);
    infos.extend((0..proc.blocks.len()).map(|_| BlockInfo::default()));

    let mut spiller = Spiller {
        dom,
        session,
        k: config.num_registers,
        arg_regs: config.num_arg_registers,
        def_block: Vec::new(),
        infos,
        spilled: VarSet::new(),
        reloaded: VarSet::new(),
        spills: 0,
        reloads: 0,
    };
    spiller.compute_def_blocks(proc)?;
    spiller.compute_next_use(proc);
    spiller.estimate_exit_sets(proc)?;
    spiller.spill_blocks(proc)?;
    spiller.couple_edges(proc)?;
    spiller.store_at_definitions(proc)?;

    // Stores and reloads both name the value they touch; repair renames all
    // of them, including values stored but never reloaded
    let mut touched = spiller.spilled.clone();
    touched.union_with(&spiller.reloaded);
    let mut phis = 0;
    for var in touched.iter().collect::<Vec<_>>() {
        phis += repair_ssa(proc, var, dom, frontiers);
    }
    session.record_phis_placed(phis);

    log::debug!(
        "spill: {} spilled {} and reloaded {} values ({} repair phis)",
        proc.name,
        spiller.spills,
        spiller.reloads,
        phis
    );
    Ok(())
}

struct Spiller<'a, 'arena> {
    dom: &'a DomTree,
    session: &'a CompilationSession<'arena>,
    k: usize,
    arg_regs: usize,
    def_block: Vec<Option<BlockId>>,
    infos: BumpVec<'arena, BlockInfo>,
    /// Values whose slot must hold them: reloaded ones and memory phi arguments.
    spilled: VarSet,
    /// Values that gained reload definitions.
    reloaded: VarSet,
    spills: usize,
    reloads: usize,
}

impl Spiller<'_, '_> {
    fn compute_def_blocks(&mut self, proc: &Procedure) -> CompileResult<()> {
        self.def_block = vec![None; proc.num_vars()];
        let entry = proc.entry();
        for &arg in &proc.args {
            self.def_block[arg.index()] = Some(entry);
        }
        for block in proc.block_ids() {
            for inst in &proc.block(block).insts {
                for &def in inst.defs() {
                    if self.def_block[def.index()].is_some() {
                        return Err(CompileError::MultipleDefinitions {
                            var: proc.var_name(def).to_string(),
                        });
                    }
                    self.def_block[def.index()] = Some(block);
                }
            }
        }
        Ok(())
    }

    fn compute_next_use(&mut self, proc: &Procedure) {
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &proc.postorder {
                let mut out = std::mem::take(&mut self.infos[block.index()].next_use_out);
                for succ in proc.block(block).succs() {
                    for (&v, &d) in &self.infos[succ.index()].next_use_in {
                        let slot = out.entry(v).or_insert(d);
                        if d < *slot {
                            *slot = d;
                        }
                    }
                }

                let len = proc.block(block).insts.len();
                let info = &mut self.infos[block.index()];
                let mut seen = VarSet::new();
                for i in 0..len {
                    for v in inst_uses(proc, block, i) {
                        if !seen.insert(v) {
                            continue;
                        }
                        if info.next_use_in.get(&v).map_or(true, |&d| i < d) {
                            info.next_use_in.insert(v, i);
                            changed = true;
                        }
                    }
                    for &d in proc.block(block).insts[i].defs() {
                        seen.insert(d);
                    }
                }
                for (&v, &d) in &out {
                    if seen.contains(v) {
                        continue;
                    }
                    let through = d + len;
                    if info.next_use_in.get(&v) != Some(&through) {
                        info.next_use_in.insert(v, through);
                        changed = true;
                    }
                }
                info.next_use_out = out;
            }
        }
    }

    /// Distance from instruction `from` of `block` to the next use of every
    /// variable used at or after it, within the block or beyond.
    fn next_use_distances(&self, proc: &Procedure, block: BlockId, from: usize) -> HashMap<VarId, usize> {
        let mut dist = HashMap::new();
        let len = proc.block(block).insts.len();
        for i in from..len {
            for v in inst_uses(proc, block, i) {
                dist.entry(v).or_insert(i - from);
            }
        }
        for (&v, &d) in &self.infos[block.index()].next_use_out {
            dist.entry(v).or_insert(len - from + d);
        }
        dist
    }

    fn reload_inst(&mut self, proc: &mut Procedure, var: VarId) -> CompileResult<Inst> {
        mark_needs_stack(proc, var)?;
        self.reloaded.insert(var);
        self.spilled.insert(var);
        self.reloads += 1;
        self.session.record_reload();
        Ok(Inst::Reload { dst: var })
    }

    /// Shrink `w` to at most `m` values, keeping those used soonest after
    /// position `at`. Evicted values are simply dropped; a later reload
    /// brings back whichever of them is still needed.
    fn limit(&self, proc: &Procedure, block: BlockId, w: &mut VarSet, at: usize, m: usize) {
        if w.len() <= m {
            return;
        }
        let dist = self.next_use_distances(proc, block, at);
        let mut sorted: Vec<VarId> = w.iter().collect();
        sorted.sort_by_key(|v| (dist.get(v).copied().unwrap_or(usize::MAX), *v));
        for &v in &sorted[m..] {
            if dist.contains_key(&v) {
                log::trace!("spill: evict {} before {} in {}", proc.var_name(v), at, proc.block_name(block));
            }
        }
        w.clear();
        for &v in &sorted[..m] {
            w.insert(v);
        }
    }

    /// Run the working-set simulation over the non-phi instructions of one
    /// block, inserting reloads unless `dry`.
    fn min_algorithm(
        &mut self,
        proc: &mut Procedure,
        block: BlockId,
        w: &mut VarSet,
        dry: bool,
    ) -> CompileResult<()> {
        let mut i = proc.block(block).phi_count();
        while i < proc.block(block).insts.len() {
            let inst = &proc.block(block).insts[i];
            let is_call = inst.is_call();
            let defs = inst.defs().to_vec();
            let mut uses = inst.uses();
            uses.dedup();

            let mut reload = Vec::new();
            for &v in &uses {
                if !w.contains(v) && !reload.contains(&v) {
                    reload.push(v);
                }
            }
            for &v in &reload {
                w.insert(v);
            }

            let budget = if is_call {
                self.k.saturating_sub(self.arg_regs)
            } else {
                self.k.saturating_sub(defs.len())
            };
            self.limit(proc, block, w, i, budget);
            if let Some(&lost) = uses.iter().find(|&&v| !w.contains(v)) {
                return Err(CompileError::RegistersExhausted {
                    var: proc.var_name(lost).to_string(),
                    block: proc.block_name(block).to_string(),
                });
            }

            for &d in &defs {
                w.insert(d);
            }

            if !dry {
                let mut reloads = Vec::with_capacity(reload.len());
                for &v in &reload {
                    log::trace!("spill: reload {} before {} in {}", proc.var_name(v), i, proc.block_name(block));
                    reloads.push(self.reload_inst(proc, v)?);
                }
                insert_at(proc, block, reloads, &mut i);
            }
            i += 1;
        }
        Ok(())
    }

    /// First pass: estimate every block's exit working set with empty
    /// entry sets, so loop headers have something to go on.
    fn estimate_exit_sets(&mut self, proc: &mut Procedure) -> CompileResult<()> {
        for block in proc.block_ids().collect::<Vec<_>>() {
            let mut w = self.initial_working_set(proc, block);
            // Assume every phi gets a register for now
            for phi in proc.block(block).phis() {
                w.insert(phi.dst);
            }
            let phi_count = proc.block(block).phi_count();
            self.limit(proc, block, &mut w, phi_count, self.k);
            self.min_algorithm(proc, block, &mut w, true)?;
            self.infos[block.index()].w_exit = w;
        }
        Ok(())
    }

    /// Register arguments are in registers when the procedure starts.
    fn initial_working_set(&self, proc: &Procedure, block: BlockId) -> VarSet {
        let mut w = VarSet::new();
        if block == proc.entry() {
            for &arg in proc.args.iter().take(self.arg_regs) {
                w.insert(arg);
            }
        }
        w
    }

    fn spill_blocks(&mut self, proc: &mut Procedure) -> CompileResult<()> {
        for block in proc.rpo.clone() {
            let register_phis = self.place_phis(proc, block)?;
            let room = self.k - register_phis.len();
            let phi_count = proc.block(block).phi_count();

            let initial = self.initial_working_set(proc, block);
            let mut w = self.entry_working_set(proc, block, initial, room);
            self.limit(proc, block, &mut w, phi_count, room);
            self.infos[block.index()].w_entry = w.clone();

            for phi in register_phis {
                w.insert(phi);
            }
            self.min_algorithm(proc, block, &mut w, false)?;
            self.infos[block.index()].w_exit = w;
        }
        Ok(())
    }

    /// Decide which phis of `block` live in memory: those with an argument
    /// not in a register at the end of its predecessor, plus any beyond K.
    /// Memory phi arguments must be stored. Returns the register phis.
    fn place_phis(&mut self, proc: &mut Procedure, block: BlockId) -> CompileResult<Vec<VarId>> {
        let preds = proc.block(block).preds.clone();
        let mut register_phis = Vec::new();
        for i in 0..proc.block(block).phi_count() {
            let Some(phi) = proc.block(block).insts[i].as_phi() else {
                continue;
            };
            let in_registers = phi.args.iter().zip(&preds).all(|(arg, pred)| {
                arg.is_some_and(|a| self.infos[pred.index()].w_exit.contains(a))
            });
            let memory = !in_registers || register_phis.len() == self.k;
            let (dst, args) = (phi.dst, phi.args.clone());
            if let Some(phi) = proc.block_mut(block).insts[i].as_phi_mut() {
                phi.memory = memory;
            }
            if memory {
                mark_needs_stack(proc, dst)?;
                for arg in args.into_iter().flatten() {
                    self.spilled.insert(arg);
                }
            } else {
                register_phis.push(dst);
            }
        }
        Ok(register_phis)
    }

    fn entry_working_set(&self, proc: &Procedure, block: BlockId, initial: VarSet, room: usize) -> VarSet {
        let preds = &proc.block(block).preds;
        let dist = self.next_use_distances(proc, block, proc.block(block).phi_count());
        let mut take = initial;
        let mut freq: HashMap<VarId, usize> = HashMap::new();
        let mut candidates = VarSet::new();
        for &pred in preds {
            for v in self.infos[pred.index()].w_exit.iter() {
                if take.contains(v) || !dist.contains_key(&v) {
                    continue;
                }
                let count = freq.entry(v).or_insert(0);
                *count += 1;
                candidates.insert(v);
                if *count == preds.len() {
                    candidates.remove(v);
                    take.insert(v);
                }
            }
        }

        let mut sorted: Vec<VarId> = candidates.iter().collect();
        sorted.sort_by_key(|v| (dist.get(v).copied().unwrap_or(usize::MAX), *v));
        let free = room.saturating_sub(take.len());
        for v in sorted.into_iter().take(free) {
            let Some(def_block) = self.def_block.get(v.index()).copied().flatten() else {
                continue;
            };
            if preds.iter().all(|&p| self.dom.dominates(def_block, p)) {
                take.insert(v);
            }
        }
        take
    }

    /// Reconcile each edge: reload at the end of the predecessor whatever
    /// the successor expects in a register but the predecessor left in
    /// memory. Edges are not critical, so a block with several predecessors
    /// is only ever entered through gotos.
    fn couple_edges(&mut self, proc: &mut Procedure) -> CompileResult<()> {
        for block in proc.block_ids().collect::<Vec<_>>() {
            let preds = proc.block(block).preds.clone();
            for (slot, &pred) in preds.iter().enumerate() {
                let pred_info = &self.infos[pred.index()];
                let mut need_reload = self.infos[block.index()].w_entry.clone();
                need_reload.subtract(&pred_info.w_exit);
                for phi in proc.block(block).phis() {
                    let Some(arg) = phi.args[slot] else { continue };
                    if !phi.memory && !pred_info.w_exit.contains(arg) {
                        // Exit set of a back edge differs from the estimate
                        need_reload.insert(arg);
                    }
                }
                if need_reload.is_empty() {
                    continue;
                }

                let mut fixups = Vec::new();
                for v in need_reload.iter().collect::<Vec<_>>() {
                    fixups.push(self.reload_inst(proc, v)?);
                }
                log::trace!(
                    "spill: {} reloads on edge {} -> {}",
                    fixups.len(),
                    proc.block_name(pred),
                    proc.block_name(block)
                );
                let insts = &mut proc.block_mut(pred).insts;
                let at = insts.len().saturating_sub(1);
                insts.splice(at..at, fixups);
            }
        }
        Ok(())
    }

    /// Store every value in `spilled` once, right after its definition. A
    /// register phi is stored after the phis of its block, a register
    /// argument on entry. Stack arguments and memory phis already live in
    /// their slot.
    fn store_at_definitions(&mut self, proc: &mut Procedure) -> CompileResult<()> {
        for var in self.spilled.iter().collect::<Vec<_>>() {
            let at = match proc.args.iter().position(|&a| a == var) {
                Some(index) if index < self.arg_regs => Some((proc.entry(), 0)),
                Some(_) => None,
                None => self.definition_point(proc, var)?,
            };
            let Some((block, at)) = at else { continue };
            mark_needs_stack(proc, var)?;
            proc.block_mut(block).insts.insert(at, Inst::Spill { var });
            self.spills += 1;
            self.session.record_spill();
            log::trace!("spill: store {} at {} in {}", proc.var_name(var), at, proc.block_name(block));
        }
        Ok(())
    }

    /// Position just after the original definition of `var`, or `None` for
    /// a memory phi.
    fn definition_point(&self, proc: &Procedure, var: VarId) -> CompileResult<Option<(BlockId, usize)>> {
        let missing = || CompileError::InvariantViolated {
            reason: format!("spilled value {} has no definition", proc.var_name(var)),
        };
        let block = self.def_block.get(var.index()).copied().flatten().ok_or_else(missing)?;
        let insts = &proc.block(block).insts;
        let index = insts
            .iter()
            .position(|inst| !matches!(inst, Inst::Reload { .. }) && inst.defs().contains(&var))
            .ok_or_else(missing)?;
        Ok(match insts[index].as_phi() {
            Some(phi) if phi.memory => None,
            Some(_) => Some((block, proc.block(block).phi_count())),
            None => Some((block, index + 1)),
        })
    }
}

/// Insert `new` before position `*cursor`, leaving the cursor on the
/// instruction it pointed at.
fn insert_at(proc: &mut Procedure, block: BlockId, new: Vec<Inst>, cursor: &mut usize) {
    let at = *cursor;
    let count = new.len();
    proc.block_mut(block).insts.splice(at..at, new);
    *cursor += count;
}

fn mark_needs_stack(proc: &mut Procedure, var: VarId) -> CompileResult<()> {
    let web = proc.var(var).web.ok_or_else(|| CompileError::MissingPhiWeb {
        var: proc.var_name(var).to_string(),
    })?;
    proc.web_mut(web).need_stack = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_program;
    use crate::passes::cfg::build_cfg;
    use crate::passes::crit_edge::split_critical_edges;
    use crate::passes::liveness::Liveness;
    use crate::passes::phi_web::build_phi_webs;
    use crate::passes::ssa::construct_ssa;
    use bumpalo::Bump;

    fn prepare(text: &str, session: &CompilationSession<'_>) -> (Procedure, DomTree, DomFrontiers) {
        let mut program = parse_program(text).unwrap();
        let mut proc = program.procedures.remove(0);
        build_cfg(&mut proc).unwrap();
        let mut dom = DomTree::compute(&proc).unwrap();
        let mut df = DomFrontiers::compute(&proc, &dom);
        construct_ssa(&mut proc, &dom, &df, session).unwrap();
        if split_critical_edges(&mut proc, session).unwrap() {
            dom = DomTree::compute(&proc).unwrap();
            df = DomFrontiers::compute(&proc, &dom);
        }
        build_phi_webs(&mut proc);
        (proc, dom, df)
    }

    fn config(k: usize) -> BackendConfig {
        BackendConfig {
            num_registers: k,
            ..BackendConfig::default()
        }
    }

    fn spilled(text: &str, k: usize) -> (Procedure, usize, usize) {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (mut proc, dom, df) = prepare(text, &session);
        spill_procedure(&mut proc, &dom, &df, &config(k), &session).unwrap();
        let stats = session.stats();
        (proc, stats.spills_inserted, stats.reloads_inserted)
    }

    fn max_pressure(proc: &Procedure) -> usize {
        let live = Liveness::compute(proc);
        proc.block_ids()
            .flat_map(|b| live.live_before_each(proc, b))
            .map(|(_, set)| set.len())
            .max()
            .unwrap_or(0)
    }

    /// Six values live at once, all summed at the end.
    const WIDE: &str = "Int f(Int a) {\n  Int b;\n  Int c;\n  Int d;\n  Int e;\n  Int g;\n  Int s;\n\
                        b = a + 1;\n  c = a + 2;\n  d = a + 3;\n  e = a + 4;\n  g = a + 5;\n\
                        s = a + b;\n  s = s + c;\n  s = s + d;\n  s = s + e;\n  s = s + g;\n  return s;\n}\n";

    #[test]
    fn test_no_spills_when_registers_suffice() {
        let (proc, spills, reloads) = spilled(WIDE, 13);
        assert_eq!((spills, reloads), (0, 0));
        assert!(proc.webs.iter().all(|w| !w.need_stack));
    }

    #[test]
    fn test_pressure_bounded_after_spilling() {
        let (proc, spills, reloads) = spilled(WIDE, 4);
        assert!(spills > 0);
        assert!(reloads > 0);
        assert!(max_pressure(&proc) <= 4, "pressure {}", max_pressure(&proc));
        assert!(proc.webs.iter().any(|w| w.need_stack));

        // Every reload reads a web that has a slot
        for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
            if let Inst::Reload { dst } = inst {
                let web = proc.var(*dst).web.unwrap();
                assert!(proc.web(web).need_stack);
            }
        }
    }

    #[test]
    fn test_single_definitions_survive_spilling() {
        let (proc, _, _) = spilled(WIDE, 4);
        let mut seen = VarSet::new();
        for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
            for &d in inst.defs() {
                assert!(seen.insert(d), "{} defined twice", proc.var_name(d));
            }
        }
    }

    /// Loop carrying five values plus the bound.
    const LOOP: &str = "Int f(Int n) {\n  Int i;\n  Int s;\n  Int t;\n  Int u;\n  i = 0;\n  s = 0;\n  t = n + 1;\n  u = n + 2;\n\
                        Head:\n  if (i >= n) goto Exit;\n  s = s + i;\n  s = s + t;\n  s = s + u;\n  i = i + 1;\n  goto Head;\n\
                        Exit:\n  return s;\n}\n";

    /// Some store into `web` exists, or the web holds a stack argument.
    fn web_is_stored(proc: &Procedure, web: crate::ir::WebId) -> bool {
        let stored = proc.blocks.iter().flat_map(|b| &b.insts).any(|inst| match inst {
            Inst::Spill { var } => proc.var(*var).web == Some(web),
            _ => false,
        });
        stored
            || proc
                .args
                .iter()
                .skip(BackendConfig::default().num_arg_registers)
                .any(|&a| proc.var(a).web == Some(web))
    }

    #[test]
    fn test_loop_values_spilled_consistently() {
        let (proc, _, _) = spilled(LOOP, 4);
        assert!(max_pressure(&proc) <= 4, "pressure {}", max_pressure(&proc));
        for block in &proc.blocks {
            for phi in block.phis() {
                assert_eq!(phi.args.len(), block.preds.len());
            }
        }
    }

    #[test]
    fn test_every_reload_reads_a_stored_slot() {
        for (text, k) in [(WIDE, 4), (LOOP, 4), (LOOP, 3)] {
            let (proc, _, reloads) = spilled(text, k);
            assert!(reloads > 0);
            for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
                if let Inst::Reload { dst } = inst {
                    let web = proc.var(*dst).web.unwrap();
                    assert!(web_is_stored(&proc, web), "{} reloaded from an unwritten slot", proc.var_name(*dst));
                }
            }
        }
    }

    #[test]
    fn test_memory_phi_arguments_are_stored() {
        let (proc, _, _) = spilled(LOOP, 3);
        for block in &proc.blocks {
            for phi in block.phis().filter(|p| p.memory) {
                let web = proc.var(phi.dst).web.unwrap();
                assert!(proc.web(web).need_stack);
                for arg in phi.args.iter().flatten() {
                    assert_eq!(proc.var(*arg).web, Some(web));
                }
                assert!(web_is_stored(&proc, web));
            }
        }
    }

    #[test]
    fn test_stores_follow_definitions() {
        let (proc, spills, _) = spilled(LOOP, 3);
        assert!(spills > 0);
        for block in &proc.blocks {
            for (j, inst) in block.insts.iter().enumerate() {
                let Inst::Spill { var } = inst else { continue };
                if proc.args.contains(var) {
                    continue;
                }
                let after_phis = block.phis().any(|p| p.dst == *var)
                    && block.insts[block.phi_count()..j].iter().all(|i| matches!(i, Inst::Spill { .. }));
                let after_def = j > 0
                    && !matches!(block.insts[j - 1], Inst::Reload { .. })
                    && block.insts[j - 1].defs().contains(var);
                assert!(after_phis || after_def, "store of {} away from its definition", proc.var_name(*var));
            }
        }
        // One store per value
        let mut stored = VarSet::new();
        for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
            if let Inst::Spill { var } = inst {
                assert!(stored.insert(*var));
            }
        }
    }

    #[test]
    fn test_values_across_call_fit_call_budget() {
        let text = "Int f(Int a) {\n  Int b;\n  Int c;\n  Int d;\n  Int e;\n  Int g;\n  Int x;\n  Int s;\n\
                    b = a + 1;\n  c = a + 2;\n  d = a + 3;\n  e = a + 4;\n  g = a + 5;\n  x = h(b);\n\
                    s = a + b;\n  s = s + c;\n  s = s + d;\n  s = s + e;\n  s = s + g;\n  s = s + x;\n  return s;\n}\n";
        let config = config(8);
        let (proc, spills, _) = spilled(text, config.num_registers);
        assert!(spills > 0);
        let live = Liveness::compute(&proc);
        let mut calls = 0;
        for block in proc.block_ids() {
            for (i, set) in live.live_before_each(&proc, block) {
                if proc.block(block).insts[i].is_call() {
                    calls += 1;
                    assert!(set.len() <= config.call_budget(), "{} live at the call", set.len());
                }
            }
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_stored_values_are_renamed_by_repair() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (mut proc, dom, df) = prepare(LOOP, &session);
        let before = proc.num_vars();
        spill_procedure(&mut proc, &dom, &df, &config(3), &session).unwrap();
        let mut stores = 0;
        for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
            let Inst::Spill { var } = inst else { continue };
            stores += 1;
            if !proc.args.contains(var) {
                assert!(var.index() >= before, "{} kept its pre-spill name", proc.var_name(*var));
                assert!(proc.locals.contains(var));
            }
        }
        assert!(stores > 0);
    }
}
