//! Local SSA repair for a single variable.
//!
//! Spilling and call targeting introduce extra definitions of a variable that
//! is already in SSA form. [`repair_ssa`] gives each definition its own fresh
//! variable and points every use at the definition that reaches it: scan the
//! block backwards from the use, and when the block has no definition either
//! place a phi (if the block lies in the iterated dominance frontier of the
//! definition blocks) or continue from the immediate dominator. The iterated
//! frontier is closed over all definitions before any use is rewritten, so a
//! use never resolves past a block that will later need a phi. Fresh variables
//! inherit the original's phi-web, and the original leaves the local list once
//! replaced.

use super::dominance::{DomFrontiers, DomTree};
use crate::ir::{BlockId, Inst, Phi, Procedure, VarId, VarSet};

/// Rebuild SSA form for `var` after it gained extra definitions.
/// Returns the number of phis placed.
pub fn repair_ssa(
    proc: &mut Procedure,
    var: VarId,
    dom: &DomTree,
    frontiers: &DomFrontiers,
) -> usize {
    let mut repair = Repair {
        var,
        dom,
        frontiers,
        new_defs: VarSet::new(),
        in_frontier: vec![false; proc.blocks.len()],
        next_index: 0,
        phis_placed: 0,
    };
    let def_blocks = repair.rename_definitions(proc);
    repair.close_frontier(&def_blocks);
    repair.rewrite_uses(proc);
    proc.remove_local(var);

    log::trace!(
        "ssa repair: {} in {} now has {} definitions ({} new phis)",
        proc.var_name(var),
        proc.name,
        repair.new_defs.len(),
        repair.phis_placed
    );
    repair.phis_placed
}

struct Repair<'a> {
    var: VarId,
    dom: &'a DomTree,
    frontiers: &'a DomFrontiers,
    /// Fresh variables standing for the definitions of `var`.
    new_defs: VarSet,
    /// Iterated dominance frontier of all definition blocks.
    in_frontier: Vec<bool>,
    next_index: usize,
    phis_placed: usize,
}

impl Repair<'_> {
    fn mint(&mut self, proc: &mut Procedure) -> VarId {
        let original = proc.var(self.var);
        let name = format!("{}_{}", original.name, self.next_index);
        let (ty, web) = (original.ty.clone(), original.web);
        self.next_index += 1;
        let fresh = proc.add_local(name, ty);
        proc.var_mut(fresh).web = web;
        self.new_defs.insert(fresh);
        fresh
    }

    /// Mark DF+ of `def_blocks`: every block reached by repeatedly taking
    /// frontiers, since a phi placed there is itself a definition.
    fn close_frontier(&mut self, def_blocks: &[BlockId]) {
        let mut worklist = def_blocks.to_vec();
        while let Some(block) = worklist.pop() {
            for &b in self.frontiers.frontier(block) {
                if !self.in_frontier[b.index()] {
                    self.in_frontier[b.index()] = true;
                    worklist.push(b);
                }
            }
        }
    }

    /// Give every definition a fresh variable; returns the defining blocks.
    fn rename_definitions(&mut self, proc: &mut Procedure) -> Vec<BlockId> {
        let mut def_blocks = Vec::new();
        // An argument is defined on entry
        if proc.args.contains(&self.var) {
            def_blocks.push(proc.entry());
        }
        for block in proc.block_ids().collect::<Vec<_>>() {
            let mut has_def = false;
            for j in 0..proc.block(block).insts.len() {
                let Some(pos) = proc.block(block).insts[j]
                    .defs()
                    .iter()
                    .position(|&d| d == self.var)
                else {
                    continue;
                };
                let fresh = self.mint(proc);
                proc.block_mut(block).insts[j].defs_mut()[pos] = fresh;
                has_def = true;
            }
            if has_def {
                def_blocks.push(block);
            }
        }
        def_blocks
    }

    fn rewrite_uses(&mut self, proc: &mut Procedure) {
        for block in proc.block_ids().collect::<Vec<_>>() {
            let mut j = 0;
            while j < proc.block(block).insts.len() {
                if let Some(phi) = proc.block(block).insts[j].as_phi() {
                    let stale: Vec<usize> = phi
                        .args
                        .iter()
                        .enumerate()
                        .filter(|(_, arg)| **arg == Some(self.var))
                        .map(|(i, _)| i)
                        .collect();
                    for i in stale {
                        let pred = proc.block(block).preds[i];
                        let before = proc.block(block).insts.len();
                        let reaching = self.find_def_at_end(proc, pred);
                        // Phis placed in this block shift the instruction down
                        j += proc.block(block).insts.len() - before;
                        if let Some(phi) = proc.block_mut(block).insts[j].as_phi_mut() {
                            phi.args[i] = Some(reaching);
                        }
                    }
                } else if proc.block(block).insts[j].uses().contains(&self.var) {
                    let before = proc.block(block).insts.len();
                    let reaching = self.find_def_before(proc, block, j);
                    j += proc.block(block).insts.len() - before;
                    let var = self.var;
                    proc.block_mut(block).insts[j].for_each_use_mut(|v| {
                        if *v == var {
                            *v = reaching;
                        }
                    });
                }
                j += 1;
            }
        }
    }

    fn find_def_at_end(&mut self, proc: &mut Procedure, block: BlockId) -> VarId {
        let end = proc.block(block).insts.len();
        self.find_def_before(proc, block, end)
    }

    /// Definition of the variable reaching the point just before instruction
    /// `end` of `block`.
    fn find_def_before(&mut self, proc: &mut Procedure, mut block: BlockId, mut end: usize) -> VarId {
        loop {
            let found = proc.block(block).insts[..end]
                .iter()
                .rev()
                .find_map(|inst| inst.defs().iter().copied().find(|&d| self.new_defs.contains(d)));
            if let Some(def) = found {
                return def;
            }

            if self.in_frontier[block.index()] {
                return self.place_phi(proc, block);
            }
            match self.dom.idom(block) {
                // Reached the entry: the value is the incoming argument
                None => return self.var,
                Some(idom) => {
                    block = idom;
                    end = proc.block(block).insts.len();
                }
            }
        }
    }

    fn place_phi(&mut self, proc: &mut Procedure, block: BlockId) -> VarId {
        let fresh = self.mint(proc);
        let arity = proc.block(block).preds.len();
        proc.block_mut(block).insts.insert(
            0,
            Inst::Phi(Phi {
                dst: fresh,
                original: self.var,
                args: vec![None; arity],
                memory: false,
            }),
        );
        self.phis_placed += 1;

        for i in 0..arity {
            let pred = proc.block(block).preds[i];
            let reaching = self.find_def_at_end(proc, pred);
            // The new phi stays at the head of the block
            let phi_index = proc
                .block(block)
                .insts
                .iter()
                .position(|inst| inst.as_phi().is_some_and(|p| p.dst == fresh))
                .unwrap_or(0);
            if let Some(phi) = proc.block_mut(block).insts[phi_index].as_phi_mut() {
                phi.args[i] = Some(reaching);
            }
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Rval, Type};
    use crate::passes::cfg::build_cfg;
    use crate::passes::dominance::{DomFrontiers, DomTree};
    use crate::ir::parser::parse_program;

    fn prepare(text: &str) -> (Procedure, DomTree, DomFrontiers) {
        let mut program = parse_program(text).unwrap();
        let mut proc = program.procedures.remove(0);
        build_cfg(&mut proc).unwrap();
        let dom = DomTree::compute(&proc).unwrap();
        let df = DomFrontiers::compute(&proc, &dom);
        (proc, dom, df)
    }

    fn count_defs(proc: &Procedure, var: VarId) -> usize {
        proc.blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| i.defs().contains(&var))
            .count()
    }

    #[test]
    fn test_second_definition_in_branch_places_phi() {
        // Already-SSA shape: v defined once in B1, redefined by hand in the then-block.
        let (mut proc, dom, df) = prepare(
            "Int f(Int x) {\n  Int v;\n  v = x + 1;\n  if (x > 0) goto Then;\n  goto Join;\n\
             Then:\n  x = 0;\nJoin:\n  return v;\n}\n",
        );
        let v = proc.locals[0];
        // B3 is the then-block: add `v = 7` in front of its terminator.
        let then_block = BlockId::new(3);
        let at = proc.block(then_block).insts.len() - 1;
        proc.block_mut(then_block).insts.insert(at, Inst::Assign { dst: v, src: Rval::Int(7) });

        let placed = repair_ssa(&mut proc, v, &dom, &df);
        assert_eq!(placed, 1);
        assert!(!proc.locals.contains(&v));
        assert_eq!(count_defs(&proc, v), 0);

        let join = BlockId::new(4);
        let phi = proc.block(join).phis().next().cloned().unwrap();
        assert_eq!(phi.args.len(), 2);
        assert!(phi.args.iter().all(Option::is_some));
        assert_ne!(phi.args[0], phi.args[1]);
        match proc.block(join).insts.last() {
            Some(Inst::Return { value: Some(Rval::Var(r)) }) => assert_eq!(*r, phi.dst),
            other => panic!("unexpected terminator {:?}", other),
        }
        for &fresh in &proc.locals {
            assert!(count_defs(&proc, fresh) <= 1);
        }
    }

    #[test]
    fn test_uses_after_local_redefinition() {
        let (mut proc, dom, df) =
            prepare("Int f(Int a) {\n  Int b;\n  b = a;\n  b = b + 1;\n  return b;\n}\n");
        // Treat the body as if `b` were one SSA value defined twice.
        let b = proc.locals[0];
        let placed = repair_ssa(&mut proc, b, &dom, &df);
        assert_eq!(placed, 0);
        let insts = &proc.block(BlockId::new(1)).insts;
        let first = insts[0].defs()[0];
        let second = insts[1].defs()[0];
        assert_ne!(first, second);
        assert_eq!(insts[1].uses(), vec![first]);
        assert_eq!(insts[2].uses(), vec![second]);
        assert_eq!(proc.var(first).ty, Type::Int);
    }

    #[test]
    fn test_argument_reaching_from_entry_is_kept() {
        let (mut proc, dom, df) = prepare(
            "Int f(Int a) {\n  if (a > 0) goto Then;\n  goto Join;\nThen:\n  a = 1;\nJoin:\n  return a;\n}\n",
        );
        let a = proc.args[0];
        repair_ssa(&mut proc, a, &dom, &df);
        let join = BlockId::new(4);
        let phi = proc.block(join).phis().next().cloned().unwrap();
        // The fallthrough edge still carries the incoming argument
        assert_eq!(phi.args[0], Some(a));
        assert_ne!(phi.args[1], Some(a));
    }

    #[test]
    fn test_redefinition_in_loop_body_reaches_header() {
        // B1 init, B2 header, B3 body, B4/B5 arms, B6 join (back edge), B7 exit.
        let (mut proc, dom, df) = prepare(
            "Int f(Int n) {\n  Int x;\n  Int i;\n  x = 0;\n  i = n;\n\
             Head:\n  if (x > n) goto Done;\n  i = i - 1;\n  if (i > 0) goto Then;\n  goto Join;\n\
             Then:\n  i = i + 0;\nJoin:\n  goto Head;\nDone:\n  return x;\n}\n",
        );
        let x = proc.locals[0];
        let then_block = BlockId::new(5);
        let at = proc.block(then_block).insts.len() - 1;
        proc.block_mut(then_block).insts.insert(at, Inst::Assign { dst: x, src: Rval::Int(7) });

        let placed = repair_ssa(&mut proc, x, &dom, &df);
        assert_eq!(placed, 2);

        let init_def = proc.block(BlockId::new(1)).insts[0].defs()[0];
        let then_def = proc.block(then_block).insts[at].defs()[0];
        let header = BlockId::new(2);
        let join = BlockId::new(6);
        let header_phi = proc.block(header).phis().next().cloned().unwrap();
        let join_phi = proc.block(join).phis().next().cloned().unwrap();

        assert!(header_phi.args.contains(&Some(init_def)));
        assert!(header_phi.args.contains(&Some(join_phi.dst)));
        assert!(join_phi.args.contains(&Some(then_def)));
        assert!(join_phi.args.contains(&Some(header_phi.dst)));

        // Both the loop test and the exit read the header phi
        let header_test = proc.block(header).insts.last().unwrap();
        assert_eq!(header_test.uses()[0], header_phi.dst);
        match proc.block(BlockId::new(7)).insts.last() {
            Some(Inst::Return { value: Some(Rval::Var(r)) }) => assert_eq!(*r, header_phi.dst),
            other => panic!("unexpected terminator {:?}", other),
        }
    }
}
