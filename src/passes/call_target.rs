//! Register targeting around calls.
//!
//! Every call gets a `CallPrep` parallel copy in front of it. Its leading
//! definitions are fresh temporaries (`%rtp{n}`) that replace the call's
//! register arguments, so the colorer can pin them to r0..r3. The remaining
//! definitions redefine each value live across the call, which gives the
//! colorer a point where such values can move out of the argument registers
//! the call clobbers. Those redefinitions break SSA form, so the affected
//! values are repaired afterwards.

use super::dominance::{DomFrontiers, DomTree};
use super::liveness::Liveness;
use super::ssa_repair::repair_ssa;
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;
use crate::ir::{BlockId, Inst, Procedure, Rval, VarId, VarSet};

/// Insert call-preps before every call in `proc`. Returns how many were built.
pub fn target_calls(
    proc: &mut Procedure,
    dom: &DomTree,
    frontiers: &DomFrontiers,
    session: &CompilationSession<'_>,
) -> CompileResult<usize> {
    let live = Liveness::compute(proc);
    let mut targeter = Targeter {
        temps: 0,
        preps: 0,
        modified: VarSet::new(),
    };
    for block in proc.block_ids().collect::<Vec<_>>() {
        targeter.target_block(proc, block, live.live_out(block).clone(), session)?;
    }

    let mut phis = 0;
    for var in targeter.modified.iter().collect::<Vec<_>>() {
        phis += repair_ssa(proc, var, dom, frontiers);
    }
    session.record_phis_placed(phis);
    log::debug!(
        "call-target: {} got {} call-preps, {} values repaired",
        proc.name,
        targeter.preps,
        targeter.modified.len()
    );
    Ok(targeter.preps)
}

struct Targeter {
    temps: usize,
    preps: usize,
    /// Values redefined by some call-prep.
    modified: VarSet,
}

impl Targeter {
    fn target_block(
        &mut self,
        proc: &mut Procedure,
        block: BlockId,
        mut live: VarSet,
        session: &CompilationSession<'_>,
    ) -> CompileResult<()> {
        let mut i = proc.block(block).insts.len();
        while i > 0 {
            i -= 1;
            let live_after = live.clone();
            let inst = &proc.block(block).insts[i];
            for &d in inst.defs() {
                live.remove(d);
            }
            for v in super::liveness::inst_uses(proc, block, i) {
                live.insert(v);
            }
            if !inst.is_call() {
                continue;
            }

            let prep = self.build_prep(proc, block, i, &live, &live_after)?;
            proc.block_mut(block).insts.insert(i, prep);
            session.record_call_prep();
            self.preps += 1;
        }
        Ok(())
    }

    /// Rewrite the call at `index` to read fresh temporaries and return the
    /// call-prep defining them.
    fn build_prep(
        &mut self,
        proc: &mut Procedure,
        block: BlockId,
        index: usize,
        live_before: &VarSet,
        live_after: &VarSet,
    ) -> CompileResult<Inst> {
        let args: Vec<Rval> = match &proc.block(block).insts[index] {
            Inst::Call { args, .. } => args.clone(),
            _ => Vec::new(),
        };
        let mut defs = Vec::with_capacity(args.len());
        let mut srcs = Vec::with_capacity(args.len());
        for arg in &args {
            let Rval::Var(src) = *arg else {
                return Err(CompileError::MalformedInstruction {
                    reason: format!(
                        "call argument {} in {} is not a variable",
                        proc.display_rval(arg),
                        proc.block_name(block)
                    ),
                });
            };
            let ty = proc.var(src).ty.clone();
            let tmp = proc.add_local(format!("%rtp{}", self.temps), ty);
            self.temps += 1;
            defs.push(tmp);
            srcs.push(src);
        }
        if let Inst::Call { args, .. } = &mut proc.block_mut(block).insts[index] {
            for (arg, &tmp) in args.iter_mut().zip(&defs) {
                *arg = Rval::Var(tmp);
            }
        }

        let mut across = live_before.clone();
        across.intersect_with(live_after);
        let across: Vec<VarId> = across.iter().collect();
        for v in across {
            defs.push(v);
            srcs.push(v);
            self.modified.insert(v);
        }
        Ok(Inst::CallPrep {
            num_args: args.len(),
            defs,
            srcs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_program;
    use crate::passes::cfg::build_cfg;
    use crate::passes::lower::lower_procedure;
    use crate::passes::phi_web::build_phi_webs;
    use crate::passes::ssa::construct_ssa;
    use bumpalo::Bump;

    fn targeted(text: &str, index: usize) -> (Procedure, usize) {
        let mut program = parse_program(text).unwrap();
        let mut proc = program.procedures.remove(index);
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        build_cfg(&mut proc).unwrap();
        let dom = DomTree::compute(&proc).unwrap();
        let df = DomFrontiers::compute(&proc, &dom);
        construct_ssa(&mut proc, &dom, &df, &session).unwrap();
        lower_procedure(&mut proc);
        build_phi_webs(&mut proc);
        let preps = target_calls(&mut proc, &dom, &df, &session).unwrap();
        (proc, preps)
    }

    const CALLER: &str = "Int g(Int a, Int b) {\n  return a;\n}\n\
                          Int f(Int x) {\n  Int y;\n  Int z;\n  y = x + 1;\n  z = g(x, 2);\n  z = z + y;\n  return z;\n}\n";

    #[test]
    fn test_call_arguments_become_temporaries() {
        let (proc, preps) = targeted(CALLER, 1);
        assert_eq!(preps, 1);
        let insts: Vec<&Inst> = proc.blocks.iter().flat_map(|b| &b.insts).collect();
        let at = insts.iter().position(|i| i.is_call()).unwrap();
        let Inst::CallPrep { defs, srcs, num_args } = insts[at - 1] else {
            panic!("no call-prep before the call");
        };
        assert_eq!(*num_args, 2);
        assert_eq!(proc.var_name(defs[0]), "%rtp0");
        assert_eq!(proc.var_name(defs[1]), "%rtp1");
        assert_eq!(srcs[0], proc.args[0]);
        let Inst::Call { args, .. } = insts[at] else { unreachable!() };
        assert_eq!(args, &vec![Rval::Var(defs[0]), Rval::Var(defs[1])]);
    }

    #[test]
    fn test_live_across_values_are_redefined() {
        let (proc, _) = targeted(CALLER, 1);
        let insts: Vec<&Inst> = proc.blocks.iter().flat_map(|b| &b.insts).collect();
        let at = insts.iter().position(|i| i.is_call()).unwrap();
        let Inst::CallPrep { defs, srcs, num_args } = insts[at - 1] else {
            panic!("no call-prep before the call");
        };
        // Only y survives the call
        assert_eq!(defs.len(), num_args + 1);
        let (def, src) = (defs[2], srcs[2]);
        assert_ne!(def, src);
        assert!(proc.var_name(src).starts_with("y_"));
        assert_eq!(proc.var(def).web, proc.var(src).web);

        // The use after the call reads the redefinition
        let add = insts[at + 1];
        assert!(add.uses().contains(&def));
        assert!(!add.uses().contains(&src));
    }

    #[test]
    fn test_no_prep_without_calls() {
        let (proc, preps) = targeted("Int f(Int x) {\n  return x;\n}\n", 0);
        assert_eq!(preps, 0);
        assert!(proc
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .all(|i| !matches!(i, Inst::CallPrep { .. })));
    }
}
