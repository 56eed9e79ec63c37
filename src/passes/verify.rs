//! Structural invariant checks.
//!
//! Each check returns the first violation it finds as a [`CompileError`].
//! The pipeline driver runs the checks that apply after each pass when
//! verification is enabled; tests call them directly.

use super::liveness::Liveness;
use crate::core::config::{BackendConfig, PassName};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::Reg;
use crate::ir::{BlockId, Procedure, VarId, VarSet};

/// Every variable has at most one definition and every phi has one
/// argument per predecessor.
pub fn verify_ssa(proc: &Procedure) -> CompileResult<()> {
    let mut defined = VarSet::with_capacity(proc.num_vars());
    for &arg in &proc.args {
        defined.insert(arg);
    }
    for block in proc.block_ids() {
        let b = proc.block(block);
        for inst in &b.insts {
            for &d in inst.defs() {
                if !defined.insert(d) {
                    return Err(CompileError::MultipleDefinitions {
                        var: proc.var_name(d).to_string(),
                    });
                }
            }
            if let Some(phi) = inst.as_phi() {
                if phi.args.len() != b.preds.len() {
                    return Err(CompileError::PhiArgumentMismatch {
                        var: proc.var_name(phi.dst).to_string(),
                        block: proc.block_name(block).to_string(),
                        args: phi.args.len(),
                        preds: b.preds.len(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Phi arguments with no reaching definition, as (block, phi destination,
/// argument index).
pub fn unresolved_phi_args(proc: &Procedure) -> Vec<(BlockId, VarId, usize)> {
    let mut out = Vec::new();
    for block in proc.block_ids() {
        for phi in proc.block(block).phis() {
            for (i, arg) in phi.args.iter().enumerate() {
                if arg.is_none() {
                    out.push((block, phi.dst, i));
                }
            }
        }
    }
    out
}

/// No edge leaves a two-way branch for a block with several predecessors.
pub fn verify_no_critical_edges(proc: &Procedure) -> CompileResult<()> {
    for block in proc.block_ids() {
        let b = proc.block(block);
        if b.cond.is_none() {
            continue;
        }
        for succ in b.succs() {
            if proc.block(succ).preds.len() >= 2 {
                return Err(CompileError::InvariantViolated {
                    reason: format!(
                        "critical edge {} -> {} in {}",
                        proc.block_name(block),
                        proc.block_name(succ),
                        proc.name
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Every phi shares its web with all of its present arguments.
pub fn verify_phi_webs(proc: &Procedure) -> CompileResult<()> {
    let web_of = |v: VarId| {
        proc.var(v).web.ok_or_else(|| CompileError::MissingPhiWeb {
            var: proc.var_name(v).to_string(),
        })
    };
    for block in &proc.blocks {
        for phi in block.phis() {
            let web = web_of(phi.dst)?;
            for &arg in phi.args.iter().flatten() {
                if web_of(arg)? != web {
                    return Err(CompileError::InvariantViolated {
                        reason: format!(
                            "phi {} and its argument {} are in different webs",
                            proc.var_name(phi.dst),
                            proc.var_name(arg)
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

/// No more than K values are live before any instruction, and no more than
/// K minus the argument registers live across a call.
pub fn verify_pressure(proc: &Procedure, config: &BackendConfig) -> CompileResult<()> {
    let live = Liveness::compute(proc);
    for block in proc.block_ids() {
        let mut after = live.live_out(block).clone();
        for (i, set) in live.live_before_each(proc, block) {
            let inst = &proc.block(block).insts[i];
            let mut checks = vec![(set.len(), config.num_registers, "live before")];
            if inst.is_call() {
                let mut across = set.clone();
                across.intersect_with(&after);
                checks.push((across.len(), config.call_budget(), "live across"));
            }
            for (count, limit, what) in checks {
                if count > limit {
                    return Err(CompileError::InvariantViolated {
                        reason: format!(
                            "{} values {} `{}` in {}, limit {}",
                            count,
                            what,
                            proc.display_inst(inst),
                            proc.block_name(block),
                            limit
                        ),
                    });
                }
            }
            after = set;
        }
    }
    Ok(())
}

/// Every live value has a register, no two simultaneously live values share
/// one, and register arguments sit in r0..r3 in order.
pub fn verify_coloring(proc: &Procedure, config: &BackendConfig) -> CompileResult<()> {
    for (i, &arg) in proc.args.iter().take(config.num_arg_registers).enumerate() {
        let expected = Reg::from_index(i);
        if proc.var(arg).reg != expected {
            return Err(CompileError::InvariantViolated {
                reason: format!("argument {} is not in r{}", proc.var_name(arg), i),
            });
        }
    }

    let live = Liveness::compute(proc);
    for block in proc.block_ids() {
        let mut points = live.live_before_each(proc, block);
        points.push((proc.block(block).insts.len(), live.live_out(block).clone()));
        for (_, set) in points {
            let mut owners: [Option<VarId>; 16] = [None; 16];
            for v in set.iter() {
                let reg = proc.var(v).reg.ok_or_else(|| CompileError::UnassignedRegister {
                    var: proc.var_name(v).to_string(),
                })?;
                if let Some(other) = owners[reg.index()].replace(v) {
                    return Err(CompileError::InvariantViolated {
                        reason: format!(
                            "{} and {} both live in {} in {}",
                            proc.var_name(other),
                            proc.var_name(v),
                            reg,
                            proc.block_name(block)
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Run the checks that hold once `pass` has run.
pub fn verify_after(pass: PassName, proc: &Procedure, config: &BackendConfig) -> CompileResult<()> {
    match pass {
        PassName::Cfg => Ok(()),
        PassName::Ssa | PassName::Lower => verify_ssa(proc),
        PassName::CritEdge => {
            verify_ssa(proc)?;
            verify_no_critical_edges(proc)
        }
        PassName::PhiWeb | PassName::CallTarget => {
            verify_ssa(proc)?;
            verify_phi_webs(proc)
        }
        PassName::Spill => {
            verify_ssa(proc)?;
            verify_no_critical_edges(proc)?;
            verify_pressure(proc, config)
        }
        PassName::Color => verify_coloring(proc, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_program;
    use crate::ir::{Inst, Rval, Type};
    use crate::passes::cfg::build_cfg;
    use crate::passes::dominance::{DomFrontiers, DomTree};
    use crate::passes::phi_web::build_phi_webs;
    use crate::passes::ssa::construct_ssa;
    use crate::CompilationSession;
    use bumpalo::Bump;

    fn ssa(text: &str) -> Procedure {
        let mut program = parse_program(text).unwrap();
        let mut proc = program.procedures.remove(0);
        build_cfg(&mut proc).unwrap();
        let dom = DomTree::compute(&proc).unwrap();
        let df = DomFrontiers::compute(&proc, &dom);
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        construct_ssa(&mut proc, &dom, &df, &session).unwrap();
        proc
    }

    const DIAMOND: &str = "Int f(Int x) {\n  Int y;\n  if (x > 0) goto Then;\n  y = 2;\n  goto Join;\n\
                           Then:\n  y = 1;\nJoin:\n  return y;\n}\n";

    #[test]
    fn test_ssa_form_passes() {
        let proc = ssa(DIAMOND);
        assert!(verify_ssa(&proc).is_ok());
        assert!(verify_no_critical_edges(&proc).is_ok());
        assert!(unresolved_phi_args(&proc).is_empty());
    }

    #[test]
    fn test_second_definition_is_reported() {
        let mut proc = ssa(DIAMOND);
        let block = BlockId::new(1);
        let dst = proc.block(BlockId::new(2)).insts[0].defs()[0];
        proc.block_mut(block).insts.insert(0, Inst::Assign { dst, src: Rval::Int(0) });
        assert!(matches!(verify_ssa(&proc), Err(CompileError::MultipleDefinitions { .. })));
    }

    #[test]
    fn test_phi_arity_is_checked() {
        let mut proc = ssa(DIAMOND);
        let join = BlockId::new(4);
        if let Some(phi) = proc.block_mut(join).insts[0].as_phi_mut() {
            phi.args.pop();
        }
        assert!(matches!(
            verify_ssa(&proc),
            Err(CompileError::PhiArgumentMismatch { args: 1, preds: 2, .. })
        ));
    }

    #[test]
    fn test_undefined_path_leaves_unresolved_argument() {
        let proc = ssa(
            "Int f(Int x) {\n  Int y;\n  if (x > 0) goto Then;\n  goto Join;\nThen:\n  y = 1;\nJoin:\n  return y;\n}\n",
        );
        let unresolved = unresolved_phi_args(&proc);
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].0, BlockId::new(4));
    }

    #[test]
    fn test_phi_web_closure() {
        let mut proc = ssa(DIAMOND);
        assert!(matches!(verify_phi_webs(&proc), Err(CompileError::MissingPhiWeb { .. })));
        build_phi_webs(&mut proc);
        assert!(verify_phi_webs(&proc).is_ok());

        let stray = proc.add_local("stray", Type::Int);
        let web = proc.new_web();
        proc.var_mut(stray).web = Some(web);
        if let Some(phi) = proc.block_mut(BlockId::new(4)).insts[0].as_phi_mut() {
            phi.args[0] = Some(stray);
        }
        assert!(matches!(verify_phi_webs(&proc), Err(CompileError::InvariantViolated { .. })));
    }

    #[test]
    fn test_pressure_limit() {
        let proc = ssa("Int f(Int a, Int b, Int c) {\n  Int s;\n  s = a + b;\n  s = s + c;\n  return s;\n}\n");
        let mut config = BackendConfig::default();
        assert!(verify_pressure(&proc, &config).is_ok());
        config.num_registers = 2;
        assert!(verify_pressure(&proc, &config).is_err());
    }

    #[test]
    fn test_call_limit_counts_values_carried_across() {
        // a, b and c survive the call; x dies into it
        let proc = ssa(
            "Int f(Int a, Int b, Int c) {\n  Int x;\n  Int s;\n  x = a + 1;\n  x = h(x);\n  s = a + b;\n\
             s = s + c;\n  s = s + x;\n  return s;\n}\n",
        );
        let mut config = BackendConfig::default();
        config.num_registers = 7;
        assert!(verify_pressure(&proc, &config).is_ok());
        config.num_registers = 6;
        let err = verify_pressure(&proc, &config).unwrap_err();
        assert!(err.to_string().contains("3 values live across"), "{}", err);
    }
}
