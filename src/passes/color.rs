//! Register coloring on the dominator tree.
//!
//! After spilling the interference graph is chordal, so a greedy walk in
//! dominator-tree preorder colors it with at most K registers. Each block
//! starts from the registers of its live-in values. A register is freed at
//! its value's last use, and a definition takes the lowest free one.
//! A call-prep clears the file: call arguments are pinned to r0..r3 and
//! values carried across the call go to r4 or above. Memory phis get no
//! register.

use super::dominance::DomTree;
use super::liveness::{defines_register, inst_uses, Liveness};
use crate::core::config::BackendConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{Reg, RegisterFile};
use crate::ir::{BlockId, Inst, Procedure, VarId};

/// Assign a register to every value of `proc` that needs one.
pub fn color_procedure(
    proc: &mut Procedure,
    dom: &DomTree,
    live: &Liveness,
    config: &BackendConfig,
) -> CompileResult<()> {
    for var in proc.args.iter().chain(&proc.locals).copied().collect::<Vec<_>>() {
        proc.var_mut(var).reg = None;
    }
    let register_args: Vec<VarId> = proc.args.iter().take(config.num_arg_registers).copied().collect();
    for (i, arg) in register_args.into_iter().enumerate() {
        proc.var_mut(arg).reg = Reg::from_index(i);
    }

    for &block in dom.preorder() {
        color_block(proc, block, live, config)?;
    }

    log::debug!(
        "color: {} colored {} values",
        proc.name,
        proc.locals.iter().filter(|&&v| proc.var(v).reg.is_some()).count()
    );
    Ok(())
}

fn color_block(
    proc: &mut Procedure,
    block: BlockId,
    live: &Liveness,
    config: &BackendConfig,
) -> CompileResult<()> {
    let mut file = RegisterFile::new(config.num_registers);

    // Every live-in value was colored in a dominating block
    for v in live.live_in(block).iter() {
        let reg = proc.var(v).reg.ok_or_else(|| CompileError::UncoloredLiveIn {
            var: proc.var_name(v).to_string(),
            block: proc.block_name(block).to_string(),
        })?;
        if !file.assign(reg, v) {
            return Err(CompileError::DuplicateLiveInRegister {
                reg: reg.to_string(),
                block: proc.block_name(block).to_string(),
            });
        }
    }

    let mut prev_defs: Vec<VarId> = Vec::new();
    for i in 0..proc.block(block).insts.len() {
        let is_phi = matches!(proc.block(block).insts[i], Inst::Phi(_));
        if !is_phi {
            for d in prev_defs.drain(..) {
                if live.is_dead_def(block, d) {
                    if let Some(reg) = proc.var(d).reg {
                        file.free(reg);
                    }
                }
            }
        }

        for v in inst_uses(proc, block, i) {
            if live.dies_at(block, v, i) {
                if let Some(reg) = proc.var(v).reg {
                    file.free(reg);
                }
            }
        }

        let inst = &proc.block(block).insts[i];
        if let Inst::CallPrep { defs, srcs, num_args } = inst {
            let (defs, srcs, num_args) = (defs.clone(), srcs.clone(), *num_args);
            color_call_prep(proc, block, &mut file, &defs, &srcs, num_args)?;
            prev_defs.extend(defs);
        } else if defines_register(inst) {
            let defs = inst.defs().to_vec();
            for &d in &defs {
                if proc.var(d).reg.is_some() {
                    return Err(CompileError::MultipleDefinitions {
                        var: proc.var_name(d).to_string(),
                    });
                }
                let reg = file.allocate_from(Reg::R0, d).ok_or_else(|| CompileError::RegistersExhausted {
                    var: proc.var_name(d).to_string(),
                    block: proc.block_name(block).to_string(),
                })?;
                proc.var_mut(d).reg = Some(reg);
            }
            prev_defs.extend(defs);
        }
    }
    Ok(())
}

fn color_call_prep(
    proc: &mut Procedure,
    block: BlockId,
    file: &mut RegisterFile,
    defs: &[VarId],
    srcs: &[VarId],
    num_args: usize,
) -> CompileResult<()> {
    // The call clobbers everything
    file.clear_all();

    for (i, &def) in defs.iter().take(num_args).enumerate() {
        let reg = Reg::from_index(i).ok_or_else(|| CompileError::MalformedInstruction {
            reason: format!("call-prep with {} register arguments", num_args),
        })?;
        file.assign(reg, def);
        proc.var_mut(def).reg = Some(reg);
    }

    let mut pending = Vec::new();
    for (&def, &src) in defs.iter().zip(srcs).skip(num_args) {
        match proc.var(src).reg {
            Some(reg) if reg >= Reg::R4 && file.is_free(reg) => {
                file.assign(reg, def);
                proc.var_mut(def).reg = Some(reg);
            }
            _ => pending.push(def),
        }
    }
    for def in pending {
        let reg = file.allocate_from(Reg::R4, def).ok_or_else(|| CompileError::RegistersExhausted {
            var: proc.var_name(def).to_string(),
            block: proc.block_name(block).to_string(),
        })?;
        proc.var_mut(def).reg = Some(reg);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_program;
    use crate::passes::call_target::target_calls;
    use crate::passes::cfg::build_cfg;
    use crate::passes::dominance::DomFrontiers;
    use crate::passes::lower::lower_procedure;
    use crate::passes::phi_web::build_phi_webs;
    use crate::passes::ssa::construct_ssa;
    use crate::CompilationSession;
    use bumpalo::Bump;

    fn colored(text: &str, index: usize) -> Procedure {
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
        target_calls(&mut proc, &dom, &df, &session).unwrap();
        let live = Liveness::compute(&proc);
        color_procedure(&mut proc, &dom, &live, &BackendConfig::default()).unwrap();
        proc
    }

    /// No two values live at the same point share a register.
    fn assert_no_interference(proc: &Procedure) {
        let live = Liveness::compute(proc);
        for block in proc.block_ids() {
            for (i, set) in live.live_before_each(proc, block) {
                let mut seen = Vec::new();
                for v in set.iter() {
                    let reg = proc.var(v).reg.unwrap();
                    assert!(
                        !seen.contains(&reg),
                        "{} shares {} before instruction {} of {}",
                        proc.var_name(v),
                        reg,
                        i,
                        proc.block_name(block)
                    );
                    seen.push(reg);
                }
            }
        }
    }

    #[test]
    fn test_arguments_start_in_argument_registers() {
        let proc = colored("Int f(Int a, Int b) {\n  Int c;\n  c = a + b;\n  return c;\n}\n", 0);
        assert_eq!(proc.var(proc.args[0]).reg, Some(Reg::R0));
        assert_eq!(proc.var(proc.args[1]).reg, Some(Reg::R1));
        // Both operands die at the add, so the sum reuses r0
        assert_eq!(proc.var(proc.locals[0]).reg, Some(Reg::R0));
        assert_no_interference(&proc);
    }

    #[test]
    fn test_loop_coloring_has_no_interference() {
        let proc = colored(
            "Int f(Int n) {\n  Int i;\n  Int s;\n  i = 0;\n  s = 0;\nHead:\n  if (i >= n) goto Exit;\n\
             s = s + i;\n  i = i + 1;\n  goto Head;\nExit:\n  return s;\n}\n",
            0,
        );
        assert_no_interference(&proc);
    }

    #[test]
    fn test_call_pins_arguments_and_moves_survivors() {
        let proc = colored(
            "Int g(Int a, Int b) {\n  return a;\n}\n\
             Int f(Int x) {\n  Int y;\n  Int z;\n  y = x + 1;\n  z = g(x, y);\n  z = z + y;\n  return z;\n}\n",
            1,
        );
        let insts: Vec<&Inst> = proc.blocks.iter().flat_map(|b| &b.insts).collect();
        let at = insts.iter().position(|i| i.is_call()).unwrap();
        let Inst::CallPrep { defs, .. } = insts[at - 1] else {
            panic!("no call-prep before the call");
        };
        assert_eq!(proc.var(defs[0]).reg, Some(Reg::R0));
        assert_eq!(proc.var(defs[1]).reg, Some(Reg::R1));
        // y survives the call above the clobbered registers
        assert_eq!(proc.var(defs[2]).reg, Some(Reg::R4));
        // The result comes back in r0
        let result = insts[at].defs()[0];
        assert_eq!(proc.var(result).reg, Some(Reg::R0));
        assert_no_interference(&proc);
    }
}
