// Integration tests for the register allocation half of the pipeline: phi-web construction,
// spilling under a range of register budgets, call-boundary targeting and coloring. Each
// program runs through the full per-procedure pipeline with verification enabled, so every
// structural invariant is checked after every pass; the tests then inspect the colored result.

//! Register allocation through the textual IR.

use bumpalo::Bump;
use cssa::core::config::MAX_ALLOCATABLE_REGISTERS;
use cssa::ir::parser::parse_program;
use cssa::ir::{Inst, Procedure, Program};
use cssa::passes::verify::{verify_coloring, verify_phi_webs, verify_pressure, verify_ssa};
use cssa::core::Reg;
use cssa::{BackendConfig, CompilationSession, Compiler};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(k: usize) -> BackendConfig {
    BackendConfig {
        num_registers: k,
        verify: true,
        ..BackendConfig::default()
    }
}

/// Run every procedure of `text` through the pipeline up to coloring.
fn allocate(text: &str, k: usize) -> Program {
    let mut program = parse_program(text).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let compiler = Compiler::new(&session, config(k));
    for proc in &mut program.procedures {
        compiler
            .compile_procedure(proc)
            .unwrap_or_else(|e| panic!("{} with K={}: {}", proc.name, k, e));
    }
    program
}

fn check_invariants(proc: &Procedure, k: usize) {
    let config = config(k);
    verify_ssa(proc).unwrap();
    verify_phi_webs(proc).unwrap();
    verify_pressure(proc, &config).unwrap();
    verify_coloring(proc, &config).unwrap();
    for v in proc.args.iter().chain(&proc.locals) {
        if let Some(reg) = proc.var(*v).reg {
            assert!(reg.index() < k, "{} in {} with K={}", proc.var_name(*v), reg, k);
        }
    }
}

const WIDE: &str = "Int wide(Int a, Int b) {\n  Int c;\n  Int d;\n  Int e;\n  Int f;\n  Int g;\n  Int s;\n\
                    c = a + 1;\n  d = b + 2;\n  e = a * b;\n  f = c * d;\n  g = e - f;\n\
                    s = a + b;\n  s = s + c;\n  s = s + d;\n  s = s + e;\n  s = s + f;\n  s = s + g;\n  return s;\n}\n";

const LOOP: &str = "Int loop(Int n) {\n  Int i;\n  Int s;\n  Int a;\n  Int b;\n  Int c;\n  Int d;\n  Int e;\n\
                    Int f;\n  Int g;\n  i = 0;\n  s = 0;\n  a = n + 1;\n  b = n + 2;\n  c = n + 3;\n  d = n + 4;\n\
                    e = n + 5;\n  f = n + 6;\n  g = n + 7;\nHead:\n  if (i >= n) goto Exit;\n  s = s + a;\n\
                    s = s + b;\n  s = s + c;\n  s = s + d;\n  s = s + e;\n  s = s + f;\n  s = s + g;\n\
                    i = i + 1;\n  goto Head;\nExit:\n  return s;\n}\n";

const CALLS: &str = "Int g(Int a, Int b, Int c, Int d, Int e, Int f) {\n  Int s;\n  s = a + f;\n  return s;\n}\n\
                     Int caller(Int x, Int y) {\n  Int p;\n  Int q;\n  Int r;\n  p = x + 1;\n  q = y + 2;\n\
                     r = g(x, y, p, q, 5, 6);\n  r = r + p;\n  r = r + q;\n  return r;\n}\n";

#[test]
fn test_invariants_hold_for_every_register_budget() {
    init();
    for k in BackendConfig::default().min_registers()..=MAX_ALLOCATABLE_REGISTERS {
        for text in [WIDE, LOOP, CALLS] {
            let program = allocate(text, k);
            for proc in &program.procedures {
                check_invariants(proc, k);
            }
        }
    }
}

#[test]
fn test_no_spills_with_a_full_register_file() {
    init();
    let program = allocate(WIDE, MAX_ALLOCATABLE_REGISTERS);
    let proc = &program.procedures[0];
    let spills = proc
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter(|i| matches!(i, Inst::Spill { .. } | Inst::Reload { .. }))
        .count();
    assert_eq!(spills, 0);
}

#[test]
fn test_tight_budget_spills_to_web_slots() {
    init();
    let program = allocate(LOOP, 8);
    let proc = &program.procedures[0];
    let mut spilled = 0;
    for inst in proc.blocks.iter().flat_map(|b| &b.insts) {
        if let Inst::Spill { var } | Inst::Reload { dst: var } = inst {
            let web = proc.var(*var).web.expect("spilled value has a web");
            assert!(proc.web(web).need_stack);
            spilled += 1;
        }
    }
    assert!(spilled > 0);
}

#[test]
fn test_call_arguments_land_in_argument_registers() {
    init();
    let program = allocate(CALLS, MAX_ALLOCATABLE_REGISTERS);
    let caller = &program.procedures[1];

    let mut preps = 0;
    for block in &caller.blocks {
        for (i, inst) in block.insts.iter().enumerate() {
            let Inst::CallPrep { defs, num_args, .. } = inst else { continue };
            preps += 1;
            for (n, &def) in defs.iter().take(*num_args).enumerate() {
                assert_eq!(caller.var(def).reg, Reg::from_index(n));
            }
            // Everything else carried across the call avoids r0..r3
            for &def in &defs[*num_args..] {
                assert!(caller.var(def).reg.unwrap().index() >= 4);
            }
            assert!(block.insts[i + 1].is_call());
        }
    }
    assert_eq!(preps, 1);

    // Arguments five and six travel on the stack
    let stack_args: Vec<usize> = caller
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter_map(|i| match i {
            Inst::StackArg { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(stack_args.len(), 2);
    assert!(stack_args.contains(&0) && stack_args.contains(&1));
}

#[test]
fn test_register_arguments_are_pinned() {
    init();
    let program = allocate(CALLS, 8);
    let callee = &program.procedures[0];
    for (i, &arg) in callee.args.iter().take(4).enumerate() {
        assert_eq!(callee.var(arg).reg, Reg::from_index(i));
    }
}
