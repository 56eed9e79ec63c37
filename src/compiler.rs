// The pipeline driver. Compiler holds the session and configuration of one compilation and runs
// every procedure through the passes in order: CFG build, dominance and frontiers, SSA
// construction, critical-edge splitting (recomputing dominance when an edge was split), target
// lowering, phi-web construction, spilling, call targeting, liveness and coloring. After each
// pass it honours the configuration's debugging hooks: the textual IR is dumped to stderr after
// the requested pass and, when verification is on, the structural checks that hold at that
// point are run. Code generation then covers the whole program at once so string literals and
// labels are shared between procedures.

//! Per-procedure pipeline driver.

use crate::arm::asm::ArmProgram;
use crate::arm::codegen::generate_program;
use crate::core::config::{BackendConfig, PassName};
use crate::core::error::CompileResult;
use crate::core::session::CompilationSession;
use crate::ir::{Procedure, Program};
use crate::passes::verify::verify_after;
use crate::passes::{
    build_cfg, build_phi_webs, color_procedure, construct_ssa, lower_procedure, spill_procedure,
    split_critical_edges, target_calls, DomFrontiers, DomTree, Liveness,
};

/// Drives the backend over a program.
pub struct Compiler<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    config: BackendConfig,
}

impl<'s, 'arena> Compiler<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>, config: BackendConfig) -> Self {
        Self { session, config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Compile every procedure and generate assembly for the program.
    pub fn compile_program(&self, program: &mut Program) -> CompileResult<ArmProgram> {
        self.config.validate()?;
        for proc in &mut program.procedures {
            self.compile_procedure(proc).inspect_err(|e| {
                let name = self.session.current_procedure().unwrap_or_default();
                log::error!("compilation of {} failed: {}", name, e);
            })?;
        }
        let asm = generate_program(program, self.session)?;
        log::debug!(
            "compiled {} procedures into {} instructions",
            program.procedures.len(),
            asm.instr_count()
        );
        Ok(asm)
    }

    /// Run one linear procedure through every pass up to and including coloring.
    pub fn compile_procedure(&self, proc: &mut Procedure) -> CompileResult<()> {
        let session = self.session;
        session.set_current_procedure(&proc.name);
        log::debug!("compiling {}", proc.name);

        build_cfg(proc)?;
        self.after_pass(PassName::Cfg, proc)?;

        let mut dom = DomTree::compute(proc)?;
        let mut frontiers = DomFrontiers::compute(proc, &dom);
        construct_ssa(proc, &dom, &frontiers, session)?;
        self.after_pass(PassName::Ssa, proc)?;

        if split_critical_edges(proc, session)? {
            dom = DomTree::compute(proc)?;
            frontiers = DomFrontiers::compute(proc, &dom);
        }
        self.after_pass(PassName::CritEdge, proc)?;

        lower_procedure(proc);
        self.after_pass(PassName::Lower, proc)?;

        build_phi_webs(proc);
        self.after_pass(PassName::PhiWeb, proc)?;

        spill_procedure(proc, &dom, &frontiers, &self.config, session)?;
        self.after_pass(PassName::Spill, proc)?;

        target_calls(proc, &dom, &frontiers, session)?;
        self.after_pass(PassName::CallTarget, proc)?;

        let live = Liveness::compute(proc);
        color_procedure(proc, &dom, &live, &self.config)?;
        self.after_pass(PassName::Color, proc)?;

        session.record_procedure_compiled(&proc.name, proc.inst_count());
        session.clear_procedure_state();
        Ok(())
    }

    fn after_pass(&self, pass: PassName, proc: &Procedure) -> CompileResult<()> {
        if self.config.dump_after == Some(pass) {
            eprintln!("; {} after {}\n{}", proc.name, pass, proc);
            if pass == PassName::Cfg {
                eprintln!("{}", proc.render_cfg());
            }
        }
        if self.config.verify {
            verify_after(pass, proc, &self.config)?;
        }
        Ok(())
    }
}
