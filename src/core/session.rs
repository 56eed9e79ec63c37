// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession is the hub shared by every pass of one compilation: it owns a reference to
// the arena that backs per-pass scratch tables (next-use distances, working sets, dataflow
// sets), interns symbol strings handed out by the code generator (external call targets and
// string-literal labels), remembers which procedure is in flight for log messages, and
// accumulates SessionStats. The stats count the work each pass did (phis placed, critical
// edges split, spills and reloads inserted, call-preps built, parallel copies sequentialized,
// cycles broken, link-register borrows) and the emitted instruction mix per mnemonic, and can
// be printed by the driver with --stats.

//! Arena-based compilation session management.
//!
//! All scratch allocations of a compilation share the session lifetime, so
//! passes can hand out arena slices without threading ownership through.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for pass scratch data.
    arena: &'arena Bump,

    /// Session statistics.
    stats: RefCell<SessionStats>,

    /// Interned symbol names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Procedure currently being compiled.
    current_procedure: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_procedure: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    pub fn set_current_procedure(&self, name: &str) {
        *self.current_procedure.borrow_mut() = Some(name.to_string());
    }

    pub fn current_procedure(&self) -> Option<String> {
        self.current_procedure.borrow().clone()
    }

    pub fn clear_procedure_state(&self) {
        *self.current_procedure.borrow_mut() = None;
    }

    /// Record that a procedure went through the whole pipeline.
    pub fn record_procedure_compiled(&self, name: &str, instructions: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.procedures_compiled += 1;
        if instructions > stats.largest_procedure_size {
            stats.largest_procedure_size = instructions;
            stats.largest_procedure_name = name.to_string();
        }
    }

    pub fn record_phis_placed(&self, count: usize) {
        self.stats.borrow_mut().phis_placed += count;
    }

    pub fn record_edges_split(&self, count: usize) {
        self.stats.borrow_mut().critical_edges_split += count;
    }

    pub fn record_spill(&self) {
        self.stats.borrow_mut().spills_inserted += 1;
    }

    pub fn record_reload(&self) {
        self.stats.borrow_mut().reloads_inserted += 1;
    }

    pub fn record_call_prep(&self) {
        self.stats.borrow_mut().call_preps_inserted += 1;
    }

    pub fn record_parallel_copy(&self, cycles_broken: usize, borrowed_lr: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.parallel_copies += 1;
        stats.copy_cycles_broken += cycles_broken;
        if borrowed_lr {
            stats.link_register_borrows += 1;
        }
    }

    /// Record an emitted target instruction.
    pub fn record_instruction_emitted(&self, mnemonic: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_emitted += 1;
        *stats
            .instruction_counts
            .entry(mnemonic.to_string())
            .or_insert(0) += 1;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of procedures compiled.
    pub procedures_compiled: usize,

    /// Phi instructions placed by SSA construction and repair.
    pub phis_placed: usize,

    /// Critical edges split.
    pub critical_edges_split: usize,

    /// Spill instructions inserted.
    pub spills_inserted: usize,

    /// Reload instructions inserted.
    pub reloads_inserted: usize,

    /// Call-prep instructions inserted.
    pub call_preps_inserted: usize,

    /// Parallel copies sequentialized.
    pub parallel_copies: usize,

    /// Copy cycles broken with a spare register.
    pub copy_cycles_broken: usize,

    /// Parallel copies that had to borrow lr.
    pub link_register_borrows: usize,

    /// Total target instructions emitted.
    pub instructions_emitted: usize,

    /// Count of each mnemonic emitted.
    pub instruction_counts: std::collections::HashMap<String, usize>,

    /// Largest procedure compiled, in IR instructions.
    pub largest_procedure_size: usize,

    /// Name of largest procedure.
    pub largest_procedure_name: String,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Procedures compiled: {}", self.procedures_compiled)?;
        writeln!(f, "  Phis placed: {}", self.phis_placed)?;
        writeln!(f, "  Critical edges split: {}", self.critical_edges_split)?;
        writeln!(f, "  Spills inserted: {}", self.spills_inserted)?;
        writeln!(f, "  Reloads inserted: {}", self.reloads_inserted)?;
        writeln!(f, "  Call-preps inserted: {}", self.call_preps_inserted)?;
        writeln!(
            f,
            "  Parallel copies: {} ({} cycles broken, {} lr borrows)",
            self.parallel_copies, self.copy_cycles_broken, self.link_register_borrows
        )?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;

        if !self.largest_procedure_name.is_empty() {
            writeln!(
                f,
                "  Largest procedure: {} ({} IR instructions)",
                self.largest_procedure_name, self.largest_procedure_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

            for (mnemonic, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", mnemonic, count)?;
            }
        }

        Ok(())
    }
}
