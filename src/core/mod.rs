// This module gathers the infrastructure shared by every pass of the backend: the structured
// error type all passes return, the backend configuration (register budget, verification and
// dump hooks), the physical register model with its bit-set and occupancy tracker used by the
// colorer and the code generator, and the arena-backed compilation session that interns symbol
// names and accumulates statistics across procedures.

//! Core backend infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - One enum for every internal invariant violation, carrying the offending names
//!
//! ## Configuration (`config`)
//! - Register budget and argument-register count
//! - Debugging hooks (`--dump-after`, `--verify`)
//!
//! ## Registers (`register_file`)
//! - `Reg` newtype, `RegBitSet`, and the `RegisterFile` occupancy tracker
//!
//! ## Session (`session`)
//! - Arena allocation using `bumpalo`
//! - Compilation statistics

pub mod config;
pub mod error;
pub mod register_file;
pub mod session;

pub use config::{BackendConfig, PassName};
pub use error::{CompileError, CompileResult};
pub use register_file::{Reg, RegBitSet, RegisterFile};
pub use session::{CompilationSession, SessionStats};
