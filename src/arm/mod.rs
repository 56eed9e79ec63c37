// The ARM target: the instruction subset the backend emits and its assembly rendering, the
// calling convention with per-procedure frame layout, the parallel-copy sequentializer that
// turns simultaneous register moves into ordered `mov`s, and the code generator that walks
// colored procedures and produces an ArmProgram.

//! ARM target support.
//!
//! # Key Components
//!
//! ## Instructions (`asm`)
//! - Condition codes, rotated-immediate operands, instructions and blocks
//! - GNU assembler rendering
//!
//! ## Calling convention (`calling_convention`)
//! - Argument and result registers, callee-saved set, stack frame layout
//!
//! ## Parallel copies (`parallel_copy`)
//! - Sequentialization with cycle breaking through a spare register or `lr`
//!
//! ## Code generation (`codegen`)
//! - Prologue, epilogue, block layout and per-instruction selection

pub mod asm;
pub mod calling_convention;
pub mod codegen;
pub mod parallel_copy;

pub use asm::{ArmBlock, ArmProgram, Cond, Instr, Operand2};
pub use codegen::generate_program;
