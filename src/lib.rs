//! cssa - SSA construction, conventional-SSA register allocation and ARM code generation.
//!
//! The backend takes procedures in a small typed IR, builds their control-flow
//! graphs, converts them to SSA, bounds register pressure by spilling, colours
//! the result onto the 13 allocatable ARM core registers and emits assembly.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use cssa::core::{BackendConfig, CompilationSession};
//! use cssa::{ir::parser::parse_program, Compiler};
//!
//! let mut program = parse_program(source)?;
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let compiler = Compiler::new(&session, BackendConfig::default());
//! let asm = compiler.compile_program(&mut program)?;
//! print!("{}", asm);
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Arena-indexed IR, textual renderer and parser
//! - [`passes`] - CFG, dominance, SSA, spilling, liveness and colouring passes
//! - [`arm`] - Target description, frame layout, parallel copies and code generation
//! - [`core`] - Shared infrastructure (errors, config, registers, session)

pub mod arm;
pub mod compiler;
pub mod core;
pub mod ir;
pub mod passes;

pub use crate::compiler::Compiler;
pub use crate::core::{BackendConfig, CompilationSession, CompileError, CompileResult, SessionStats};
