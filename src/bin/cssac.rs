//! Command-line driver: compile a textual IR program to ARM assembly.

use bumpalo::Bump;
use clap::Parser;
use cssa::core::config::{PassName, MAX_ALLOCATABLE_REGISTERS};
use cssa::ir::parser::parse_program;
use cssa::{BackendConfig, CompilationSession, Compiler};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cssac")]
#[command(about = "SSA register allocation and ARM code generation for textual IR", long_about = None)]
struct Cli {
    /// Input program in textual IR
    input: PathBuf,

    /// Output assembly file (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print every procedure's IR to stderr after this pass
    #[arg(long, value_enum)]
    dump_after: Option<PassName>,

    /// Print compilation statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Number of allocatable registers
    #[arg(long, default_value_t = MAX_ALLOCATABLE_REGISTERS)]
    registers: usize,

    /// Check structural invariants after every pass
    #[arg(long)]
    verify: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.input)?;
    let mut program = parse_program(&source)?;
    log::info!(
        "read {} classes and {} procedures from {}",
        program.classes.len(),
        program.procedures.len(),
        cli.input.display()
    );

    let config = BackendConfig {
        num_registers: cli.registers,
        verify: cli.verify,
        dump_after: cli.dump_after,
        ..BackendConfig::default()
    };
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let compiler = Compiler::new(&session, config);
    let asm = compiler.compile_program(&mut program)?;

    let text = asm.to_string();
    match &cli.output {
        Some(path) => fs::write(path, text)?,
        None => print!("{}", text),
    }
    if cli.stats {
        eprint!("{}", session.stats());
    }
    Ok(())
}
