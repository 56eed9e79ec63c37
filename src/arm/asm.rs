// Target description of the 32-bit ARM subset the code generator emits. Instructions are kept
// as a closed enum with register operands already resolved, grouped into named blocks, and
// rendered in GNU assembler syntax. The flexible second operand ("operand2") of data-processing
// instructions can only encode an 8-bit value rotated right by an even amount; every immediate
// operand goes through `Operand2::imm`, which rejects anything else, so an unencodable constant
// is caught when the instruction is built rather than by the assembler. Wide constants take the
// 16-bit `mov` form or a literal-pool `ldr`.

//! ARM instructions, operands and assembly rendering.

use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{Reg, RegBitSet};
use crate::ir::display::escape_string;
use crate::ir::CondOp;
use std::collections::BTreeSet;
use std::fmt;

/// Condition code suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Hs,
    Lo,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
}

impl Cond {
    pub fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Hs => "hs",
            Cond::Lo => "lo",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "",
        }
    }
}

impl From<CondOp> for Cond {
    fn from(op: CondOp) -> Self {
        match op {
            CondOp::Lt => Cond::Lt,
            CondOp::Gt => Cond::Gt,
            CondOp::Le => Cond::Le,
            CondOp::Ge => Cond::Ge,
            CondOp::Eq => Cond::Eq,
            CondOp::Ne => Cond::Ne,
        }
    }
}

/// Can `value` be encoded as an 8-bit constant rotated right by an even
/// number of bits?
pub fn is_valid_operand2(value: i32) -> bool {
    let bits = value as u32;
    if bits == 0 {
        return true;
    }
    // Rotations of 0 or >= 8 bits are plain left shifts by an even amount
    let shift = bits.trailing_zeros() & !1;
    if bits & !(0xffu32 << shift) == 0 {
        return true;
    }
    // Rotations by 2, 4 and 6 wrap part of the byte around to the top
    bits & !0xc000_003f == 0 || bits & !0xf000_000f == 0 || bits & !0xfc00_0003 == 0
}

/// Flexible second operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand2 {
    Imm(i32),
    Reg(Reg),
}

impl Operand2 {
    /// Immediate operand, checked against the rotated-immediate encoding.
    pub fn imm(value: i32) -> CompileResult<Self> {
        if is_valid_operand2(value) {
            Ok(Operand2::Imm(value))
        } else {
            Err(CompileError::InvalidImmediate { value })
        }
    }
}

impl From<Reg> for Operand2 {
    fn from(reg: Reg) -> Self {
        Operand2::Reg(reg)
    }
}

impl fmt::Display for Operand2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand2::Imm(i) => write!(f, "#{}", i),
            Operand2::Reg(reg) => write!(f, "{}", reg),
        }
    }
}

/// One target instruction or data directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Add { dst: Reg, a: Reg, b: Operand2 },
    Sub { dst: Reg, a: Reg, b: Operand2 },
    Rsb { dst: Reg, a: Reg, b: Operand2 },
    Mul { dst: Reg, a: Reg, b: Reg },
    Mov { cond: Cond, dst: Reg, src: Operand2 },
    /// 16-bit immediate move.
    MovWide { dst: Reg, value: i32 },
    B { cond: Cond, label: String },
    Bl { cond: Cond, label: String },
    Bx { cond: Cond, reg: Reg },
    Ldr { reg: Reg, mem: Reg, offset: i32 },
    /// Literal-pool load of a constant.
    LdrConst { reg: Reg, value: i32 },
    /// Literal-pool load of a label address.
    LdrLabel { reg: Reg, label: String },
    Str { reg: Reg, mem: Reg, offset: i32 },
    Cmp { cond: Cond, a: Reg, b: Operand2 },
    Push(RegBitSet),
    Pop(RegBitSet),
    Asciz(String),
}

impl Instr {
    /// `mov dst, src` between registers.
    pub fn mov(dst: Reg, src: Reg) -> Self {
        Instr::Mov {
            cond: Cond::Al,
            dst,
            src: Operand2::Reg(src),
        }
    }

    pub fn mov_wide(dst: Reg, value: i32) -> CompileResult<Self> {
        if !(0..=65535).contains(&value) {
            return Err(CompileError::MalformedInstruction {
                reason: format!("16-bit move of {}", value),
            });
        }
        Ok(Instr::MovWide { dst, value })
    }

    /// Unconditional branch.
    pub fn b(label: impl Into<String>) -> Self {
        Instr::B {
            cond: Cond::Al,
            label: label.into(),
        }
    }

    pub fn push(regs: RegBitSet) -> CompileResult<Self> {
        if regs.is_empty() {
            return Err(CompileError::MalformedInstruction {
                reason: "push with an empty register list".to_string(),
            });
        }
        Ok(Instr::Push(regs))
    }

    pub fn pop(regs: RegBitSet) -> CompileResult<Self> {
        if regs.is_empty() {
            return Err(CompileError::MalformedInstruction {
                reason: "pop with an empty register list".to_string(),
            });
        }
        Ok(Instr::Pop(regs))
    }

    /// Mnemonic without condition suffix, used for statistics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::Add { .. } => "add",
            Instr::Sub { .. } => "sub",
            Instr::Rsb { .. } => "rsb",
            Instr::Mul { .. } => "mul",
            Instr::Mov { .. } | Instr::MovWide { .. } => "mov",
            Instr::B { .. } => "b",
            Instr::Bl { .. } => "bl",
            Instr::Bx { .. } => "bx",
            Instr::Ldr { .. } | Instr::LdrConst { .. } | Instr::LdrLabel { .. } => "ldr",
            Instr::Str { .. } => "str",
            Instr::Cmp { .. } => "cmp",
            Instr::Push(_) => "push",
            Instr::Pop(_) => "pop",
            Instr::Asciz(_) => ".asciz",
        }
    }
}

fn write_mem(f: &mut fmt::Formatter<'_>, mem: Reg, offset: i32) -> fmt::Result {
    if offset == 0 {
        write!(f, "[{}]", mem)
    } else {
        write!(f, "[{}, #{}]", mem, offset)
    }
}

fn write_reglist(f: &mut fmt::Formatter<'_>, regs: &RegBitSet) -> fmt::Result {
    f.write_str("{")?;
    for (i, reg) in regs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", reg)?;
    }
    f.write_str("}")
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Add { dst, a, b } => write!(f, "add {}, {}, {}", dst, a, b),
            Instr::Sub { dst, a, b } => write!(f, "sub {}, {}, {}", dst, a, b),
            Instr::Rsb { dst, a, b } => write!(f, "rsb {}, {}, {}", dst, a, b),
            Instr::Mul { dst, a, b } => write!(f, "mul {}, {}, {}", dst, a, b),
            Instr::Mov { cond, dst, src } => write!(f, "mov{} {}, {}", cond.suffix(), dst, src),
            Instr::MovWide { dst, value } => write!(f, "mov {}, #{}", dst, value),
            Instr::B { cond, label } => write!(f, "b{} {}", cond.suffix(), label),
            Instr::Bl { cond, label } => write!(f, "bl{} {}", cond.suffix(), label),
            Instr::Bx { cond, reg } => write!(f, "bx{} {}", cond.suffix(), reg),
            Instr::Ldr { reg, mem, offset } => {
                write!(f, "ldr {}, ", reg)?;
                write_mem(f, *mem, *offset)
            }
            Instr::LdrConst { reg, value } => write!(f, "ldr {}, ={}", reg, value),
            Instr::LdrLabel { reg, label } => write!(f, "ldr {}, ={}", reg, label),
            Instr::Str { reg, mem, offset } => {
                write!(f, "str {}, ", reg)?;
                write_mem(f, *mem, *offset)
            }
            Instr::Cmp { cond, a, b } => write!(f, "cmp{} {}, {}", cond.suffix(), a, b),
            Instr::Push(regs) => {
                f.write_str("push ")?;
                write_reglist(f, regs)
            }
            Instr::Pop(regs) => {
                f.write_str("pop ")?;
                write_reglist(f, regs)
            }
            Instr::Asciz(s) => write!(f, ".asciz \"{}\"", escape_string(s)),
        }
    }
}

/// A labelled run of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmBlock {
    pub name: String,
    pub instrs: Vec<Instr>,
    /// Procedure entry points are set apart by a blank line.
    pub special: bool,
}

impl ArmBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instrs: Vec::new(),
            special: false,
        }
    }
}

impl fmt::Display for ArmBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.special {
            writeln!(f)?;
        }
        writeln!(f, "{}:", self.name)?;
        for instr in &self.instrs {
            writeln!(f, "    {}", instr)?;
        }
        Ok(())
    }
}

/// A complete assembly program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArmProgram {
    pub text_blocks: Vec<ArmBlock>,
    pub data_blocks: Vec<ArmBlock>,
    /// Exported and imported symbols, kept sorted.
    pub globals: BTreeSet<String>,
}

impl ArmProgram {
    pub fn instr_count(&self) -> usize {
        self.text_blocks.iter().map(|b| b.instrs.len()).sum()
    }

    pub fn text_block(&self, name: &str) -> Option<&ArmBlock> {
        self.text_blocks.iter().find(|b| b.name == name)
    }
}

impl fmt::Display for ArmProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            writeln!(f, "    .global {}", global)?;
        }
        write!(f, "\n    .text\n")?;
        for block in &self.text_blocks {
            write!(f, "{}", block)?;
        }
        write!(f, "\n    .data\n")?;
        for block in &self.data_blocks {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}
