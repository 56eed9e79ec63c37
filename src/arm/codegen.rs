// This module turns colored procedures into ARM assembly. Each procedure becomes a prologue block
// named after the procedure, one block per IR block and a shared epilogue block. The prologue
// pushes the callee-saved registers the procedure touches, allocates the frame computed by
// FrameLayout and jumps to the first block; every return places its value in r0 and branches
// to the epilogue, which releases the frame and returns through a single `pop {.., pc}` when lr
// was saved, or `bx lr` otherwise.
//
// Blocks are laid out by a depth-first walk that visits the taken branch before the fallthrough
// and emitted in reverse postorder, so the fallthrough successor of a compare tends to follow
// it directly. Every IR instruction maps onto a short fixed sequence. Phi instructions emit
// nothing: at each goto the values flowing into the target's register phis, together with
// every other value live across the edge, are moved into place by one parallel copy, and a
// call-prep is likewise a parallel copy from the values' old registers to their new ones.
// Spills and reloads address the slot of the value's phi-web. Operations whose operands are all
// constant are folded here, and string literals are collected into deduplicated `.asciz`
// data blocks.

//! ARM code generation.

use super::asm::{is_valid_operand2, ArmBlock, ArmProgram, Cond, Instr, Operand2};
use super::calling_convention::{caller_saved, FrameLayout, FRAME_SCRATCH, RESULT_REG};
use super::parallel_copy::sequentialize;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{Reg, RegBitSet};
use crate::core::session::CompilationSession;
use crate::ir::{BinaryOp, BlockId, Callee, Inst, Procedure, Program, Rval, Type, UnaryOp, VarId};
use crate::passes::liveness::Liveness;
use hashbrown::HashMap;

/// Assembly label of a procedure's entry point.
pub fn procedure_label(name: &str) -> String {
    if name == "main" {
        name.to_string()
    } else {
        format!(".{}", name.replace('%', "__"))
    }
}

/// Generate assembly for every procedure of a colored program.
pub fn generate_program(program: &Program, session: &CompilationSession<'_>) -> CompileResult<ArmProgram> {
    let mut gen = CodeGenerator::new(session);
    for proc in &program.procedures {
        gen.generate_procedure(program, proc)?;
    }
    Ok(gen.finish())
}

/// Program-wide code generation state.
pub struct CodeGenerator<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    asm: ArmProgram,
    next_label: usize,
    /// Label of each string literal's data block.
    strings: HashMap<String, String>,
}

impl<'s, 'arena> CodeGenerator<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>) -> Self {
        let mut asm = ArmProgram::default();
        asm.globals.insert("main".to_string());
        Self {
            session,
            asm,
            next_label: 0,
            strings: HashMap::new(),
        }
    }

    fn gen_label(&mut self) -> String {
        let label = format!(".L{}", self.next_label);
        self.next_label += 1;
        label
    }

    /// Label of the data block holding `s`, created on first use.
    fn string_label(&mut self, s: &str) -> String {
        if let Some(label) = self.strings.get(s) {
            return label.clone();
        }
        let label = self.gen_label();
        let mut block = ArmBlock::new(label.clone());
        block.instrs.push(Instr::Asciz(s.to_string()));
        self.asm.data_blocks.push(block);
        self.strings.insert(s.to_string(), label.clone());
        label
    }

    pub fn generate_procedure(&mut self, program: &Program, proc: &Procedure) -> CompileResult<()> {
        let first_block = self.asm.text_blocks.len();
        let frame = FrameLayout::compute(proc, self.session.arena())?;
        let block_labels: Vec<String> = proc.block_ids().map(|_| self.gen_label()).collect();
        let order = layout_order(proc);
        let epilogue = self.gen_label();

        let mut clobberable = caller_saved();
        clobberable.union(&frame.callee_saved);
        let mut spare = clobberable;
        spare.subtract(&RegBitSet::from_regs([Reg::LR]));

        let mut gen = ProcedureGen {
            cg: self,
            program,
            proc,
            live: Liveness::compute(proc),
            frame: &frame,
            block_labels: &block_labels,
            epilogue: &epilogue,
            clobberable: spare,
            out: Vec::new(),
        };

        gen.prologue(&order)?;
        gen.flush(procedure_label(&proc.name), true);
        for &block in &order {
            for inst in &proc.block(block).insts {
                gen.inst(block, inst)?;
            }
            gen.flush(block_labels[block.index()].clone(), false);
        }
        gen.epilogue()?;
        gen.flush(epilogue.clone(), false);

        for block in &self.asm.text_blocks[first_block..] {
            for instr in &block.instrs {
                self.session.record_instruction_emitted(instr.mnemonic());
            }
        }
        log::debug!(
            "codegen: {} emitted {} blocks",
            proc.name,
            self.asm.text_blocks.len() - first_block
        );
        Ok(())
    }

    pub fn finish(self) -> ArmProgram {
        self.asm
    }
}

/// Blocks in reverse postorder of a depth-first walk that takes the
/// branch target before the fallthrough.
fn layout_order(proc: &Procedure) -> Vec<BlockId> {
    let mut visited = vec![false; proc.blocks.len()];
    let mut postorder = Vec::with_capacity(proc.blocks.len());
    let entry = proc.entry();
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited[entry.index()] = true;

    while let Some((block, next)) = stack.pop() {
        let b = proc.block(block);
        let succs = [b.cond, b.direct];
        match succs[next..].iter().position(|s| s.is_some_and(|s| !visited[s.index()])) {
            Some(offset) => {
                let i = next + offset;
                stack.push((block, i + 1));
                if let Some(succ) = succs[i] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            }
            None => postorder.push(block),
        }
    }
    postorder.reverse();
    postorder
}

/// Code generation state of one procedure.
struct ProcedureGen<'g, 's, 'arena, 'p> {
    cg: &'g mut CodeGenerator<'s, 'arena>,
    program: &'p Program,
    proc: &'p Procedure,
    live: Liveness,
    frame: &'p FrameLayout<'arena>,
    block_labels: &'p [String],
    epilogue: &'p str,
    /// Spare registers parallel copies may clobber.
    clobberable: RegBitSet,
    out: Vec<Instr>,
}

impl ProcedureGen<'_, '_, '_, '_> {
    fn flush(&mut self, name: String, special: bool) {
        let mut block = ArmBlock::new(name);
        block.special = special;
        block.instrs = std::mem::take(&mut self.out);
        self.cg.asm.text_blocks.push(block);
    }

    fn reg(&self, var: VarId) -> CompileResult<Reg> {
        self.proc.var(var).reg.ok_or_else(|| CompileError::UnassignedRegister {
            var: self.proc.var_name(var).to_string(),
        })
    }

    fn label(&self, block: Option<BlockId>, what: &str, from: BlockId) -> CompileResult<String> {
        block
            .map(|b| self.block_labels[b.index()].clone())
            .ok_or_else(|| CompileError::MalformedInstruction {
                reason: format!("block {} has no {} successor", self.proc.block_name(from), what),
            })
    }

    fn slot(&self, var: VarId) -> CompileResult<i32> {
        self.proc
            .var(var)
            .web
            .and_then(|web| self.frame.slot(web))
            .ok_or_else(|| CompileError::MissingPhiWeb {
                var: self.proc.var_name(var).to_string(),
            })
    }

    fn field_offset(&self, base: VarId, field: &str) -> CompileResult<i32> {
        let class = match &self.proc.var(base).ty {
            Type::Class(name) => self.program.class(name),
            _ => None,
        };
        class
            .and_then(|c| c.field_offset(field))
            .ok_or_else(|| CompileError::MalformedInstruction {
                reason: format!("{} has no field {}", self.proc.var_name(base), field),
            })
    }

    fn emit_int(&mut self, dst: Reg, value: i32) -> CompileResult<()> {
        if is_valid_operand2(value) {
            self.out.push(Instr::Mov {
                cond: Cond::Al,
                dst,
                src: Operand2::imm(value)?,
            });
        } else if (0..=65535).contains(&value) {
            self.out.push(Instr::mov_wide(dst, value)?);
        } else {
            self.out.push(Instr::LdrConst { reg: dst, value });
        }
        Ok(())
    }

    fn emit_assign(&mut self, dst: Reg, src: &Rval) -> CompileResult<()> {
        match src {
            Rval::Var(v) => {
                let reg = self.reg(*v)?;
                if reg != dst {
                    self.out.push(Instr::mov(dst, reg));
                }
                Ok(())
            }
            Rval::Str(s) => {
                let label = self.cg.string_label(s);
                self.out.push(Instr::LdrLabel { reg: dst, label });
                Ok(())
            }
            constant => self.emit_int(dst, int_constant(constant)?),
        }
    }

    /// Register holding a non-constant operand.
    fn operand_reg(&self, rval: &Rval) -> CompileResult<Reg> {
        match rval {
            Rval::Var(v) => self.reg(*v),
            other => Err(CompileError::MalformedInstruction {
                reason: format!("operand {} is not in a register", self.proc.display_rval(other)),
            }),
        }
    }

    fn operand2(&self, rval: &Rval) -> CompileResult<Operand2> {
        match rval {
            Rval::Var(v) => Ok(Operand2::Reg(self.reg(*v)?)),
            constant => Operand2::imm(int_constant(constant)?),
        }
    }

    fn stack_adjust(&mut self, subtract: bool) -> CompileResult<()> {
        let amount = self.frame.stack_adjust;
        if amount == 0 {
            return Ok(());
        }
        let b = if is_valid_operand2(amount) {
            Operand2::imm(amount)?
        } else {
            self.emit_int(FRAME_SCRATCH, amount)?;
            Operand2::Reg(FRAME_SCRATCH)
        };
        self.out.push(if subtract {
            Instr::Sub { dst: Reg::SP, a: Reg::SP, b }
        } else {
            Instr::Add { dst: Reg::SP, a: Reg::SP, b }
        });
        Ok(())
    }

    fn prologue(&mut self, order: &[BlockId]) -> CompileResult<()> {
        if !self.frame.callee_saved.is_empty() {
            self.out.push(Instr::push(self.frame.callee_saved)?);
        }
        self.stack_adjust(true)?;
        let first = match order.first() {
            Some(b) => self.block_labels[b.index()].clone(),
            None => self.epilogue.to_string(),
        };
        self.out.push(Instr::b(first));
        Ok(())
    }

    fn epilogue(&mut self) -> CompileResult<()> {
        self.stack_adjust(false)?;
        let is_main = self.proc.name == "main";
        let mut saved = self.frame.callee_saved;
        if self.frame.saves_lr() {
            if is_main {
                self.emit_int(Reg::R0, 0)?;
            }
            // Return straight through the saved lr
            saved.clear(Reg::LR);
            saved.set(Reg::PC);
            self.out.push(Instr::pop(saved)?);
        } else {
            if !saved.is_empty() {
                self.out.push(Instr::pop(saved)?);
            }
            if is_main {
                self.emit_int(Reg::R0, 0)?;
            }
            self.out.push(Instr::Bx {
                cond: Cond::Al,
                reg: Reg::LR,
            });
        }
        Ok(())
    }

    fn parallel_copy(&mut self, copies: &[(Reg, Reg)]) -> CompileResult<()> {
        let outcome = sequentialize(copies, self.clobberable, &mut self.out)?;
        if outcome.moves > 0 {
            self.cg
                .session
                .record_parallel_copy(outcome.cycles_broken, outcome.borrowed_lr);
        }
        Ok(())
    }

    /// Copies realising the target's register phis on the edge out of
    /// `block`, plus identity copies pinning everything else live across it.
    fn edge_copies(&self, block: BlockId, target: BlockId) -> CompileResult<Vec<(Reg, Reg)>> {
        let mut copies = Vec::new();
        let mut phi_sources = Vec::new();
        let target_block = self.proc.block(target);
        if let Some(slot) = target_block.pred_index(block) {
            for phi in target_block.phis().filter(|p| !p.memory) {
                if let Some(arg) = phi.args[slot] {
                    copies.push((self.reg(arg)?, self.reg(phi.dst)?));
                    phi_sources.push(arg);
                }
            }
        }
        for v in self.live.live_out(block).iter() {
            if !phi_sources.contains(&v) {
                let reg = self.reg(v)?;
                copies.push((reg, reg));
            }
        }
        Ok(copies)
    }

    fn inst(&mut self, block: BlockId, inst: &Inst) -> CompileResult<()> {
        match inst {
            Inst::Cmp { op, a, b, .. } => {
                let b_ = self.proc.block(block);
                let target = self.label(b_.cond, "branch", block)?;
                let fallthrough = self.label(b_.direct, "fallthrough", block)?;
                if let (Some(x), Some(y)) = (a.int_value(), b.int_value()) {
                    let label = if op.evaluate(x, y) { target } else { fallthrough };
                    self.out.push(Instr::b(label));
                    return Ok(());
                }
                let a = self.operand_reg(a)?;
                let b = self.operand2(b)?;
                self.out.push(Instr::Cmp { cond: Cond::Al, a, b });
                self.out.push(Instr::B {
                    cond: Cond::from(*op),
                    label: target,
                });
                self.out.push(Instr::b(fallthrough));
            }
            Inst::Goto { .. } => {
                let direct = self.proc.block(block).direct;
                let target = self.label(direct, "goto", block)?;
                if let Some(succ) = direct {
                    let copies = self.edge_copies(block, succ)?;
                    self.parallel_copy(&copies)?;
                }
                self.out.push(Instr::b(target));
            }
            Inst::Assign { dst, src } => {
                let dst = self.reg(*dst)?;
                self.emit_assign(dst, src)?;
            }
            Inst::Binary { dst, op, a, b } => {
                let dst = self.reg(*dst)?;
                if let (Some(x), Some(y)) = (a.int_value(), b.int_value()) {
                    let value = op.evaluate(x, y).ok_or_else(|| CompileError::MalformedInstruction {
                        reason: format!("constant {} {} {} does not fold", x, op.symbol(), y),
                    })?;
                    return self.emit_int(dst, value);
                }
                let a = self.operand_reg(a)?;
                let instr = match op {
                    BinaryOp::Plus => Instr::Add { dst, a, b: self.operand2(b)? },
                    BinaryOp::Minus => Instr::Sub { dst, a, b: self.operand2(b)? },
                    BinaryOp::Rsb => Instr::Rsb { dst, a, b: self.operand2(b)? },
                    BinaryOp::Mul => Instr::Mul { dst, a, b: self.operand_reg(b)? },
                    BinaryOp::Div => {
                        return Err(CompileError::MalformedInstruction {
                            reason: "division reached code generation".to_string(),
                        })
                    }
                };
                self.out.push(instr);
            }
            Inst::Unary { dst, op: UnaryOp::Neg, a } => {
                let dst = self.reg(*dst)?;
                match a.int_value() {
                    Some(x) => self.emit_int(dst, x.wrapping_neg())?,
                    None => {
                        let a = self.operand_reg(a)?;
                        self.out.push(Instr::Rsb { dst, a, b: Operand2::Imm(0) });
                    }
                }
            }
            Inst::FieldLoad { dst, base, field } => {
                let base_var = base.as_var().ok_or_else(|| CompileError::MalformedInstruction {
                    reason: format!("field load of {} from a constant", field),
                })?;
                let offset = self.field_offset(base_var, field)?;
                self.out.push(Instr::Ldr {
                    reg: self.reg(*dst)?,
                    mem: self.reg(base_var)?,
                    offset,
                });
            }
            Inst::FieldStore { base, field, src } => {
                let offset = self.field_offset(*base, field)?;
                self.out.push(Instr::Str {
                    reg: self.operand_reg(src)?,
                    mem: self.reg(*base)?,
                    offset,
                });
            }
            Inst::Return { value } => {
                if let Some(value) = value {
                    self.emit_assign(RESULT_REG, value)?;
                }
                self.out.push(Instr::b(self.epilogue));
            }
            Inst::Call { dst, callee, .. } => {
                let label = match callee {
                    Callee::Procedure(name) => procedure_label(name),
                    Callee::Extern(name) => {
                        let symbol = self.cg.session.intern_str(name);
                        self.cg.asm.globals.insert(symbol.to_string());
                        symbol.to_string()
                    }
                };
                self.out.push(Instr::Bl { cond: Cond::Al, label });
                if let Some(dst) = dst {
                    if let Some(reg) = self.proc.var(*dst).reg {
                        if reg != RESULT_REG {
                            self.out.push(Instr::mov(reg, RESULT_REG));
                        }
                    }
                }
            }
            Inst::CallPrep { defs, srcs, .. } => {
                let mut copies = Vec::with_capacity(defs.len());
                for (&def, &src) in defs.iter().zip(srcs) {
                    copies.push((self.reg(src)?, self.reg(def)?));
                }
                self.parallel_copy(&copies)?;
            }
            Inst::Phi(_) => {}
            Inst::Spill { var } => {
                let offset = self.slot(*var)?;
                self.out.push(Instr::Str { reg: self.reg(*var)?, mem: Reg::SP, offset });
            }
            Inst::Reload { dst } => {
                let offset = self.slot(*dst)?;
                self.out.push(Instr::Ldr { reg: self.reg(*dst)?, mem: Reg::SP, offset });
            }
            Inst::StackArg { var, index } => {
                self.out.push(Instr::Str {
                    reg: self.reg(*var)?,
                    mem: Reg::SP,
                    offset: (*index * 4) as i32,
                });
            }
            Inst::Label(_) => {
                return Err(CompileError::MalformedInstruction {
                    reason: format!("label marker left in block {}", self.proc.block_name(block)),
                })
            }
        }
        Ok(())
    }
}

/// Integer value of a constant operand: booleans are 1 or 0, null is 0.
fn int_constant(rval: &Rval) -> CompileResult<i32> {
    rval.int_value().ok_or_else(|| CompileError::MalformedInstruction {
        reason: "expected an integer constant".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BackendConfig;
    use crate::ir::parser::parse_program;
    use crate::Compiler;
    use bumpalo::Bump;

    fn compile(text: &str) -> ArmProgram {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let config = BackendConfig {
            verify: true,
            ..BackendConfig::default()
        };
        let mut program = parse_program(text).unwrap();
        Compiler::new(&session, config).compile_program(&mut program).unwrap()
    }

    fn all_instrs(asm: &ArmProgram) -> Vec<&Instr> {
        asm.text_blocks.iter().flat_map(|b| &b.instrs).collect()
    }

    #[test]
    fn test_procedure_labels() {
        assert_eq!(procedure_label("main"), "main");
        assert_eq!(procedure_label("f"), ".f");
        assert_eq!(procedure_label("%init"), ".__init");
    }

    #[test]
    fn test_leaf_procedure() {
        let asm = compile("Int add(Int a, Int b) {\n  Int s;\n  s = a + b;\n  return s;\n}\n");
        let prologue = asm.text_block(".add").unwrap();
        assert!(prologue.special);
        // Nothing to save, nothing to allocate: straight to the first block
        assert_eq!(prologue.instrs, vec![Instr::b(".L0")]);
        assert_eq!(asm.text_blocks[1].name, ".L0");

        let instrs = all_instrs(&asm);
        assert!(instrs.contains(&&Instr::Add {
            dst: Reg::R0,
            a: Reg::R0,
            b: Operand2::Reg(Reg::R1),
        }));
        let epilogue = asm.text_blocks.last().unwrap();
        assert_eq!(
            epilogue.instrs.last(),
            Some(&Instr::Bx {
                cond: Cond::Al,
                reg: Reg::LR
            })
        );
        assert!(asm.globals.contains("main"));
    }

    #[test]
    fn test_constant_operations_fold() {
        let asm = compile(
            "Int f() {\n  Int x;\n  x = 3 * 4;\n  if (1 < 2) goto Yes;\n  return 0;\nYes:\n  return x;\n}\n",
        );
        let instrs = all_instrs(&asm);
        assert!(!instrs.iter().any(|i| matches!(i, Instr::Mul { .. } | Instr::Cmp { .. })));
        assert!(instrs.iter().any(|i| matches!(i, Instr::Mov { src: Operand2::Imm(12), .. })));
    }

    #[test]
    fn test_wide_constants() {
        let asm = compile("Int f() {\n  Int x;\n  Int y;\n  x = 257;\n  y = 70000;\n  x = x + y;\n  return x;\n}\n");
        let instrs = all_instrs(&asm);
        assert!(instrs.iter().any(|i| matches!(i, Instr::MovWide { value: 257, .. })));
        assert!(instrs.iter().any(|i| matches!(i, Instr::LdrConst { value: 70000, .. })));
    }

    #[test]
    fn test_strings_are_deduplicated() {
        let asm = compile(
            "Void main() {\n  String s;\n  String t;\n  s = \"hi\";\n  t = \"hi\";\n  print(s);\n  print(t);\n  return;\n}\n",
        );
        assert_eq!(asm.data_blocks.len(), 1);
        assert_eq!(asm.data_blocks[0].instrs, vec![Instr::Asciz("hi".into())]);
        assert!(asm.globals.contains("print"));

        let prologue = asm.text_block("main").unwrap();
        assert!(matches!(prologue.instrs[0], Instr::Push(regs) if regs.contains(Reg::LR)));
        // main returns 0 and pops the saved lr straight into pc
        let epilogue = asm.text_blocks.last().unwrap();
        let n = epilogue.instrs.len();
        assert!(matches!(epilogue.instrs[n - 2], Instr::Mov { dst: Reg::R0, src: Operand2::Imm(0), .. }));
        assert!(matches!(epilogue.instrs[n - 1], Instr::Pop(regs) if regs.contains(Reg::PC) && !regs.contains(Reg::LR)));
    }

    #[test]
    fn test_branch_target_laid_out_first() {
        let asm = compile(
            "Int f(Int x) {\n  Int y;\n  if (x > 0) goto Then;\n  y = 2;\n  goto Join;\nThen:\n  y = 1;\nJoin:\n  return y;\n}\n",
        );
        let branch = asm
            .text_blocks
            .iter()
            .find(|b| b.instrs.iter().any(|i| matches!(i, Instr::Cmp { .. })))
            .unwrap();
        let n = branch.instrs.len();
        let Instr::B { cond: Cond::Gt, label: taken } = &branch.instrs[n - 2] else { panic!("expected bgt") };
        let Instr::B { label: fallthrough, .. } = &branch.instrs[n - 1] else { panic!("expected b") };
        let position = |name: &str| asm.text_blocks.iter().position(|b| b.name == name).unwrap();
        // Reverse postorder puts the fallthrough path before the taken path
        assert!(position(fallthrough) < position(taken));
    }
}
