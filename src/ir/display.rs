//! Textual rendering of the IR.
//!
//! The output is a C-like listing meant for debugging dumps (`--dump-after`)
//! and test diagnostics. Instructions borrow their procedure to resolve
//! variable and label names, so rendering goes through small adapter structs.

use super::*;
use std::fmt::{self, Write};

/// Escape a string literal for both the IR listing and `.asciz` directives.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            c if (c as u32) < 32 || (c as u32) >= 127 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Renders a variable, with its register once coloured.
pub struct VarDisplay<'a> {
    proc: &'a Procedure,
    var: VarId,
}

impl fmt::Display for VarDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let var = self.proc.var(self.var);
        match var.reg {
            Some(reg) => write!(f, "{} {{{}}}", var.name, reg),
            None => f.write_str(&var.name),
        }
    }
}

pub struct RvalDisplay<'a> {
    proc: &'a Procedure,
    rval: &'a Rval,
}

impl fmt::Display for RvalDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rval {
            Rval::Str(s) => write!(f, "\"{}\"", escape_string(s)),
            Rval::Int(i) => write!(f, "{}", i),
            Rval::Bool(b) => write!(f, "{}", b),
            Rval::Null => f.write_str("NULL"),
            Rval::Var(v) => write!(f, "{}", self.proc.display_var(*v)),
        }
    }
}

pub struct InstDisplay<'a> {
    proc: &'a Procedure,
    inst: &'a Inst,
}

impl InstDisplay<'_> {
    fn web_of(&self, var: VarId) -> String {
        self.proc
            .var(var)
            .web
            .map_or_else(|| "null".to_string(), |w| w.to_string())
    }

    fn list<T>(
        &self,
        f: &mut fmt::Formatter<'_>,
        items: impl IntoIterator<Item = T>,
        mut each: impl FnMut(&mut fmt::Formatter<'_>, T) -> fmt::Result,
    ) -> fmt::Result {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            each(f, item)?;
        }
        Ok(())
    }
}

impl fmt::Display for InstDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.proc;
        match self.inst {
            Inst::Label(label) => write!(f, "{}:", p.label_name(*label)),
            Inst::Cmp { op, a, b, target } => write!(
                f,
                "if ({} {} {}) goto {};",
                p.display_rval(a),
                op.symbol(),
                p.display_rval(b),
                p.label_name(*target)
            ),
            Inst::Goto { target } => write!(f, "goto {};", p.label_name(*target)),
            Inst::Assign { dst, src } => {
                write!(f, "{} = {};", p.display_var(*dst), p.display_rval(src))
            }
            Inst::Binary { dst, op, a, b } => write!(
                f,
                "{} = {} {} {};",
                p.display_var(*dst),
                p.display_rval(a),
                op.symbol(),
                p.display_rval(b)
            ),
            Inst::Unary { dst, op, a } => write!(
                f,
                "{} = {}{};",
                p.display_var(*dst),
                op.symbol(),
                p.display_rval(a)
            ),
            Inst::FieldLoad { dst, base, field } => write!(
                f,
                "{} = {}.{};",
                p.display_var(*dst),
                p.display_rval(base),
                field
            ),
            Inst::FieldStore { base, field, src } => write!(
                f,
                "{}.{} = {};",
                p.display_var(*base),
                field,
                p.display_rval(src)
            ),
            Inst::Return { value: None } => f.write_str("return;"),
            Inst::Return { value: Some(v) } => write!(f, "return {};", p.display_rval(v)),
            Inst::Call { dst, callee, args } => {
                if let Some(dst) = dst {
                    write!(f, "{} = ", p.display_var(*dst))?;
                }
                write!(f, "{}(", callee.name())?;
                self.list(f, args, |f, a| write!(f, "{}", p.display_rval(a)))?;
                f.write_str(");")
            }
            Inst::CallPrep { defs, srcs, .. } => {
                self.list(f, defs, |f, v| write!(f, "{}", p.display_var(*v)))?;
                f.write_str(" = ")?;
                self.list(f, srcs, |f, v| write!(f, "{}", p.display_var(*v)))?;
                f.write_str(";")
            }
            Inst::Phi(phi) => {
                write!(
                    f,
                    "{} = {}(",
                    p.display_var(phi.dst),
                    if phi.memory { "PHIMEM" } else { "PHI" }
                )?;
                self.list(f, &phi.args, |f, arg| match arg {
                    Some(v) => write!(f, "{}", p.display_var(*v)),
                    None => f.write_str("null"),
                })?;
                f.write_str(");")?;
                if let Some(web) = p.var(phi.dst).web {
                    write!(f, " {}", web)?;
                }
                Ok(())
            }
            Inst::Spill { var } => {
                write!(f, "SPILL({}, {});", p.display_var(*var), self.web_of(*var))
            }
            Inst::Reload { dst } => {
                write!(f, "{} = RELOAD({});", p.display_var(*dst), self.web_of(*dst))
            }
            Inst::StackArg { var, index } => {
                write!(f, "STACKARG({}, {});", p.display_var(*var), index)
            }
        }
    }
}

impl Procedure {
    pub fn display_var(&self, var: VarId) -> VarDisplay<'_> {
        VarDisplay { proc: self, var }
    }

    pub fn display_rval<'a>(&'a self, rval: &'a Rval) -> RvalDisplay<'a> {
        RvalDisplay { proc: self, rval }
    }

    pub fn display_inst<'a>(&'a self, inst: &'a Inst) -> InstDisplay<'a> {
        InstDisplay { proc: self, inst }
    }

    /// Graphviz rendering of the control-flow graph.
    pub fn render_cfg(&self) -> String {
        let mut out = String::from("digraph cfg {\n");
        for block in &self.blocks {
            let from = self.label_name(block.label);
            for succ in block.succs() {
                let _ = writeln!(out, "  {} -> {};", from, self.block_name(succ));
            }
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret_ty, self.name)?;
        for (i, &arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", self.var(arg).ty, self.var_name(arg))?;
        }
        f.write_str(") {\n")?;
        for &local in &self.locals {
            writeln!(f, "  {} {};", self.var(local).ty, self.var_name(local))?;
        }
        f.write_str("\n")?;
        for block in &self.blocks {
            writeln!(f, "{}:", self.label_name(block.label))?;
            for inst in &block.insts {
                match inst {
                    Inst::Label(_) => writeln!(f, "{}", self.display_inst(inst))?,
                    _ => writeln!(f, "  {}", self.display_inst(inst))?,
                }
            }
        }
        f.write_str("}\n")
    }
}

impl fmt::Display for ClassLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class {} {{", self.name)?;
        for (name, ty) in &self.fields {
            writeln!(f, "  {} {};", ty, name)?;
        }
        f.write_str("}\n")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in &self.classes {
            write!(f, "{}", class)?;
        }
        for proc in &self.procedures {
            write!(f, "{}", proc)?;
        }
        Ok(())
    }
}
