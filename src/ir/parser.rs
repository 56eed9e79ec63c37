//! Parser for the linear textual IR.
//!
//! Accepts class layouts and procedures in the pre-SSA subset of the IR
//! listing syntax:
//!
//! ```text
//! class Node { Int val; Node next; }
//!
//! Int sum(Node n) {
//!   Int acc;
//!   Int v;
//!   acc = 0;
//! Loop:
//!   if (n == null) goto Done;
//!   v = n.val;
//!   acc = acc + v;
//!   n = n.next;
//!   goto Loop;
//! Done:
//!   return acc;
//! }
//! ```
//!
//! Each procedure comes out as a single block of linear instructions with
//! `Label` markers, ready for CFG construction. Calls to names that are not
//! procedures of the program are external calls.

use super::*;
use crate::core::error::{CompileError, CompileResult};
use std::collections::{HashMap, HashSet};

pub fn parse_program(text: &str) -> CompileResult<Program> {
    let parser = Parser::new(text);
    parser.parse()
}

const KEYWORDS: &[&str] = &["if", "goto", "return", "class", "true", "false", "null", "NULL"];

fn type_from_name(name: &str) -> Type {
    match name {
        "Int" | "int" => Type::Int,
        "Bool" | "bool" => Type::Bool,
        "String" => Type::Str,
        "Void" | "void" => Type::Void,
        other => Type::Class(other.to_string()),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    program: Program,

    // Per-procedure maps
    vars: HashMap<&'a str, VarId>,
    labels: HashMap<&'a str, LabelId>,
    defined_labels: HashSet<&'a str>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            program: Program::default(),
            vars: HashMap::new(),
            labels: HashMap::new(),
            defined_labels: HashSet::new(),
        }
    }

    fn parse(mut self) -> CompileResult<Program> {
        self.skip_whitespace();
        while !self.is_eof() {
            let result = if self.peek_keyword("class") {
                self.parse_class()
            } else {
                self.parse_procedure()
            };
            if let Err(message) = result {
                return Err(self.error_at(message));
            }
            self.skip_whitespace();
        }

        self.resolve_callees();
        Ok(self.program)
    }

    fn error_at(&self, message: String) -> CompileError {
        let consumed = &self.text[..self.pos.min(self.text.len())];
        let line = consumed.matches('\n').count() + 1;
        let column = consumed.rfind('\n').map_or(consumed.len(), |nl| consumed.len() - nl - 1) + 1;
        CompileError::Parse {
            line,
            column,
            message,
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.current_char() {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('/') if self.peek_char_at(1) == Some('/') => {
                    // Skip comment line
                    while let Some(ch) = self.current_char() {
                        self.advance();
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!(
                "Expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace();
        let start = self.pos;

        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' || ch == '%' => self.advance(),
            Some(ch) => return Err(format!("Expected identifier but found '{}'", ch)),
            None => return Err("Expected identifier but found EOF".to_string()),
        }

        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        Ok(&self.text[start..self.pos])
    }

    /// Look ahead for an identifier without consuming it.
    fn peek_identifier(&mut self) -> Option<&'a str> {
        let saved = self.pos;
        let ident = self.read_identifier().ok();
        self.pos = saved;
        ident
    }

    fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.peek_identifier() == Some(keyword)
    }

    /// Look at the first non-whitespace character after the next identifier.
    fn peek_after_identifier(&mut self) -> Option<char> {
        let saved = self.pos;
        let after = match self.read_identifier() {
            Ok(_) => {
                self.skip_whitespace();
                self.current_char()
            }
            Err(_) => None,
        };
        self.pos = saved;
        after
    }

    fn read_number(&mut self) -> Result<i32, String> {
        self.skip_whitespace();
        let start = self.pos;
        if self.current_char() == Some('-') {
            self.advance();
        }
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        let number_str = &self.text[start..self.pos];
        number_str
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", number_str, e))
    }

    fn read_string(&mut self) -> Result<String, String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            let ch = self
                .current_char()
                .ok_or_else(|| "Unterminated string literal".to_string())?;
            self.advance();
            match ch {
                '"' => return Ok(out),
                '\\' => {
                    let esc = self
                        .current_char()
                        .ok_or_else(|| "Unterminated escape".to_string())?;
                    self.advance();
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        '\\' | '"' | '\'' => out.push(esc),
                        'x' => {
                            let start = self.pos;
                            self.advance();
                            self.advance();
                            let hex = self.text.get(start..self.pos).unwrap_or("");
                            let code = u32::from_str_radix(hex, 16)
                                .map_err(|e| format!("Bad hex escape '{}': {}", hex, e))?;
                            out.push(char::from_u32(code).unwrap_or('?'));
                        }
                        other => return Err(format!("Unknown escape '\\{}'", other)),
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn parse_type(&mut self) -> Result<Type, String> {
        let name = self.read_identifier()?;
        Ok(type_from_name(name))
    }

    fn parse_class(&mut self) -> Result<(), String> {
        self.read_identifier()?; // class
        let name = self.read_identifier()?;
        if self.program.class(name).is_some() {
            return Err(format!("Duplicate class definition: '{}'", name));
        }
        self.expect('{')?;
        let mut fields = Vec::new();
        while !self.try_read('}') {
            let ty = self.parse_type()?;
            let field = self.read_identifier()?;
            self.expect(';')?;
            fields.push((field.to_string(), ty));
        }
        self.program.classes.push(ClassLayout {
            name: name.to_string(),
            fields,
        });
        Ok(())
    }

    fn parse_procedure(&mut self) -> Result<(), String> {
        let ret_ty = self.parse_type()?;
        let name = self.read_identifier()?;
        if self.program.procedure(name).is_some() {
            return Err(format!("Duplicate procedure definition: '{}'", name));
        }

        // Reset per-procedure state
        self.vars.clear();
        self.labels.clear();
        self.defined_labels.clear();

        let mut proc = Procedure::new(name, ret_ty);

        self.expect('(')?;
        if !self.try_read(')') {
            loop {
                let ty = self.parse_type()?;
                let arg = self.read_identifier()?;
                self.declare(&mut proc, arg, ty, true)?;
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }

        self.expect('{')?;
        let mut insts = Vec::new();
        while !self.try_read('}') {
            if self.is_eof() {
                return Err(format!("Unterminated body of procedure '{}'", name));
            }
            if let Some(inst) = self.parse_statement(&mut proc)? {
                insts.push(inst);
            }
        }
        proc.blocks[0].insts = insts;

        log::trace!(
            "parsed procedure {} ({} instructions)",
            proc.name,
            proc.inst_count()
        );
        self.program.procedures.push(proc);
        Ok(())
    }

    fn declare(
        &mut self,
        proc: &mut Procedure,
        name: &'a str,
        ty: Type,
        is_arg: bool,
    ) -> Result<(), String> {
        if self.vars.contains_key(name) {
            return Err(format!("Variable '{}' declared twice", name));
        }
        let id = if is_arg {
            proc.add_arg(name, ty)
        } else {
            proc.add_local(name, ty)
        };
        self.vars.insert(name, id);
        Ok(())
    }

    fn lookup_var(&self, name: &str) -> Result<VarId, String> {
        self.vars
            .get(name)
            .copied()
            .ok_or_else(|| format!("Undeclared variable '{}'", name))
    }

    fn label(&mut self, proc: &mut Procedure, name: &'a str) -> LabelId {
        *self
            .labels
            .entry(name)
            .or_insert_with(|| proc.new_label(name))
    }

    /// Parse one statement. Declarations produce no instruction.
    fn parse_statement(&mut self, proc: &mut Procedure) -> Result<Option<Inst>, String> {
        let ident = self.read_identifier()?;
        match ident {
            "if" => {
                self.expect('(')?;
                let a = self.parse_rval()?;
                let op = self.parse_cond_op()?;
                let b = self.parse_rval()?;
                self.expect(')')?;
                if self.read_identifier()? != "goto" {
                    return Err("Expected 'goto' after condition".to_string());
                }
                let target = self.read_identifier()?;
                self.expect(';')?;
                let target = self.label(proc, target);
                return Ok(Some(Inst::Cmp { op, a, b, target }));
            }
            "goto" => {
                let target = self.read_identifier()?;
                self.expect(';')?;
                let target = self.label(proc, target);
                return Ok(Some(Inst::Goto { target }));
            }
            "return" => {
                if self.try_read(';') {
                    return Ok(Some(Inst::Return { value: None }));
                }
                let value = self.parse_rval()?;
                self.expect(';')?;
                return Ok(Some(Inst::Return { value: Some(value) }));
            }
            _ => {}
        }

        if self.try_read(':') {
            if !self.defined_labels.insert(ident) {
                return Err(format!("Label '{}' defined twice", ident));
            }
            return Ok(Some(Inst::Label(self.label(proc, ident))));
        }

        // Declaration: `Type name;`
        if !KEYWORDS.contains(&ident) && self.peek_after_identifier() == Some(';') {
            let name = self.read_identifier()?;
            self.expect(';')?;
            self.declare(proc, name, type_from_name(ident), false)?;
            return Ok(None);
        }

        if self.try_read('(') {
            let args = self.parse_args()?;
            self.expect(';')?;
            return Ok(Some(Inst::Call {
                dst: None,
                callee: Callee::Extern(ident.to_string()),
                args,
            }));
        }

        if self.try_read('.') {
            let field = self.read_identifier()?;
            self.expect('=')?;
            let src = self.parse_rval()?;
            self.expect(';')?;
            return Ok(Some(Inst::FieldStore {
                base: self.lookup_var(ident)?,
                field: field.to_string(),
                src,
            }));
        }

        let dst = self.lookup_var(ident)?;
        self.expect('=')?;
        let inst = self.parse_assignment(dst)?;
        self.expect(';')?;
        Ok(Some(inst))
    }

    fn parse_assignment(&mut self, dst: VarId) -> Result<Inst, String> {
        self.skip_whitespace();

        // Negation of a variable; `-5` is a literal.
        if self.current_char() == Some('-')
            && !self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            self.advance();
            let a = self.parse_rval()?;
            return Ok(Inst::Unary {
                dst,
                op: UnaryOp::Neg,
                a,
            });
        }

        if self.peek_identifier().is_some()
            && self.peek_after_identifier() == Some('(')
            && !self.peek_keyword("true")
            && !self.peek_keyword("false")
        {
            let callee = self.read_identifier()?;
            self.expect('(')?;
            let args = self.parse_args()?;
            return Ok(Inst::Call {
                dst: Some(dst),
                callee: Callee::Extern(callee.to_string()),
                args,
            });
        }

        let a = self.parse_rval()?;
        if self.try_read('.') {
            let field = self.read_identifier()?;
            return Ok(Inst::FieldLoad {
                dst,
                base: a,
                field: field.to_string(),
            });
        }

        let op = if self.try_read('+') {
            BinaryOp::Plus
        } else if self.try_read('-') {
            BinaryOp::Minus
        } else if self.try_read('*') {
            BinaryOp::Mul
        } else if self.try_read('/') {
            BinaryOp::Div
        } else if self.peek_keyword("RSB") {
            self.read_identifier()?;
            BinaryOp::Rsb
        } else {
            return Ok(Inst::Assign { dst, src: a });
        };
        let b = self.parse_rval()?;
        Ok(Inst::Binary { dst, op, a, b })
    }

    fn parse_args(&mut self) -> Result<Vec<Rval>, String> {
        let mut args = Vec::new();
        if self.try_read(')') {
            return Ok(args);
        }
        loop {
            args.push(self.parse_rval()?);
            if self.try_read(')') {
                return Ok(args);
            }
            self.expect(',')?;
        }
    }

    fn parse_cond_op(&mut self) -> Result<CondOp, String> {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        let (op, len) = if rest.starts_with("<=") {
            (CondOp::Le, 2)
        } else if rest.starts_with(">=") {
            (CondOp::Ge, 2)
        } else if rest.starts_with("==") {
            (CondOp::Eq, 2)
        } else if rest.starts_with("!=") {
            (CondOp::Ne, 2)
        } else if rest.starts_with('<') {
            (CondOp::Lt, 1)
        } else if rest.starts_with('>') {
            (CondOp::Gt, 1)
        } else {
            return Err(format!(
                "Expected comparison operator but found {:?}",
                self.current_char()
            ));
        };
        self.pos += len;
        Ok(op)
    }

    fn parse_rval(&mut self) -> Result<Rval, String> {
        self.skip_whitespace();
        match self.current_char() {
            Some('"') => Ok(Rval::Str(self.read_string()?)),
            Some(ch) if ch.is_ascii_digit() || ch == '-' => Ok(Rval::Int(self.read_number()?)),
            Some(_) => {
                let ident = self.read_identifier()?;
                Ok(match ident {
                    "true" => Rval::Bool(true),
                    "false" => Rval::Bool(false),
                    "null" | "NULL" => Rval::Null,
                    name => Rval::Var(self.lookup_var(name)?),
                })
            }
            None => Err("Expected operand but found EOF".to_string()),
        }
    }

    /// Calls parse as external; retarget the ones naming a procedure of the program.
    fn resolve_callees(&mut self) {
        let names: Vec<String> = self.program.procedures.iter().map(|p| p.name.clone()).collect();
        for proc in &mut self.program.procedures {
            for block in &mut proc.blocks {
                for inst in &mut block.insts {
                    if let Inst::Call { callee, .. } = inst {
                        if let Callee::Extern(name) = callee {
                            if names.iter().any(|n| n == name) {
                                *callee = Callee::Procedure(name.clone());
                            }
                        }
                    }
                }
            }
        }
    }
}
