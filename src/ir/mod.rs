// This module defines the intermediate representation every pass of the backend operates on.
// A Program is a set of class layouts plus procedures; each Procedure owns arenas of variables,
// labels and blocks, addressed by small copyable handles (VarId, LabelId, BlockId, WebId) so
// that blocks can name their predecessors and successors, and variables their phi-web, without
// any ownership cycles. Before CFG construction a procedure holds a single block of linear
// instructions with Label markers; afterwards each block ends in exactly one terminator and
// records its successors as `direct` (fallthrough or unconditional target) and `cond` (taken
// branch). Inst is a closed enum over every instruction kind the pipeline produces, with
// helpers exposing each kind's defined variables and used variables so passes can treat
// instructions uniformly. The textual renderer lives in `display` and the parser for the
// linear input subset in `parser`.

//! Arena-indexed IR for the SSA backend.

pub mod display;
pub mod parser;
pub mod var_set;

pub use var_set::VarSet;

use crate::core::register_file::Reg;
use std::fmt;

macro_rules! entity_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

entity_handle!(
    /// Handle of a variable in its procedure's variable arena.
    VarId
);
entity_handle!(
    /// Handle of a basic block; the entry block is always `BlockId::new(0)`.
    BlockId
);
entity_handle!(
    /// Handle of a phi-web (value-equivalence class).
    WebId
);
entity_handle!(
    /// Handle of a jump target label.
    LabelId
);

impl fmt::Display for WebId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "web{}", self.0)
    }
}

/// Source-level type of a variable or literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Str,
    Void,
    Null,
    Class(String),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("Int"),
            Type::Bool => f.write_str("Bool"),
            Type::Str => f.write_str("String"),
            Type::Void => f.write_str("Void"),
            Type::Null => f.write_str("null"),
            Type::Class(name) => f.write_str(name),
        }
    }
}

/// A typed SSA value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub ty: Type,
    /// Physical register, once coloured.
    pub reg: Option<Reg>,
    /// Phi-web membership, once computed.
    pub web: Option<WebId>,
}

/// An equivalence class of variables that must share one storage location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhiWeb {
    /// Set once any member is spilled or reloaded.
    pub need_stack: bool,
}

/// Operand of an instruction: a literal or a variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rval {
    Str(String),
    Int(i32),
    Bool(bool),
    Null,
    Var(VarId),
}

impl Rval {
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Rval::Var(v) => Some(*v),
            _ => None,
        }
    }

    /// True for literals whose value is known as an integer at code generation.
    pub fn is_constant(&self) -> bool {
        matches!(self, Rval::Int(_) | Rval::Bool(_) | Rval::Null)
    }

    /// Integer value of a constant operand.
    pub fn int_value(&self) -> Option<i32> {
        match self {
            Rval::Int(i) => Some(*i),
            Rval::Bool(b) => Some(*b as i32),
            Rval::Null => Some(0),
            _ => None,
        }
    }

    pub fn ty(&self, proc: &Procedure) -> Type {
        match self {
            Rval::Str(_) => Type::Str,
            Rval::Int(_) => Type::Int,
            Rval::Bool(_) => Type::Bool,
            Rval::Null => Type::Null,
            Rval::Var(v) => proc.var(*v).ty.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Plus,
    Minus,
    Mul,
    Div,
    /// Reverse subtract: `b - a`.
    Rsb,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rsb => "RSB",
        }
    }

    /// Fold two constants. Division by zero does not fold.
    pub fn evaluate(self, a: i32, b: i32) -> Option<i32> {
        match self {
            BinaryOp::Plus => Some(a.wrapping_add(b)),
            BinaryOp::Minus => Some(a.wrapping_sub(b)),
            BinaryOp::Rsb => Some(b.wrapping_sub(a)),
            BinaryOp::Mul => Some(a.wrapping_mul(b)),
            BinaryOp::Div => {
                if b == 0 {
                    None
                } else {
                    Some(a.wrapping_div(b))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl CondOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CondOp::Lt => "<",
            CondOp::Gt => ">",
            CondOp::Le => "<=",
            CondOp::Ge => ">=",
            CondOp::Eq => "==",
            CondOp::Ne => "!=",
        }
    }

    /// The condition that holds when the operands are swapped.
    pub fn flip(self) -> CondOp {
        match self {
            CondOp::Lt => CondOp::Gt,
            CondOp::Gt => CondOp::Lt,
            CondOp::Le => CondOp::Ge,
            CondOp::Ge => CondOp::Le,
            CondOp::Eq => CondOp::Eq,
            CondOp::Ne => CondOp::Ne,
        }
    }

    pub fn evaluate(self, a: i32, b: i32) -> bool {
        match self {
            CondOp::Lt => a < b,
            CondOp::Gt => a > b,
            CondOp::Le => a <= b,
            CondOp::Ge => a >= b,
            CondOp::Eq => a == b,
            CondOp::Ne => a != b,
        }
    }
}

/// Target of a call instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A procedure of the program being compiled.
    Procedure(String),
    /// An external symbol, e.g. a runtime-support routine.
    Extern(String),
}

impl Callee {
    pub fn name(&self) -> &str {
        match self {
            Callee::Procedure(name) | Callee::Extern(name) => name,
        }
    }
}

/// A phi instruction. `args[i]` flows in from the block's `preds[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    pub dst: VarId,
    /// The variable this phi merges, before renaming.
    pub original: VarId,
    /// `None` marks an argument with no reaching definition.
    pub args: Vec<Option<VarId>>,
    /// The merged value starts out in its stack slot.
    pub memory: bool,
}

/// One IR instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// Jump target marker; only present in linear (pre-CFG) form.
    Label(LabelId),
    Cmp {
        op: CondOp,
        a: Rval,
        b: Rval,
        target: LabelId,
    },
    Goto {
        target: LabelId,
    },
    Assign {
        dst: VarId,
        src: Rval,
    },
    Binary {
        dst: VarId,
        op: BinaryOp,
        a: Rval,
        b: Rval,
    },
    Unary {
        dst: VarId,
        op: UnaryOp,
        a: Rval,
    },
    FieldLoad {
        dst: VarId,
        base: Rval,
        field: String,
    },
    FieldStore {
        base: VarId,
        field: String,
        src: Rval,
    },
    Return {
        value: Option<Rval>,
    },
    Call {
        dst: Option<VarId>,
        callee: Callee,
        args: Vec<Rval>,
    },
    /// Parallel copy ahead of a call: `defs[i] = srcs[i]` for all i at once.
    /// The first `num_args` definitions are the call's register arguments.
    CallPrep {
        defs: Vec<VarId>,
        srcs: Vec<VarId>,
        num_args: usize,
    },
    Phi(Phi),
    Spill {
        var: VarId,
    },
    Reload {
        dst: VarId,
    },
    /// Store an outgoing call argument to the caller's stack area.
    StackArg {
        var: VarId,
        index: usize,
    },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Cmp { .. } | Inst::Goto { .. } | Inst::Return { .. }
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Inst::Call { .. })
    }

    pub fn as_phi(&self) -> Option<&Phi> {
        match self {
            Inst::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    pub fn as_phi_mut(&mut self) -> Option<&mut Phi> {
        match self {
            Inst::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    /// Jump target of a terminator.
    pub fn jump_target(&self) -> Option<LabelId> {
        match self {
            Inst::Cmp { target, .. } | Inst::Goto { target } => Some(*target),
            _ => None,
        }
    }

    pub fn set_jump_target(&mut self, label: LabelId) {
        if let Inst::Cmp { target, .. } | Inst::Goto { target } = self {
            *target = label;
        }
    }

    /// Variables defined by this instruction.
    pub fn defs(&self) -> &[VarId] {
        match self {
            Inst::Assign { dst, .. }
            | Inst::Binary { dst, .. }
            | Inst::Unary { dst, .. }
            | Inst::FieldLoad { dst, .. }
            | Inst::Reload { dst } => std::slice::from_ref(dst),
            Inst::Phi(phi) => std::slice::from_ref(&phi.dst),
            Inst::Call { dst, .. } => dst.as_slice(),
            Inst::CallPrep { defs, .. } => defs,
            _ => &[],
        }
    }

    pub fn defs_mut(&mut self) -> &mut [VarId] {
        match self {
            Inst::Assign { dst, .. }
            | Inst::Binary { dst, .. }
            | Inst::Unary { dst, .. }
            | Inst::FieldLoad { dst, .. }
            | Inst::Reload { dst } => std::slice::from_mut(dst),
            Inst::Phi(phi) => std::slice::from_mut(&mut phi.dst),
            Inst::Call { dst, .. } => dst.as_mut_slice(),
            Inst::CallPrep { defs, .. } => defs,
            _ => &mut [],
        }
    }

    /// Operand slots of this instruction.
    pub fn rvals(&self) -> Vec<&Rval> {
        match self {
            Inst::Cmp { a, b, .. } | Inst::Binary { a, b, .. } => vec![a, b],
            Inst::Assign { src, .. } | Inst::FieldStore { src, .. } => vec![src],
            Inst::Unary { a, .. } => vec![a],
            Inst::FieldLoad { base, .. } => vec![base],
            Inst::Return { value } => value.iter().collect(),
            Inst::Call { args, .. } => args.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn rvals_mut(&mut self) -> Vec<&mut Rval> {
        match self {
            Inst::Cmp { a, b, .. } | Inst::Binary { a, b, .. } => vec![a, b],
            Inst::Assign { src, .. } | Inst::FieldStore { src, .. } => vec![src],
            Inst::Unary { a, .. } => vec![a],
            Inst::FieldLoad { base, .. } => vec![base],
            Inst::Return { value } => value.iter_mut().collect(),
            Inst::Call { args, .. } => args.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Variables read by this instruction, in operand order. Phi arguments are
    /// not included: they are read on the incoming edges, not by the phi.
    pub fn uses(&self) -> Vec<VarId> {
        let mut out: Vec<VarId> = self.rvals().into_iter().filter_map(Rval::as_var).collect();
        match self {
            Inst::FieldStore { base, .. } => out.push(*base),
            Inst::Spill { var } | Inst::StackArg { var, .. } => out.push(*var),
            Inst::CallPrep { srcs, .. } => out.extend_from_slice(srcs),
            _ => {}
        }
        out
    }

    /// Visit every variable use slot (excluding phi arguments) mutably.
    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut VarId)) {
        for rval in self.rvals_mut() {
            if let Rval::Var(v) = rval {
                f(v);
            }
        }
        match self {
            Inst::FieldStore { base, .. } => f(base),
            Inst::Spill { var } | Inst::StackArg { var, .. } => f(var),
            Inst::CallPrep { srcs, .. } => srcs.iter_mut().for_each(f),
            _ => {}
        }
    }
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub label: LabelId,
    pub insts: Vec<Inst>,
    /// Predecessors, indexed consistently with phi arguments.
    pub preds: Vec<BlockId>,
    /// Fallthrough or unconditional successor.
    pub direct: Option<BlockId>,
    /// Taken-branch successor of a compare-and-branch.
    pub cond: Option<BlockId>,
    pub postorder_index: usize,
}

impl Block {
    pub fn new(label: LabelId, insts: Vec<Inst>) -> Self {
        Self {
            label,
            insts,
            preds: Vec::new(),
            direct: None,
            cond: None,
            postorder_index: 0,
        }
    }

    /// Successors, `direct` first.
    pub fn succs(&self) -> impl Iterator<Item = BlockId> {
        self.direct.into_iter().chain(self.cond)
    }

    /// Number of leading phi instructions.
    pub fn phi_count(&self) -> usize {
        self.insts.iter().take_while(|i| matches!(i, Inst::Phi(_))).count()
    }

    pub fn phis(&self) -> impl Iterator<Item = &Phi> {
        self.insts.iter().map_while(Inst::as_phi)
    }

    /// Position of `pred` in the predecessor list.
    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&p| p == pred)
    }

    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|i| i.is_terminator())
    }
}

/// A procedure under compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    pub ret_ty: Type,
    pub args: Vec<VarId>,
    pub locals: Vec<VarId>,
    pub blocks: Vec<Block>,
    pub preorder: Vec<BlockId>,
    pub postorder: Vec<BlockId>,
    pub rpo: Vec<BlockId>,
    pub webs: Vec<PhiWeb>,
    vars: Vec<Var>,
    labels: Vec<String>,
}

impl Procedure {
    /// An empty procedure whose body is one linear block.
    pub fn new(name: impl Into<String>, ret_ty: Type) -> Self {
        let mut proc = Self {
            name: name.into(),
            ret_ty,
            args: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
            preorder: Vec::new(),
            postorder: Vec::new(),
            rpo: Vec::new(),
            webs: Vec::new(),
            vars: Vec::new(),
            labels: Vec::new(),
        };
        let label = proc.new_label("entry");
        proc.blocks.push(Block::new(label, Vec::new()));
        proc
    }

    /// Mint a variable without registering it as a local.
    pub fn new_var(&mut self, name: impl Into<String>, ty: Type) -> VarId {
        let id = VarId::new(self.vars.len());
        self.vars.push(Var {
            name: name.into(),
            ty,
            reg: None,
            web: None,
        });
        id
    }

    pub fn add_arg(&mut self, name: impl Into<String>, ty: Type) -> VarId {
        let id = self.new_var(name, ty);
        self.args.push(id);
        id
    }

    pub fn add_local(&mut self, name: impl Into<String>, ty: Type) -> VarId {
        let id = self.new_var(name, ty);
        self.locals.push(id);
        id
    }

    pub fn remove_local(&mut self, var: VarId) {
        self.locals.retain(|&v| v != var);
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Var {
        &mut self.vars[id.index()]
    }

    pub fn new_label(&mut self, name: impl Into<String>) -> LabelId {
        let id = LabelId::new(self.labels.len());
        self.labels.push(name.into());
        id
    }

    pub fn label_name(&self, id: LabelId) -> &str {
        &self.labels[id.index()]
    }

    pub fn rename_label(&mut self, id: LabelId, name: impl Into<String>) {
        self.labels[id.index()] = name.into();
    }

    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId::new)
    }

    /// Append a block, returning its handle.
    pub fn push_block(&mut self, block: Block) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(block);
        id
    }

    /// Display name of a block (its label).
    pub fn block_name(&self, id: BlockId) -> &str {
        self.label_name(self.block(id).label)
    }

    /// Display name of a variable.
    pub fn var_name(&self, id: VarId) -> &str {
        &self.var(id).name
    }

    pub fn new_web(&mut self) -> WebId {
        let id = WebId::new(self.webs.len());
        self.webs.push(PhiWeb::default());
        id
    }

    pub fn web(&self, id: WebId) -> &PhiWeb {
        &self.webs[id.index()]
    }

    pub fn web_mut(&mut self, id: WebId) -> &mut PhiWeb {
        &mut self.webs[id.index()]
    }

    /// Total instruction count over all blocks.
    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }
}

/// Field layout of a class: four bytes per field, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl ClassLayout {
    pub fn field_offset(&self, field: &str) -> Option<i32> {
        self.fields
            .iter()
            .position(|(name, _)| name == field)
            .map(|i| i as i32 * 4)
    }
}

/// A whole program: class layouts plus procedures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub classes: Vec<ClassLayout>,
    pub procedures: Vec<Procedure>,
}

impl Program {
    pub fn class(&self, name: &str) -> Option<&ClassLayout> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defs_and_uses() {
        let mut proc = Procedure::new("f", Type::Int);
        let a = proc.add_arg("a", Type::Int);
        let x = proc.add_local("x", Type::Int);
        let o = proc.add_local("o", Type::Class("Node".into()));

        let add = Inst::Binary {
            dst: x,
            op: BinaryOp::Plus,
            a: Rval::Var(a),
            b: Rval::Int(1),
        };
        assert_eq!(add.defs(), &[x]);
        assert_eq!(add.uses(), vec![a]);

        let store = Inst::FieldStore {
            base: o,
            field: "val".into(),
            src: Rval::Var(x),
        };
        assert!(store.defs().is_empty());
        assert_eq!(store.uses(), vec![x, o]);

        let call = Inst::Call {
            dst: None,
            callee: Callee::Extern("puts".into()),
            args: vec![Rval::Str("hi".into()), Rval::Var(a)],
        };
        assert!(call.defs().is_empty());
        assert_eq!(call.uses(), vec![a]);
    }

    #[test]
    fn test_use_rewriting() {
        let mut proc = Procedure::new("f", Type::Void);
        let a = proc.add_local("a", Type::Int);
        let b = proc.add_local("b", Type::Int);
        let mut prep = Inst::CallPrep {
            defs: vec![b],
            srcs: vec![a],
            num_args: 1,
        };
        prep.for_each_use_mut(|v| {
            if *v == a {
                *v = b;
            }
        });
        assert_eq!(prep.uses(), vec![b]);
        prep.defs_mut()[0] = a;
        assert_eq!(prep.defs(), &[a]);
    }

    #[test]
    fn test_operator_helpers() {
        assert_eq!(CondOp::Lt.flip(), CondOp::Gt);
        assert_eq!(CondOp::Ge.flip(), CondOp::Le);
        assert_eq!(CondOp::Ne.flip(), CondOp::Ne);
        assert!(CondOp::Le.evaluate(3, 3));
        assert_eq!(BinaryOp::Rsb.evaluate(3, 10), Some(7));
        assert_eq!(BinaryOp::Div.evaluate(3, 0), None);
        assert_eq!(Rval::Bool(true).int_value(), Some(1));
        assert_eq!(Rval::Null.int_value(), Some(0));
        assert!(!Rval::Str("s".into()).is_constant());
    }

    #[test]
    fn test_class_layout_offsets() {
        let layout = ClassLayout {
            name: "Node".into(),
            fields: vec![("val".into(), Type::Int), ("next".into(), Type::Class("Node".into()))],
        };
        assert_eq!(layout.field_offset("val"), Some(0));
        assert_eq!(layout.field_offset("next"), Some(4));
        assert_eq!(layout.field_offset("missing"), None);
    }
}
