//! Live-variable analysis.
//!
//! Phi arguments are treated as uses on the incoming edge: a block's
//! terminator reads the arguments its successors' register phis take from it.
//! Memory phis read nothing, their arguments were stored on the edge already.

use crate::ir::{BlockId, Inst, Procedure, VarId, VarSet};
use hashbrown::HashMap;

/// Variables the register phis of `block`'s successors read along the edges
/// leaving `block`, in successor then phi order, without duplicates.
pub fn phi_uses_on_exit(proc: &Procedure, block: BlockId) -> Vec<VarId> {
    let mut uses = Vec::new();
    let b = proc.block(block);
    for succ in b.succs() {
        let succ_block = proc.block(succ);
        for (slot, &pred) in succ_block.preds.iter().enumerate() {
            if pred != block {
                continue;
            }
            for phi in succ_block.phis() {
                if phi.memory {
                    continue;
                }
                if let Some(arg) = phi.args[slot] {
                    if !uses.contains(&arg) {
                        uses.push(arg);
                    }
                }
            }
        }
    }
    uses
}

/// Variables read by instruction `index` of `block`, counting the phi
/// arguments of successors as read by the terminator. No duplicates.
pub fn inst_uses(proc: &Procedure, block: BlockId, index: usize) -> Vec<VarId> {
    let inst = &proc.block(block).insts[index];
    let mut uses = inst.uses();
    dedup_in_order(&mut uses);
    if inst.is_terminator() {
        for v in phi_uses_on_exit(proc, block) {
            if !uses.contains(&v) {
                uses.push(v);
            }
        }
    }
    uses
}

fn dedup_in_order(vars: &mut Vec<VarId>) {
    let mut seen = VarSet::new();
    vars.retain(|&v| seen.insert(v));
}

/// Live-in and live-out sets of every block, plus the position of each
/// variable's last use within a block.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: Vec<VarSet>,
    live_out: Vec<VarSet>,
    last_use: Vec<HashMap<VarId, usize>>,
}

impl Liveness {
    pub fn compute(proc: &Procedure) -> Self {
        let num_blocks = proc.blocks.len();
        let mut block_uses = Vec::with_capacity(num_blocks);
        let mut block_defs = Vec::with_capacity(num_blocks);
        let mut last_use = Vec::with_capacity(num_blocks);

        for block in proc.block_ids() {
            let mut uses = VarSet::new();
            let mut defs = VarSet::new();
            let mut last: HashMap<VarId, usize> = HashMap::new();
            for i in (0..proc.block(block).insts.len()).rev() {
                let inst = &proc.block(block).insts[i];
                for &d in inst.defs() {
                    uses.remove(d);
                    defs.insert(d);
                }
                for v in inst_uses(proc, block, i) {
                    last.entry(v).or_insert(i);
                    uses.insert(v);
                }
            }
            block_uses.push(uses);
            block_defs.push(defs);
            last_use.push(last);
        }

        let mut live_in = vec![VarSet::new(); num_blocks];
        let mut live_out = vec![VarSet::new(); num_blocks];
        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for &block in &proc.postorder {
                let b = block.index();
                let mut out = std::mem::take(&mut live_out[b]);
                for succ in proc.block(block).succs() {
                    out.union_with(&live_in[succ.index()]);
                }
                for v in phi_uses_on_exit(proc, block) {
                    out.insert(v);
                }

                let mut new_in = out.clone();
                new_in.subtract(&block_defs[b]);
                new_in.union_with(&block_uses[b]);
                if new_in != live_in[b] {
                    live_in[b] = new_in;
                    changed = true;
                }
                live_out[b] = out;
            }
        }
        log::trace!("liveness: {} converged after {} rounds", proc.name, rounds);

        Self {
            live_in,
            live_out,
            last_use,
        }
    }

    pub fn live_in(&self, block: BlockId) -> &VarSet {
        &self.live_in[block.index()]
    }

    pub fn live_out(&self, block: BlockId) -> &VarSet {
        &self.live_out[block.index()]
    }

    /// Index of the last instruction in `block` reading `var`.
    pub fn last_use(&self, block: BlockId, var: VarId) -> Option<usize> {
        self.last_use[block.index()].get(&var).copied()
    }

    /// Does `var` die at instruction `index` of `block`?
    pub fn dies_at(&self, block: BlockId, var: VarId, index: usize) -> bool {
        !self.live_out(block).contains(var) && self.last_use(block, var) == Some(index)
    }

    /// Is `var` defined in `block` but never read afterwards?
    pub fn is_dead_def(&self, block: BlockId, var: VarId) -> bool {
        !self.live_out(block).contains(var) && self.last_use(block, var).is_none()
    }

    /// Variables live immediately before each instruction of `block`, from
    /// the last instruction back to the first.
    pub fn live_before_each(&self, proc: &Procedure, block: BlockId) -> Vec<(usize, VarSet)> {
        let mut live = self.live_out(block).clone();
        let mut out = Vec::with_capacity(proc.block(block).insts.len());
        for i in (0..proc.block(block).insts.len()).rev() {
            let inst = &proc.block(block).insts[i];
            for &d in inst.defs() {
                live.remove(d);
            }
            for v in inst_uses(proc, block, i) {
                live.insert(v);
            }
            out.push((i, live.clone()));
        }
        out
    }
}

/// Does `inst` define something that occupies a register?
pub(crate) fn defines_register(inst: &Inst) -> bool {
    !matches!(inst, Inst::Phi(phi) if phi.memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_program;
    use crate::passes::cfg::build_cfg;
    use crate::passes::dominance::{DomFrontiers, DomTree};
    use crate::passes::ssa::construct_ssa;
    use crate::CompilationSession;
    use bumpalo::Bump;

    fn ssa(text: &str) -> Procedure {
        let mut program = parse_program(text).unwrap();
        let mut proc = program.procedures.remove(0);
        build_cfg(&mut proc).unwrap();
        let dom = DomTree::compute(&proc).unwrap();
        let df = DomFrontiers::compute(&proc, &dom);
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        construct_ssa(&mut proc, &dom, &df, &session).unwrap();
        proc
    }

    fn find(proc: &Procedure, name: &str) -> VarId {
        (0..proc.num_vars())
            .map(VarId::new)
            .find(|&v| proc.var_name(v) == name)
            .unwrap()
    }

    #[test]
    fn test_loop_liveness() {
        let proc = ssa(
            "Int f(Int n) {\n  Int i;\n  i = 0;\nHead:\n  if (i >= n) goto Exit;\n\
             i = i + 1;\n  goto Head;\nExit:\n  return i;\n}\n",
        );
        let live = Liveness::compute(&proc);
        let n = proc.args[0];
        let head = BlockId::new(2);
        let body = BlockId::new(3);

        // n is needed around the whole loop
        assert!(live.live_in(head).contains(n));
        assert!(live.live_out(body).contains(n));
        // The back edge carries the incremented counter to the header phi
        let incremented = find(&proc, "i_2");
        assert!(live.live_out(body).contains(incremented));
        assert!(!live.live_in(head).contains(incremented));
        // The phi destination is defined in the header, so it is not live-in there
        let phi = proc.block(head).phis().next().unwrap().dst;
        assert!(!live.live_in(head).contains(phi));
        assert!(live.live_in(body).contains(phi));
    }

    #[test]
    fn test_last_use_positions() {
        let proc = ssa("Int f(Int a) {\n  Int b;\n  Int c;\n  b = a + 1;\n  c = b + a;\n  return c;\n}\n");
        let live = Liveness::compute(&proc);
        let block = BlockId::new(1);
        let a = proc.args[0];
        let b = find(&proc, "b_0");
        assert_eq!(live.last_use(block, a), Some(1));
        assert_eq!(live.last_use(block, b), Some(1));
        assert!(live.dies_at(block, b, 1));
        assert!(!live.dies_at(block, b, 0));
        assert!(live.live_in(BlockId::new(0)).contains(a));
    }

    #[test]
    fn test_phi_arguments_are_edge_uses() {
        let proc = ssa(
            "Int f(Int x) {\n  Int y;\n  if (x > 0) goto Then;\n  y = 2;\n  goto Join;\n\
             Then:\n  y = 1;\nJoin:\n  return y;\n}\n",
        );
        let live = Liveness::compute(&proc);
        let y0 = find(&proc, "y_0");
        let y1 = find(&proc, "y_1");
        assert_eq!(phi_uses_on_exit(&proc, BlockId::new(2)), vec![y0]);
        assert_eq!(phi_uses_on_exit(&proc, BlockId::new(3)), vec![y1]);
        assert!(live.live_out(BlockId::new(2)).contains(y0));
        assert!(!live.live_out(BlockId::new(2)).contains(y1));
        assert!(!live.live_in(BlockId::new(4)).contains(y0));
        // The goto is the last use of y_0 in its block
        let goto = proc.block(BlockId::new(2)).insts.len() - 1;
        assert_eq!(live.last_use(BlockId::new(2), y0), Some(goto));
    }
}
