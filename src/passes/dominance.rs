//! Dominator tree and dominance frontiers.
//!
//! Immediate dominators come from the iterative algorithm of Cooper, Harvey
//! and Kennedy ("A Simple, Fast Dominance Algorithm"): blocks are visited in
//! reverse postorder and each block's idom is the intersection of its already
//! processed predecessors, where intersecting walks two fingers up the current
//! idom chains, always advancing the one with the smaller postorder index.

use crate::core::error::{CompileError, CompileResult};
use crate::ir::{BlockId, Procedure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomTree {
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    preorder: Vec<BlockId>,
}

impl DomTree {
    /// Compute dominators of a procedure whose traversal orders are current.
    pub fn compute(proc: &Procedure) -> CompileResult<Self> {
        let num_blocks = proc.blocks.len();
        let mut tree = DomTree {
            idom: vec![None; num_blocks],
            children: vec![Vec::new(); num_blocks],
            preorder: Vec::new(),
        };
        if num_blocks == 0 {
            return Ok(tree);
        }

        let entry = proc.entry();
        // `doms[b]` is set once b has been processed; the entry is its own dominator
        // while iterating.
        let mut doms: Vec<Option<BlockId>> = vec![None; num_blocks];
        doms[entry.index()] = Some(entry);

        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for &block in &proc.rpo {
                if block == entry {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in &proc.block(block).preds {
                    if doms[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(proc, &doms, pred, current),
                    });
                }
                if new_idom.is_some() && doms[block.index()] != new_idom {
                    doms[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        for b in proc.block_ids() {
            match doms[b.index()] {
                None => {
                    return Err(CompileError::DisconnectedBlock {
                        procedure: proc.name.clone(),
                        block: proc.block_name(b).to_string(),
                    })
                }
                Some(parent) if b != entry => {
                    tree.idom[b.index()] = Some(parent);
                    tree.children[parent.index()].push(b);
                }
                Some(_) => {}
            }
        }

        // Preorder walk of the tree; children in block order.
        let mut stack = vec![entry];
        while let Some(block) = stack.pop() {
            tree.preorder.push(block);
            stack.extend(tree.children[block.index()].iter().rev().copied());
        }

        log::trace!("dominance: {} converged after {} rounds", proc.name, rounds);
        Ok(tree)
    }

    /// Immediate dominator; `None` for the entry.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.index()]
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.index()]
    }

    /// Blocks in dominator-tree preorder.
    pub fn preorder(&self) -> &[BlockId] {
        &self.preorder
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut runner = Some(b);
        while let Some(block) = runner {
            if block == a {
                return true;
            }
            runner = self.idom(block);
        }
        false
    }
}

fn intersect(proc: &Procedure, doms: &[Option<BlockId>], b1: BlockId, b2: BlockId) -> BlockId {
    let mut finger1 = b1;
    let mut finger2 = b2;
    let po = |b: BlockId| proc.block(b).postorder_index;
    while finger1 != finger2 {
        while po(finger1) < po(finger2) {
            finger1 = doms[finger1.index()].unwrap_or(finger1);
        }
        while po(finger2) < po(finger1) {
            finger2 = doms[finger2.index()].unwrap_or(finger2);
        }
    }
    finger1
}

/// Dominance frontier of every block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomFrontiers {
    frontiers: Vec<Vec<BlockId>>,
}

impl DomFrontiers {
    pub fn compute(proc: &Procedure, dom: &DomTree) -> Self {
        let mut frontiers: Vec<Vec<BlockId>> = vec![Vec::new(); proc.blocks.len()];
        for block in proc.block_ids() {
            let preds = &proc.block(block).preds;
            if preds.len() < 2 {
                continue;
            }
            let top = dom.idom(block);
            for &pred in preds {
                let mut runner = Some(pred);
                while runner != top {
                    let Some(r) = runner else { break };
                    let frontier = &mut frontiers[r.index()];
                    if !frontier.contains(&block) {
                        frontier.push(block);
                    }
                    runner = dom.idom(r);
                }
            }
        }
        for frontier in &mut frontiers {
            frontier.sort();
        }
        Self { frontiers }
    }

    pub fn frontier(&self, block: BlockId) -> &[BlockId] {
        &self.frontiers[block.index()]
    }

    pub fn contains(&self, block: BlockId, member: BlockId) -> bool {
        self.frontiers[block.index()].binary_search(&member).is_ok()
    }
}
