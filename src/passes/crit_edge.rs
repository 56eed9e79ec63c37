//! Critical-edge splitting.
//!
//! An edge is critical when its source ends in a compare-and-branch (two
//! successors) and its target has several predecessors. Copies resolving the
//! target's phis could not be placed on such an edge, so each one gets a new
//! block holding just `goto target`. The new block takes the source's place in
//! the target's predecessor list, which keeps phi argument indices valid.

use super::cfg::recompute_orders;
use crate::core::error::CompileResult;
use crate::core::session::CompilationSession;
use crate::ir::{Block, BlockId, Inst, Procedure};

/// Split every critical edge. Returns true if the CFG changed, in which case
/// dominance and frontiers must be recomputed.
pub fn split_critical_edges(proc: &mut Procedure, session: &CompilationSession) -> CompileResult<bool> {
    let original_blocks = proc.blocks.len();
    let mut split = 0;

    for block in (0..original_blocks).map(BlockId::new) {
        let (direct, cond) = (proc.block(block).direct, proc.block(block).cond);
        let (Some(direct), Some(cond)) = (direct, cond) else {
            continue;
        };

        if proc.block(cond).preds.len() >= 2 {
            let landing = insert_landing_block(proc, block, cond);
            proc.block_mut(block).cond = Some(landing);
            let label = proc.block(landing).label;
            if let Some(last) = proc.block_mut(block).insts.last_mut() {
                last.set_jump_target(label);
            }
            split += 1;
        }

        // The fallthrough edge of a compare reaches the target without a goto
        // of its own, so it is split the same way.
        if proc.block(direct).preds.len() >= 2 {
            let landing = insert_landing_block(proc, block, direct);
            proc.block_mut(block).direct = Some(landing);
            split += 1;
        }
    }

    if split == 0 {
        return Ok(false);
    }

    recompute_orders(proc)?;
    session.record_edges_split(split);
    log::debug!("crit-edge: split {} edges in {}", split, proc.name);
    Ok(true)
}

/// New block on the edge `from -> to`, replacing `from` in `to`'s predecessors.
fn insert_landing_block(proc: &mut Procedure, from: BlockId, to: BlockId) -> BlockId {
    let index = proc.blocks.len();
    let label = proc.new_label(format!("B{}", index));
    let target = proc.block(to).label;
    let mut block = Block::new(label, vec![Inst::Goto { target }]);
    block.direct = Some(to);
    block.preds.push(from);
    let landing = proc.push_block(block);

    if let Some(slot) = proc.block(to).pred_index(from) {
        proc.block_mut(to).preds[slot] = landing;
    }
    landing
}
