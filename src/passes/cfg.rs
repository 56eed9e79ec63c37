// This module builds the control-flow graph of a procedure from its linear instruction list. The
// list is cut into basic blocks at every label some jump actually targets and after every
// terminator (compare-and-branch, goto, return); an empty starting block is always created so
// the entry never has predecessors, even when the body opens with a loop header. Blocks without
// a terminator get an explicit goto to the next block, turning fallthrough into a real edge.
// Successors are recorded as `direct` (fallthrough or goto target) and `cond` (taken branch of a
// compare). A depth-first walk from the entry, visiting `direct` before `cond`, yields preorder,
// postorder, reverse postorder and each block's postorder index; blocks the walk never reaches
// are deleted, survivors are renumbered B0, B1, ... in their original order, and predecessor
// lists are rebuilt from the surviving edges (direct edges first within each source block).
// The traversal helper is shared with critical-edge splitting, which recomputes orders after it
// appends blocks.

use crate::core::error::{CompileError, CompileResult};
use crate::ir::{Block, BlockId, Inst, LabelId, Procedure};
use hashbrown::{HashMap, HashSet};

/// Preorder and postorder of a depth-first walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfsOrders {
    pub preorder: Vec<BlockId>,
    pub postorder: Vec<BlockId>,
}

/// Depth-first walk from `entry` over `num_blocks` blocks, visiting the
/// successors `succs(b)` yields in order. Iterative, with the visit order of
/// the recursive formulation.
pub fn depth_first_orders<F>(num_blocks: usize, entry: BlockId, succs: F) -> DfsOrders
where
    F: Fn(BlockId) -> [Option<BlockId>; 2],
{
    let mut orders = DfsOrders::default();
    if num_blocks == 0 {
        return orders;
    }
    let mut visited = vec![false; num_blocks];
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited[entry.index()] = true;
    orders.preorder.push(entry);

    while let Some(top) = stack.last_mut() {
        let (block, next) = *top;
        if next < 2 {
            top.1 += 1;
            if let Some(succ) = succs(block)[next] {
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    orders.preorder.push(succ);
                    stack.push((succ, 0));
                }
            }
        } else {
            stack.pop();
            orders.postorder.push(block);
        }
    }
    orders
}

/// Recompute the procedure's traversal orders and postorder indices.
/// Every block must be reachable from the entry.
pub fn recompute_orders(proc: &mut Procedure) -> CompileResult<()> {
    let orders = depth_first_orders(proc.blocks.len(), proc.entry(), |b| {
        let block = proc.block(b);
        [block.direct, block.cond]
    });
    if orders.preorder.len() != proc.blocks.len() {
        let reached: HashSet<BlockId> = orders.preorder.iter().copied().collect();
        let missing = proc
            .block_ids()
            .find(|b| !reached.contains(b))
            .unwrap_or(proc.entry());
        return Err(CompileError::DisconnectedBlock {
            procedure: proc.name.clone(),
            block: proc.block_name(missing).to_string(),
        });
    }
    install_orders(proc, orders);
    Ok(())
}

fn install_orders(proc: &mut Procedure, orders: DfsOrders) {
    for (i, &b) in orders.postorder.iter().enumerate() {
        proc.block_mut(b).postorder_index = i;
    }
    proc.rpo = orders.postorder.iter().rev().copied().collect();
    proc.preorder = orders.preorder;
    proc.postorder = orders.postorder;
}

/// Blocks under construction, before unreachable ones are dropped.
struct BlockBuilder {
    blocks: Vec<Block>,
    pending: Vec<Inst>,
    pending_labels: Vec<LabelId>,
    label_to_block: HashMap<LabelId, usize>,
}

impl BlockBuilder {
    fn make_block(&mut self, proc: &mut Procedure) {
        let index = self.blocks.len();
        for label in self.pending_labels.drain(..) {
            self.label_to_block.insert(label, index);
        }
        let label = proc.new_label(format!("B{}", index));
        let insts = std::mem::take(&mut self.pending);
        self.blocks.push(Block::new(label, insts));
    }

    fn resolve(&self, proc: &Procedure, label: LabelId) -> CompileResult<usize> {
        self.label_to_block
            .get(&label)
            .copied()
            .ok_or_else(|| CompileError::UnknownLabel {
                procedure: proc.name.clone(),
                label: proc.label_name(label).to_string(),
            })
    }
}

enum Exit {
    Branch(LabelId),
    Jump(LabelId),
    Return,
    Fallthrough,
}

/// Split the linear body into basic blocks and wire up the flow graph.
pub fn build_cfg(proc: &mut Procedure) -> CompileResult<()> {
    let linear: Vec<Inst> = proc
        .blocks
        .drain(..)
        .flat_map(|b| b.insts)
        .collect();

    // Labels that are actually the target of a jump
    let used_labels: HashSet<LabelId> = linear.iter().filter_map(Inst::jump_target).collect();

    let mut builder = BlockBuilder {
        blocks: Vec::new(),
        pending: Vec::new(),
        pending_labels: Vec::new(),
        label_to_block: HashMap::new(),
    };

    // Starting block, so the entry never has incoming edges
    builder.make_block(proc);

    for inst in linear {
        match inst {
            Inst::Label(label) => {
                if !used_labels.contains(&label) {
                    continue;
                }
                if !builder.pending.is_empty() {
                    builder.make_block(proc);
                }
                builder.pending_labels.push(label);
            }
            inst => {
                let terminates = inst.is_terminator();
                builder.pending.push(inst);
                if terminates {
                    builder.make_block(proc);
                }
            }
        }
    }

    if !builder.pending.is_empty() || !builder.pending_labels.is_empty() {
        builder.make_block(proc);
    }

    // Falling off the end of the body returns.
    let tail = match builder.blocks.last().and_then(|b| b.insts.last()) {
        Some(Inst::Return { .. }) | Some(Inst::Goto { .. }) => Exit::Return,
        Some(Inst::Cmp { target, .. }) => Exit::Branch(*target),
        _ => Exit::Fallthrough,
    };
    match tail {
        Exit::Branch(_) => {
            builder.pending.push(Inst::Return { value: None });
            builder.make_block(proc);
        }
        Exit::Fallthrough => {
            if let Some(last) = builder.blocks.last_mut() {
                last.insts.push(Inst::Return { value: None });
            }
        }
        _ => {}
    }

    // Wire up the outgoing edges
    let num_blocks = builder.blocks.len();
    for i in 0..num_blocks {
        let exit = match builder.blocks[i].insts.last() {
            Some(Inst::Cmp { target, .. }) => Exit::Branch(*target),
            Some(Inst::Goto { target }) => Exit::Jump(*target),
            Some(Inst::Return { .. }) => Exit::Return,
            _ => Exit::Fallthrough,
        };

        let (direct, cond) = match exit {
            Exit::Branch(target) => (Some(i + 1), Some(builder.resolve(proc, target)?)),
            Exit::Jump(target) => (Some(builder.resolve(proc, target)?), None),
            Exit::Return => (None, None),
            Exit::Fallthrough => {
                // Make the fallthrough explicit
                let label = builder.blocks[i + 1].label;
                builder.blocks[i].insts.push(Inst::Goto { target: label });
                (Some(i + 1), None)
            }
        };

        // Jumps name the target block's own label from here on
        if let Some(target) = cond.or(direct) {
            let label = builder.blocks[target].label;
            if let Some(last) = builder.blocks[i].insts.last_mut() {
                last.set_jump_target(label);
            }
        }
        builder.blocks[i].direct = direct.map(BlockId::new);
        builder.blocks[i].cond = cond.map(BlockId::new);
    }

    // Walk from the entry and drop whatever it does not reach
    let orders = depth_first_orders(num_blocks, BlockId::new(0), |b| {
        let block = &builder.blocks[b.index()];
        [block.direct, block.cond]
    });
    let mut renumber: Vec<Option<BlockId>> = vec![None; num_blocks];
    let mut survivors = Vec::with_capacity(orders.preorder.len());
    let mut reached = vec![false; num_blocks];
    for &b in &orders.preorder {
        reached[b.index()] = true;
    }
    for (old, block) in builder.blocks.into_iter().enumerate() {
        if reached[old] {
            renumber[old] = Some(BlockId::new(survivors.len()));
            survivors.push(block);
        }
    }
    let remap = |b: BlockId| renumber[b.index()];
    for block in &mut survivors {
        block.direct = block.direct.and_then(remap);
        block.cond = block.cond.and_then(remap);
    }

    let dropped = num_blocks - survivors.len();
    proc.blocks = survivors;

    // Wire up the incoming edges
    for b in proc.block_ids().collect::<Vec<_>>() {
        let (direct, cond) = (proc.block(b).direct, proc.block(b).cond);
        for succ in [direct, cond].into_iter().flatten() {
            proc.block_mut(succ).preds.push(b);
        }
    }

    // Re-number blocks
    for b in proc.block_ids().collect::<Vec<_>>() {
        let label = proc.block(b).label;
        proc.rename_label(label, format!("B{}", b.index()));
    }

    let orders = DfsOrders {
        preorder: orders.preorder.iter().filter_map(|&b| remap(b)).collect(),
        postorder: orders.postorder.iter().filter_map(|&b| remap(b)).collect(),
    };
    install_orders(proc, orders);

    log::debug!(
        "cfg: {} has {} blocks ({} unreachable dropped)",
        proc.name,
        proc.blocks.len(),
        dropped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_program;

    fn build(text: &str) -> Procedure {
        let mut program = parse_program(text).unwrap();
        let mut proc = program.procedures.remove(0);
        build_cfg(&mut proc).unwrap();
        proc
    }

    #[test]
    fn test_straight_line_gets_empty_entry() {
        let proc = build("Int f(Int a) {\n  Int b;\n  b = a + 1;\n  return b;\n}\n");
        assert_eq!(proc.blocks.len(), 2);
        assert_eq!(proc.block(BlockId::new(0)).insts.len(), 1);
        assert!(matches!(proc.block(BlockId::new(0)).insts[0], Inst::Goto { .. }));
        assert_eq!(proc.block(BlockId::new(0)).direct, Some(BlockId::new(1)));
        assert_eq!(proc.block(BlockId::new(1)).preds, vec![BlockId::new(0)]);
        assert_eq!(proc.rpo, vec![BlockId::new(0), BlockId::new(1)]);
    }

    #[test]
    fn test_if_else_edges() {
        let proc = build(
            "Int f(Int x) {\n  Int y;\n  if (x > 0) goto Then;\n  y = 2;\n  goto Join;\n\
             Then:\n  y = 1;\nJoin:\n  return y;\n}\n",
        );
        // B0 entry, B1 cmp, B2 else, B3 then, B4 join
        assert_eq!(proc.blocks.len(), 5);
        let b = BlockId::new;
        assert_eq!(proc.block(b(1)).direct, Some(b(2)));
        assert_eq!(proc.block(b(1)).cond, Some(b(3)));
        assert_eq!(proc.block(b(4)).preds, vec![b(2), b(3)]);
        assert_eq!(proc.block_name(b(3)), "B3");
        assert_eq!(
            proc.display_inst(proc.block(b(1)).insts.last().unwrap()).to_string(),
            "if (x > 0) goto B3;"
        );
        // then-block falls through to the join with an explicit goto
        assert_eq!(
            proc.display_inst(proc.block(b(3)).insts.last().unwrap()).to_string(),
            "goto B4;"
        );
        assert_eq!(proc.preorder, vec![b(0), b(1), b(2), b(4), b(3)]);
        assert_eq!(proc.postorder, vec![b(4), b(2), b(3), b(1), b(0)]);
        assert_eq!(proc.block(b(0)).postorder_index, 4);
    }

    #[test]
    fn test_unreachable_blocks_are_dropped() {
        let proc = build(
            "Int f() {\n  return 1;\n  return 2;\nUnused:\n  return 3;\n}\n",
        );
        assert_eq!(proc.blocks.len(), 2);
        assert_eq!(proc.block(BlockId::new(1)).preds, vec![BlockId::new(0)]);
        assert_eq!(proc.block_name(BlockId::new(1)), "B1");
    }

    #[test]
    fn test_missing_return_is_implicit() {
        let proc = build("Void f(Int a) {\n  Int b;\n  b = a;\n}\n");
        let last = proc.blocks.last().unwrap();
        assert_eq!(last.insts.last(), Some(&Inst::Return { value: None }));
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let mut program = parse_program("Int f() {\n  goto Nowhere;\n}\n").unwrap();
        let err = build_cfg(&mut program.procedures[0]).unwrap_err();
        assert!(matches!(err, CompileError::UnknownLabel { .. }));
    }

    #[test]
    fn test_recompute_orders_detects_disconnected_blocks() {
        let mut proc = build("Int f() {\n  return 1;\n}\n");
        let label = proc.new_label("orphan");
        proc.push_block(Block::new(label, vec![Inst::Return { value: None }]));
        assert!(matches!(
            recompute_orders(&mut proc),
            Err(CompileError::DisconnectedBlock { .. })
        ));
    }
}
