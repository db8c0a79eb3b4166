//! Bidirectional mapping between the host IR and the structurizer's CFG.
//!
//! Import builds one node per host block, retargets terminators and phis to
//! node ids, and strips previously injected merge markers so a second
//! structurization round is idempotent. Emit writes the rewritten graph back
//! onto the same `Function`: original nodes keep their block ids,
//! synthesized nodes get fresh blocks, unreachable blocks become stubs, and
//! merge annotations appear as marker instructions.

use std::collections::{HashMap, HashSet};

use crate::cfg::{MergeType, NodeId, NodePool};
use crate::error::StructurizeError;
use crate::ir::{Block, BlockId, Function, Inst, Op, Phi, Terminator};

/// Import `func` into `pool`. Returns the entry node.
pub fn import(func: &Function, pool: &mut NodePool) -> Result<NodeId, StructurizeError> {
    let mut node_of: HashMap<BlockId, NodeId> = HashMap::new();
    for (block_id, block) in func.blocks.iter() {
        if block.is_stub() && block_id != func.entry {
            continue;
        }
        let node = pool.create_node_for_block(block.name.clone(), block_id);
        node_of.insert(block_id, node);
    }

    // Terminators and edges first; phis need the predecessor sets.
    for (block_id, block) in func.blocks.iter() {
        let Some(&node) = node_of.get(&block_id) else {
            continue;
        };
        let term = block.terminator.as_ref().ok_or_else(|| {
            StructurizeError::UnsupportedTerminator {
                block: block.name.clone(),
                message: "missing terminator".into(),
            }
        })?;
        let mut mapped = Ok(());
        let term = term.map_targets(|b| match node_of.get(&b) {
            Some(&n) => n,
            None => {
                mapped = Err(StructurizeError::UnsupportedTerminator {
                    block: block.name.clone(),
                    message: format!("branch to cleared block `{}`", func.blocks[b].name),
                });
                node
            }
        });
        mapped?;
        for target in term.targets() {
            pool.add_branch(node, target);
        }
        pool[node].ir.terminator = term;
        pool[node].ir.operations = block
            .insts
            .iter()
            .copied()
            .filter(|&i| !func.insts[i].op.is_marker())
            .collect();
    }

    // Phis: duplicate incoming blocks keep their first occurrence, entries
    // from non-predecessors are silently dropped.
    for (block_id, block) in func.blocks.iter() {
        let Some(&node) = node_of.get(&block_id) else {
            continue;
        };
        let mut phis = Vec::with_capacity(block.phis.len());
        for phi in &block.phis {
            let mut seen: HashSet<BlockId> = HashSet::new();
            let mut mapped = Phi {
                result: phi.result,
                incoming: Vec::with_capacity(phi.incoming.len()),
            };
            for inc in &phi.incoming {
                if !seen.insert(inc.block) {
                    continue;
                }
                match node_of.get(&inc.block) {
                    Some(&pred) if pool[node].preds.contains(&pred) => {
                        mapped.incoming.push(crate::ir::Incoming {
                            block: pred,
                            value: inc.value,
                        });
                    }
                    _ => {
                        log::debug!(
                            "dropping phi incoming from non-predecessor `{}` in `{}`",
                            func.blocks[inc.block].name,
                            block.name
                        );
                    }
                }
            }
            phis.push(mapped);
        }
        pool[node].ir.phis = phis;
    }

    Ok(node_of[&func.entry])
}

/// A loop header whose conditional targets two non-merge, non-continue
/// blocks needs its conditional wrapped in a helper selection.
fn needs_fake_selection(pool: &NodePool, node: NodeId) -> bool {
    let data = &pool[node];
    if data.merge != MergeType::Loop {
        return false;
    }
    let (t, f) = match data.ir.terminator {
        Terminator::Condition {
            true_target,
            false_target,
            ..
        } => (true_target, false_target),
        _ => return false,
    };
    let merge = data.loop_merge_block;
    let cont = data.loop_continue_block;
    Some(t) != merge && Some(t) != cont && Some(f) != merge && Some(f) != cont
}

/// Write the structured graph back into `func`.
pub fn emit(func: &mut Function, pool: &mut NodePool, entry: NodeId) {
    // Reachability over all terminator edges, back-edges included.
    let mut reachable: HashSet<NodeId> = HashSet::new();
    let mut worklist = vec![entry];
    reachable.insert(entry);
    while let Some(n) = worklist.pop() {
        for target in pool[n].ir.terminator.targets() {
            if reachable.insert(target) {
                worklist.push(target);
            }
        }
    }
    let emit_order: Vec<NodeId> = pool
        .node_ids()
        .into_iter()
        .filter(|n| reachable.contains(n))
        .collect();

    // Assign host blocks: imported nodes keep theirs, synthesized nodes get
    // fresh ones.
    let mut block_of: HashMap<NodeId, BlockId> = HashMap::new();
    for &n in &emit_order {
        let block = match pool[n].host_block {
            Some(b) => b,
            None => func.blocks.push(Block::new(pool[n].name.clone())),
        };
        block_of.insert(n, block);
    }

    // Unreachable input blocks are pruned to stubs, not an error.
    let used: HashSet<BlockId> = block_of.values().copied().collect();
    for (block_id, block) in func.blocks.iter_mut() {
        if !used.contains(&block_id) && !block.is_stub() {
            log::debug!("pruning unreachable block `{}`", block.name);
            block.phis.clear();
            block.insts.clear();
            block.terminator = None;
        }
    }

    // Terminators, operations, and fake selections.
    for &n in &emit_order {
        let block = block_of[&n];
        let ops = pool[n].ir.operations.clone();
        if needs_fake_selection(pool, n) {
            let name = pool[n].name.clone();
            let fake_selection = func
                .blocks
                .push(Block::new(format!("{name}.fake_selection")));
            let unreachable = func.blocks.push(Block::new(format!("{name}.unreachable")));
            func.blocks[unreachable].terminator = Some(Terminator::Unreachable);

            let (cond, t, f) = match pool[n].ir.terminator {
                Terminator::Condition {
                    cond,
                    true_target,
                    false_target,
                } => (cond, true_target, false_target),
                _ => unreachable!("checked by needs_fake_selection"),
            };
            let marker = func.insts.push(Inst {
                op: Op::SelectionMerge { merge: unreachable },
                result: None,
            });
            func.blocks[fake_selection].insts = vec![marker];
            func.blocks[fake_selection].terminator = Some(Terminator::Condition {
                cond,
                true_target: block_of[&t],
                false_target: block_of[&f],
            });
            mark_block(func, unreachable, Op::MergeBlockMarker);

            func.blocks[block].insts = ops;
            func.blocks[block].terminator = Some(Terminator::Branch {
                target: fake_selection,
            });
            pool[n].phi_override = Some(fake_selection);
            log::debug!("wrapped loop header `{name}` in a fake selection");
        } else {
            func.blocks[block].insts = ops;
            func.blocks[block].terminator =
                Some(pool[n].ir.terminator.map_targets(|t| block_of[&t]));
        }
    }

    // Phis: incoming blocks resolve through the phi-override map, and a
    // predecessor branching here twice has its entry re-materialized per
    // edge.
    for &n in &emit_order {
        let block = block_of[&n];
        let phis: Vec<Phi<BlockId>> = pool[n]
            .ir
            .phis
            .iter()
            .map(|phi| phi.map_blocks(|p| pool[p].phi_override.unwrap_or(block_of[&p])))
            .collect();
        let mut expanded = Vec::with_capacity(phis.len());
        for phi in phis {
            let mut out = Phi {
                result: phi.result,
                incoming: Vec::with_capacity(phi.incoming.len()),
            };
            for inc in &phi.incoming {
                let multiplicity = func.blocks[inc.block]
                    .terminator
                    .as_ref()
                    .map_or(1, |t| t.targets().iter().filter(|&&t| t == block).count())
                    .max(1);
                for _ in 0..multiplicity {
                    out.incoming.push(*inc);
                }
            }
            expanded.push(out);
        }
        func.blocks[block].phis = expanded;
    }

    // Merge annotations.
    let mut marked: HashSet<(BlockId, bool)> = HashSet::new();
    for &n in &emit_order {
        match pool[n].merge {
            MergeType::None => {}
            MergeType::Selection => emit_selection_merge(func, pool, n, &block_of, &mut marked),
            MergeType::Loop => emit_loop_merge(func, pool, n, &block_of, &mut marked),
        }
    }
}

/// Insert a `merge_block`/`continue_block` marker at the first position of
/// `block`, once.
fn mark_block(func: &mut Function, block: BlockId, op: Op) {
    let inst = func.insts.push(Inst { op, result: None });
    func.blocks[block].insts.insert(0, inst);
}

fn mark_block_once(
    func: &mut Function,
    block: BlockId,
    op: Op,
    marked: &mut HashSet<(BlockId, bool)>,
) {
    let is_continue = matches!(op, Op::ContinueBlockMarker);
    if marked.insert((block, is_continue)) {
        mark_block(func, block, op);
    }
}

fn emit_selection_merge(
    func: &mut Function,
    pool: &NodePool,
    node: NodeId,
    block_of: &HashMap<NodeId, BlockId>,
    marked: &mut HashSet<(BlockId, bool)>,
) {
    let block = block_of[&node];

    if pool[node].selection_merge_block.is_none() && pool[node].selection_merge_exit {
        // At least one arm exits: merge toward the arm that does not
        // dead-end, if there is exactly one.
        let (t, f) = match func.blocks[block].terminator {
            Some(Terminator::Condition {
                true_target,
                false_target,
                ..
            }) => (true_target, false_target),
            _ => {
                log::warn!(
                    "cannot resolve exit selection merge on `{}`",
                    pool[node].name
                );
                return;
            }
        };
        let t_unreachable = matches!(
            func.blocks[t].terminator,
            Some(Terminator::Unreachable | Terminator::Kill)
        );
        let f_unreachable = matches!(
            func.blocks[f].terminator,
            Some(Terminator::Unreachable | Terminator::Kill)
        );
        let merge = match (t_unreachable, f_unreachable) {
            (true, false) => f,
            (false, true) => t,
            _ => return,
        };
        append_marker(func, block, Op::SelectionMerge { merge });
        mark_block_once(func, merge, Op::MergeBlockMarker, marked);
        return;
    }

    let merge = match pool[node].selection_merge_block {
        Some(m) => block_of[&m],
        None => {
            // No natural merge: a fake unreachable one keeps the construct
            // well-formed.
            let fake = func
                .blocks
                .push(Block::new(format!("{}.fake_merge", pool[node].name)));
            func.blocks[fake].terminator = Some(Terminator::Unreachable);
            fake
        }
    };
    append_marker(func, block, Op::SelectionMerge { merge });
    mark_block_once(func, merge, Op::MergeBlockMarker, marked);
}

fn emit_loop_merge(
    func: &mut Function,
    pool: &NodePool,
    node: NodeId,
    block_of: &HashMap<NodeId, BlockId>,
    marked: &mut HashSet<(BlockId, bool)>,
) {
    let block = block_of[&node];
    let name = pool[node].name.clone();

    let merge = match pool[node].loop_merge_block {
        Some(m) => block_of[&m],
        None => {
            // Infinite loop: synthesize an unreachable merge target.
            let fake = func.blocks.push(Block::new(format!("{name}.fake_merge")));
            func.blocks[fake].terminator = Some(Terminator::Unreachable);
            fake
        }
    };

    let continue_block = match pool[node].loop_continue_block {
        Some(c) => pool[c].phi_override.unwrap_or(block_of[&c]),
        None => {
            // No natural continue: synthesize a fake incoming block. When
            // the header is also the entry, a fake entry goes in first so
            // the back-edge stays detectable.
            if block == func.entry {
                let new_entry = func
                    .blocks
                    .push(Block::new(format!("{name}.new_entry.fake_continue")));
                func.blocks[new_entry].terminator = Some(Terminator::Branch { target: block });
                func.entry = new_entry;
            }
            let fake = func
                .blocks
                .push(Block::new(format!("{name}.fake_continue")));
            func.blocks[fake].terminator = Some(Terminator::Branch { target: block });
            // The new edge needs phi entries; nothing can flow in, so undef.
            let phi_count = func.blocks[block].phis.len();
            for i in 0..phi_count {
                let undef = func.undef_value();
                func.blocks[block].phis[i].incoming.push(crate::ir::Incoming {
                    block: fake,
                    value: undef,
                });
            }
            fake
        }
    };

    append_marker(
        func,
        block,
        Op::LoopMerge {
            merge,
            continue_block,
        },
    );
    mark_block_once(func, merge, Op::MergeBlockMarker, marked);
    mark_block_once(func, continue_block, Op::ContinueBlockMarker, marked);
}

/// Append a merge annotation at the terminator position of `block`.
fn append_marker(func: &mut Function, block: BlockId, op: Op) {
    let inst = func.insts.push(Inst { op, result: None });
    func.blocks[block].insts.push(inst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::NodePool;
    use crate::ir::FunctionBuilder;

    #[test]
    fn import_strips_markers_and_dedups_phi_entries() {
        let mut fb = FunctionBuilder::new("f");
        let v1 = fb.value("v1");
        let v2 = fb.value("v2");
        let t = fb.create_block("t");
        let m = fb.create_block("m");
        fb.br(t);
        fb.switch_to_block(t);
        fb.opaque_void("effect", &[]);
        fb.br(m);
        fb.switch_to_block(m);
        // Duplicate incoming block: only the first entry survives import.
        fb.phi(&[(t, v1), (t, v2)]);
        fb.ret(None);

        let mut func = fb.build();
        // A stale marker from an earlier round is stripped on import.
        let marker = func.insts.push(Inst {
            op: Op::MergeBlockMarker,
            result: None,
        });
        func.blocks[t].insts.insert(0, marker);

        let mut pool = NodePool::new();
        let entry = import(&func, &mut pool).unwrap();

        let t_node = pool
            .iter()
            .find(|(_, n)| n.name == "t")
            .map(|(id, _)| id)
            .unwrap();
        let m_node = pool
            .iter()
            .find(|(_, n)| n.name == "m")
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(pool[t_node].ir.operations.len(), 1, "marker stripped");
        assert_eq!(pool[m_node].ir.phis[0].incoming.len(), 1);
        assert_eq!(pool[m_node].ir.phis[0].incoming[0].value, v1);
        assert_eq!(pool[entry].ir.terminator, Terminator::Branch { target: t_node });
    }

    #[test]
    fn round_trip_preserves_shape_without_rewrites() {
        let mut fb = FunctionBuilder::new("f");
        let c = fb.value("c");
        let t = fb.create_block("t");
        let e = fb.create_block("e");
        fb.br_if(c, t, e);
        fb.switch_to_block(t);
        fb.opaque_void("left", &[]);
        fb.ret(None);
        fb.switch_to_block(e);
        fb.opaque_void("right", &[]);
        fb.ret(None);

        let mut func = fb.build();
        let before = func.blocks.clone();

        let mut pool = NodePool::new();
        let entry = import(&func, &mut pool).unwrap();
        emit(&mut func, &mut pool, entry);

        for (id, block) in func.blocks.iter() {
            assert_eq!(block.terminator, before[id].terminator);
            assert_eq!(block.insts, before[id].insts);
        }
    }

    #[test]
    fn import_requires_a_terminator() {
        let mut fb = FunctionBuilder::new("f");
        let dangling = fb.create_block("dangling");
        fb.br(dangling);

        let func = fb.build();
        let mut pool = NodePool::new();
        let err = import(&func, &mut pool).unwrap_err();
        assert!(matches!(
            err,
            StructurizeError::UnsupportedTerminator { .. }
        ));
    }
}
