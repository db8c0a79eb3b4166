//! Selection and switch merge discovery.
//!
//! A conditional or switch that is not a loop header needs a selection
//! merge: its immediate post-dominator when that is legal, otherwise a
//! ladder funnelling the breaking arms toward the enclosing construct's
//! target. Tie-breaks follow the deterministic order (forward post-visit
//! index, then name hash).

use super::node::{MergeType, NodeId};
use super::structurize::Structurizer;
use crate::ir::Terminator;

impl Structurizer<'_> {
    /// Annotate every non-header conditional with a selection merge.
    pub(crate) fn find_selection_merges(&mut self, pass: u32) -> bool {
        let mut changed = false;
        for n in self.analyses.post_order.clone() {
            if !matches!(self.pool[n].ir.terminator, Terminator::Condition { .. }) {
                continue;
            }
            if self.pool[n].is_loop_header() {
                // Loop headers are handled by the loop engine; a conditional
                // header that needs a selection gets a fake one at emission.
                continue;
            }
            changed |= self.assign_selection_merge(n, pass);
        }
        self.update_structured_loop_merge_targets();
        changed
    }

    /// Annotate every non-header switch with a selection merge.
    pub(crate) fn find_switch_blocks(&mut self, pass: u32) -> bool {
        let mut changed = false;
        for n in self.analyses.post_order.clone() {
            if !matches!(self.pool[n].ir.terminator, Terminator::Switch { .. }) {
                continue;
            }
            if self.pool[n].is_loop_header() {
                // A switch cannot be wrapped in a fake selection at
                // emission; move it into a helper successor so the header
                // keeps a plain branch and the switch gets its own merge.
                log::debug!(
                    "splitting switch off loop header `{}`",
                    self.pool[n].name
                );
                self.create_helper_succ_block(n);
                changed = true;
                continue;
            }
            changed |= self.assign_selection_merge(n, pass);
        }
        self.update_structured_loop_merge_targets();
        changed
    }

    /// Shared merge assignment for conditionals and switches. Returns true
    /// when the CFG was rewritten (a ladder was built).
    fn assign_selection_merge(&mut self, header: NodeId, pass: u32) -> bool {
        let natural = match self.pool[header].immediate_post_dominator {
            Some(m) => m,
            None => match self.find_natural_switch_merge_block(header) {
                Some(m) => m,
                None => return self.assign_divergent_selection_merge(header, pass),
            },
        };

        let enclosing = self.innermost_loop_header_for(header);
        let escaping = enclosing
            .is_some_and(|h| self.merge_candidate_is_on_breaking_path(natural, h));

        if escaping {
            let target = self.find_break_target_for_selection_construct(natural, enclosing);
            let merge = self.funnel_or_reuse(header, target, pass);
            let node = &mut self.pool[header];
            node.merge = MergeType::Selection;
            node.selection_merge_block = Some(merge.0);
            return merge.1;
        }

        // A continue block cannot double as another construct's merge; its
        // forward entries funnel through a helper and the continue keeps
        // only the back-edge side.
        if !self.continue_block_can_merge(natural) {
            let forward: Vec<NodeId> = self.pool[natural].forward_preds().collect();
            let (merge, changed) = match forward.as_slice() {
                [single] if self.is_merge_funnel(*single) => (*single, false),
                _ => (self.create_helper_pred_block(natural), true),
            };
            let node = &mut self.pool[header];
            node.merge = MergeType::Selection;
            node.selection_merge_block = Some(merge);
            return changed;
        }

        // A merge with entries from outside the construct is shared with an
        // enclosing scope; funnel the construct-side entries.
        let shared = self.pool[natural]
            .forward_preds()
            .any(|p| !self.pool.dominates(header, p));
        if shared {
            let merge = self.funnel_or_reuse(header, natural, pass);
            let node = &mut self.pool[header];
            node.merge = MergeType::Selection;
            node.selection_merge_block = Some(merge.0);
            return merge.1;
        }

        let node = &mut self.pool[header];
        node.merge = MergeType::Selection;
        node.selection_merge_block = Some(natural);
        false
    }

    /// The arms only re-join at the virtual exit. Inside a loop that means
    /// one arm breaks while the other continues: the break side supplies the
    /// merge. Outside a loop every arm dead-ends and emission resolves the
    /// annotation from the surviving successor.
    fn assign_divergent_selection_merge(&mut self, header: NodeId, pass: u32) -> bool {
        if let Some(h) = self.innermost_loop_header_for(header) {
            let escaping_arm = self.pool[header]
                .forward_succs()
                .find(|&s| self.control_flow_is_escaping(s, h));
            if let Some(arm) = escaping_arm {
                let target = self.find_break_target_for_selection_construct(arm, Some(h));
                let (merge, changed) = self.funnel_or_reuse(header, target, pass);
                let node = &mut self.pool[header];
                node.merge = MergeType::Selection;
                node.selection_merge_block = Some(merge);
                return changed;
            }
        }
        let node = &mut self.pool[header];
        node.merge = MergeType::Selection;
        node.selection_merge_block = None;
        node.selection_merge_exit = true;
        false
    }

    /// Funnel the `header`-dominated predecessors of `target` through a
    /// ladder, reusing an existing funnel so repeated passes converge.
    /// Returns the merge block and whether the CFG changed.
    fn funnel_or_reuse(&mut self, header: NodeId, target: NodeId, pass: u32) -> (NodeId, bool) {
        let dominated: Vec<NodeId> = self.pool[target]
            .preds
            .iter()
            .copied()
            .filter(|&p| {
                !self.pool[target].pred_back_edges.contains(&p)
                    && self.pool.dominates(header, p)
            })
            .collect();
        match dominated.as_slice() {
            [] => (target, false),
            // A direct arm edge is its own funnel.
            [single] if *single == header => (target, false),
            [single] if self.is_merge_funnel(*single) => (*single, false),
            _ => {
                log::debug!(
                    "pass {pass}: funnelling breaks from `{}` toward `{}`",
                    self.pool[header].name,
                    self.pool[target].name
                );
                let ladder = if matches!(self.pool[header].ir.terminator, Terminator::Switch { .. })
                {
                    self.create_switch_merge_ladder(header, target)
                } else {
                    self.create_ladder_block(header, target, "ladder")
                };
                (ladder, true)
            }
        }
    }

    /// A block serving as some loop's continue target cannot also be a
    /// merge block.
    pub(crate) fn continue_block_can_merge(&self, node: NodeId) -> bool {
        !self
            .pool
            .iter()
            .any(|(_, data)| data.loop_continue_block == Some(node))
    }

    /// A merge candidate sits on a breaking path when control through it can
    /// only leave the enclosing loop's body — it never re-reaches the
    /// continue block.
    pub(crate) fn merge_candidate_is_on_breaking_path(
        &self,
        candidate: NodeId,
        loop_header: NodeId,
    ) -> bool {
        self.control_flow_is_escaping(candidate, loop_header)
    }

    /// Whether `node` has left the body of `loop_header`: it is either
    /// outside the header's dominance region or can no longer reach the
    /// continue block.
    pub(crate) fn control_flow_is_escaping(&self, node: NodeId, loop_header: NodeId) -> bool {
        let cont = match self.pool[loop_header].pred_back_edges.first() {
            Some(&c) => c,
            None => return false,
        };
        if node == loop_header || node == cont {
            return false;
        }
        !(self.pool.dominates(loop_header, node)
            && self.analyses.query_reachability(node, cont))
    }

    /// Where a breaking selection construct should funnel to: the enclosing
    /// loop's continue if the candidate is headed there, otherwise its
    /// merge; a loop without a merge keeps the candidate itself.
    pub(crate) fn find_break_target_for_selection_construct(
        &self,
        candidate: NodeId,
        enclosing: Option<NodeId>,
    ) -> NodeId {
        let header = match enclosing {
            Some(h) => h,
            None => return candidate,
        };
        if Some(candidate) == self.pool[header].loop_continue_block {
            return candidate;
        }
        if self
            .pool[header]
            .loop_continue_block
            .is_some_and(|c| self.analyses.query_reachability(candidate, c))
        {
            // Headed back into the body; not actually a break target.
            return candidate;
        }
        self.pool[header].loop_merge_block.unwrap_or(candidate)
    }

    /// When a switch has no post-dominator, a case target that every other
    /// non-terminating case falls through to still works as the natural
    /// merge (`create_switch_merge_ladder` funnels into it later if needed).
    pub(crate) fn find_natural_switch_merge_block(&self, header: NodeId) -> Option<NodeId> {
        let cases = match &self.pool[header].ir.terminator {
            Terminator::Switch { cases, .. } => cases.clone(),
            _ => return None,
        };
        let mut targets: Vec<NodeId> = cases.iter().map(|c| c.target).collect();
        super::analysis::sort_candidates(self.pool, &mut targets);
        targets
            .iter()
            .copied()
            .find(|&candidate| {
                targets.iter().all(|&other| {
                    other == candidate
                        || self.pool[other].ir.terminator.is_exit()
                        || self.analyses.query_reachability(other, candidate)
                })
            })
    }

    /// Build the switch-merge ladder for a switch whose natural merge is
    /// shared with an enclosing scope. Same funnel as selections; kept as a
    /// named entry point because switch fallthrough keeps its own edges.
    pub(crate) fn create_switch_merge_ladder(&mut self, header: NodeId, merge: NodeId) -> NodeId {
        self.create_ladder_block(header, merge, "ladder")
    }
}
