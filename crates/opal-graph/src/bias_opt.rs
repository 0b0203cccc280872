//! Bias layout pre-optimization.

use std::collections::HashMap;

use crate::layout::Layout;
use crate::node::{NodeId, PrimitiveKind};
use crate::program::Program;
use crate::Pass;

/// Memoizes layout-conversion nodes per source operand.
///
/// Keyed by (source node, source layout, target layout): two consumers
/// that need the same constant in the same layout share one reorder node
/// instead of converting twice.
#[derive(Debug, Default)]
pub struct ReorderFactory {
    cache: HashMap<(NodeId, Layout, Layout), NodeId>,
}

impl ReorderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures `user`'s `slot`-th dependency arrives in layout `dst`.
    ///
    /// Returns `None` when the operand is already in `dst`. Otherwise
    /// returns the reorder node id and whether it was freshly created.
    /// A cached reorder is rewired in place of the slot; a fresh one is
    /// spliced between the operand and `user`.
    pub fn get_reorder(
        &mut self,
        program: &mut Program,
        user: NodeId,
        slot: usize,
        dst: Layout,
    ) -> Option<(NodeId, bool)> {
        let src_id = program.node(user).dependency(slot);
        let src = program.node(src_id).output_layout;
        if src == dst {
            return None;
        }
        if let Some(&reorder) = self.cache.get(&(src_id, src, dst)) {
            program.node_mut(user).deps[slot] = reorder;
            program.rebuild_processing_order();
            return Some((reorder, false));
        }
        let name = format!("{}_reorder", program.node(src_id).name);
        let reorder =
            program.add_intermediate(user, slot, PrimitiveKind::Reorder, name, dst);
        self.cache.insert((src_id, src, dst), reorder);
        Some((reorder, true))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Canonicalizes bias operands to a single-row per-channel layout.
///
/// Kernels expect a bias as `1 x C x 1 x 1` in [`Format::Bfyx`]; models
/// frequently carry it as a flat row or a column instead. For every
/// weighted node the pass inspects its bias span and splices a reorder in
/// front of any bias whose layout differs, reusing reorders through a
/// [`ReorderFactory`] so a bias shared by several nodes converts once.
///
/// [`Format::Bfyx`]: crate::Format::Bfyx
#[derive(Debug, Default)]
pub struct PreOptimizeBias {
    factory: ReorderFactory,
}

impl PreOptimizeBias {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pass for PreOptimizeBias {
    fn name(&self) -> &str {
        "pre_optimize_bias"
    }

    fn run(&mut self, program: &mut Program) -> bool {
        let order: Vec<NodeId> = program.processing_order().to_vec();
        let mut changed = false;
        for id in order {
            if !program.is_live(id) || !program.node(id).kind.has_weights() {
                continue;
            }
            for slot in program.node(id).bias_range() {
                let bias = program.node(id).dependency(slot);
                let dst = program.node(bias).output_layout.bias_layout();
                if let Some((reorder, fresh)) =
                    self.factory.get_reorder(program, id, slot, dst)
                {
                    log::debug!(
                        "pre_optimize_bias: {} slot {slot} via {} ({})",
                        program.node(id).name,
                        program.node(reorder).name,
                        if fresh { "new" } else { "cached" },
                    );
                    changed = true;
                }
            }
        }
        changed
    }
}
