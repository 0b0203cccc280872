//! Loop-invariant extraction.

use std::collections::BTreeMap;

use crate::expr::{Dim, ExprId, ExprPort, LoopId};
use crate::ir::LinearIr;

/// Moves expressions that do not depend on a loop's iteration variable
/// out of the loop body, to the position immediately before the loop.
///
/// An expression qualifies when every one of its inputs is either a loop
/// input port whose post-hoist stride is exactly 1, or a single-consumer
/// scalar constant that can leave the loop alongside it. Any other input
/// is produced inside the loop during the current iteration, and hoisting
/// would read it too early.
///
/// Loops are processed by increasing dimension depth; within one loop the
/// candidate set is re-derived after every hoist until nothing more
/// qualifies. A loop whose port sets both empty out is dead and is
/// deleted from the manager.
#[derive(Debug, Default)]
pub struct ExtractLoopInvariants;

impl ExtractLoopInvariants {
    pub fn run(&mut self, ir: &mut LinearIr) -> bool {
        let mut by_depth: BTreeMap<usize, Vec<LoopId>> = BTreeMap::new();
        for (&id, info) in ir.loop_manager.map() {
            by_depth.entry(info.dim_idx).or_default().push(id);
        }
        let mut modified = false;
        for (_, loops) in by_depth {
            for loop_id in loops {
                modified |= extract_from_loop(ir, loop_id);
            }
        }
        modified
    }
}

fn extract_from_loop(ir: &mut LinearIr, loop_id: LoopId) -> bool {
    let mut status = false;
    loop {
        // Candidate expressions are the current owners of loop input
        // ports, deduplicated in port order.
        let mut candidates: Vec<ExprId> = Vec::new();
        for lp in &ir.loop_manager.get(loop_id).input_ports {
            if !candidates.contains(&lp.port.expr) {
                candidates.push(lp.port.expr);
            }
        }

        let mut extracted = false;
        for expr in candidates {
            if !is_extraction_applicable(ir, expr, loop_id) {
                continue;
            }
            status = true;
            let (mut begin, end) = ir.loop_bounds(loop_id);
            // Single-consumer scalar operands leave first so the hoisted
            // expression still finds them defined above it.
            for slot in 0..ir.expr(expr).inputs.len() {
                let parent = ir.source_of(expr, slot).expr;
                if ir.expr(parent).op.is_scalar()
                    && ir.expr(parent).loop_ids.last() == Some(&loop_id)
                {
                    extract_expr(ir, parent, &mut begin, end);
                }
            }
            extract_expr(ir, expr, &mut begin, end);
            update_loop_ports(ir, expr, loop_id);
            extracted = true;
            break;
        }

        if ir.loop_manager.get(loop_id).is_dead() {
            log::debug!("extract_loop_invariants: {loop_id} emptied, removing");
            ir.loop_manager.remove_loop_info(loop_id);
            break;
        }
        if !extracted {
            break;
        }
    }
    status
}

fn is_extraction_applicable(ir: &LinearIr, expr: ExprId, loop_id: LoopId) -> bool {
    let input_ports = ir.expr(expr).input_ports();
    if input_ports.is_empty() {
        return false;
    }
    let info = ir.loop_manager.get(loop_id);
    for (slot, port) in input_ports.iter().enumerate() {
        let parent = ir.source_of(expr, slot);
        let scalar_single_consumer = ir.expr(parent.expr).op.is_scalar()
            && ir.consumers_of(parent.expr, parent.port).len() == 1;
        let is_loop_port = info.is_input_port(port);
        if !is_loop_port && !scalar_single_consumer {
            // The input is produced inside the loop each iteration.
            return false;
        }
        if is_loop_port {
            let dim_idx = info.input_port(port).dim_idx;
            if ir.expr(expr).in_descs[slot].stride_after_hoist(dim_idx) != Dim::Fixed(1) {
                // The consumer's addressing assumed the loop's step.
                return false;
            }
        }
    }
    true
}

/// Pops the loop id and relocates `expr` to just before the body start,
/// advancing the start marker past it.
fn extract_expr(ir: &mut LinearIr, expr: ExprId, begin: &mut usize, end: usize) {
    ir.expr_mut(expr).remove_last_loop_id();
    if ir.order()[*begin] != expr {
        let pos = ir.order()[*begin..end]
            .iter()
            .position(|&e| e == expr)
            .map(|p| p + *begin)
            .unwrap_or_else(|| panic!("{expr} not inside the loop body"));
        ir.move_expr(pos, *begin);
    }
    *begin += 1;
}

fn update_loop_ports(ir: &mut LinearIr, expr: ExprId, loop_id: LoopId) {
    // Outputs of the hoisted expression still consumed inside the loop
    // become new loop input ports.
    let mut new_input_ports: Vec<ExprPort> = Vec::new();
    for port in 0..ir.expr(expr).outputs.len() {
        for consumer in ir.consumers_of(expr, port) {
            if ir.expr(consumer.expr).loop_ids.contains(&loop_id) {
                new_input_ports.push(*consumer);
            }
        }
    }
    let old_input_ports = ir.expr(expr).input_ports();
    let info = ir.loop_manager.get(loop_id);
    let dropped_outputs: Vec<ExprPort> = ir
        .expr(expr)
        .output_ports()
        .into_iter()
        .filter(|p| info.is_output_port(p))
        .collect();

    let info = ir.loop_manager.get_mut(loop_id);
    info.update_input_ports(&old_input_ports, &new_input_ports);
    info.remove_output_ports(&dropped_outputs);
    if !info.is_dead() {
        ir.sort_loop_ports(loop_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Dim, LirOp, PortDescriptor};
    use crate::loops::{LoopPort, UnifiedLoopInfo};

    fn port(expr: ExprId, port: usize) -> ExprPort {
        ExprPort { expr, port }
    }

    fn vec_desc(d0: u64, d1: u64) -> PortDescriptor {
        PortDescriptor::new(vec![Dim::Fixed(d0), Dim::Fixed(d1)])
    }

    /// body: s = 3.0; m = p * s; a = m + load(q); store(a)
    /// `p` broadcasts along the iterated dim, so `m` (and `s`) can leave.
    fn invariant_mul_ir() -> (LinearIr, LoopId, [ExprId; 8]) {
        let mut ir = LinearIr::new();
        let p = ir.add_expr(LirOp::Parameter, vec![], vec![vec_desc(8, 1)], vec![]);
        let q = ir.add_expr(LirOp::Parameter, vec![], vec![vec_desc(8, 4)], vec![]);
        let mut lm_info = UnifiedLoopInfo::new(0);
        let s = ir.add_expr(LirOp::Scalar(3.0), vec![], vec![PortDescriptor::scalar()], vec![]);
        let l = ir.add_expr(LirOp::Load, vec![port(q, 0)], vec![vec_desc(8, 4)], vec![]);
        let m = ir.add_expr(
            LirOp::Mul,
            vec![port(p, 0), port(s, 0)],
            vec![vec_desc(8, 1)],
            vec![],
        );
        let a = ir.add_expr(
            LirOp::Add,
            vec![port(m, 0), port(l, 0)],
            vec![vec_desc(8, 4)],
            vec![],
        );
        let st = ir.add_expr(LirOp::Store, vec![port(a, 0)], vec![vec_desc(8, 4)], vec![]);
        let r = ir.add_expr(LirOp::Result, vec![port(st, 0)], vec![vec_desc(8, 4)], vec![]);

        lm_info.input_ports = vec![
            LoopPort { port: port(l, 0), dim_idx: 0 },
            LoopPort { port: port(m, 0), dim_idx: 0 },
        ];
        lm_info.output_ports = vec![LoopPort { port: port(st, 0), dim_idx: 0 }];
        let loop_id = ir.loop_manager.add_loop(lm_info);
        for e in [s, l, m, a, st] {
            ir.expr_mut(e).loop_ids = vec![loop_id];
        }
        (ir, loop_id, [p, q, s, l, m, a, st, r])
    }

    #[test]
    fn hoists_scalar_multiply_out_of_loop() {
        let (mut ir, loop_id, [_, _, s, l, m, a, st, _]) = invariant_mul_ir();
        assert!(ExtractLoopInvariants.run(&mut ir));

        assert!(ir.expr(s).loop_ids.is_empty());
        assert!(ir.expr(m).loop_ids.is_empty());
        assert_eq!(ir.expr(l).loop_ids, vec![loop_id]);
        // `m` and its scalar now sit before the loop body.
        let pos = |e| ir.position(e);
        assert!(pos(s) < pos(m));
        assert!(pos(m) < pos(l));
        assert!(ir.validate().is_ok());

        // `m`'s consumer inside the loop became the new input port.
        let info = ir.loop_manager.get(loop_id);
        let inputs: Vec<ExprPort> = info.input_ports.iter().map(|lp| lp.port).collect();
        assert_eq!(inputs, vec![port(l, 0), port(a, 0)]);
        assert_eq!(info.output_ports[0].port, port(st, 0));
    }

    #[test]
    fn unit_stride_requirement_blocks_strided_loads() {
        let (mut ir, loop_id, [_, _, _, l, _, a, _, _]) = invariant_mul_ir();
        ExtractLoopInvariants.run(&mut ir);
        // `l` walks a [8, 4] tensor: post-hoist stride 4, stays put.
        assert_eq!(ir.expr(l).loop_ids, vec![loop_id]);
        // `a` consumes `l`'s in-loop result, stays put.
        assert_eq!(ir.expr(a).loop_ids, vec![loop_id]);
    }

    #[test]
    fn rerun_is_idempotent() {
        let (mut ir, _, _) = invariant_mul_ir();
        assert!(ExtractLoopInvariants.run(&mut ir));
        let order = ir.order().to_vec();
        assert!(!ExtractLoopInvariants.run(&mut ir));
        assert_eq!(ir.order(), &order[..]);
    }

    #[test]
    fn fully_drained_loop_is_deleted() {
        let mut ir = LinearIr::new();
        let p = ir.add_expr(LirOp::Parameter, vec![], vec![vec_desc(8, 1)], vec![]);
        let s = ir.add_expr(LirOp::Scalar(2.0), vec![], vec![PortDescriptor::scalar()], vec![]);
        let m = ir.add_expr(
            LirOp::Mul,
            vec![port(p, 0), port(s, 0)],
            vec![vec_desc(8, 1)],
            vec![],
        );
        let r = ir.add_expr(LirOp::Result, vec![port(m, 0)], vec![vec_desc(8, 1)], vec![]);

        let mut info = UnifiedLoopInfo::new(0);
        info.input_ports = vec![LoopPort { port: port(m, 0), dim_idx: 0 }];
        info.output_ports = vec![LoopPort { port: port(m, 0), dim_idx: 0 }];
        let loop_id = ir.loop_manager.add_loop(info);
        for e in [s, m] {
            ir.expr_mut(e).loop_ids = vec![loop_id];
        }

        assert!(ExtractLoopInvariants.run(&mut ir));
        assert!(!ir.loop_manager.contains(loop_id));
        assert!(ir.expr(m).loop_ids.is_empty());
        assert_eq!(ir.position(r), 3);
        assert!(ir.validate().is_ok());
    }
}
