//! The linear IR: an expression arena plus a physical order.

use crate::error::LirError;
use crate::expr::{ConnId, Connector, ExprId, ExprPort, Expression, LirOp, PortDescriptor};
use crate::loops::LoopManager;

/// A lowered kernel body.
///
/// Expressions and connectors live in arenas and refer to each other by
/// index. `order` is the physical instruction order the emitter walks;
/// loop-relative positions (bounds, hoist targets) are indices into it.
#[derive(Debug, Default)]
pub struct LinearIr {
    exprs: Vec<Expression>,
    conns: Vec<Connector>,
    order: Vec<ExprId>,
    pub loop_manager: LoopManager,
}

impl LinearIr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an expression wired to the given producer ports.
    ///
    /// Input descriptors are inherited from the producers; one output
    /// connector is created per output descriptor.
    pub fn add_expr(
        &mut self,
        op: LirOp,
        inputs: Vec<ExprPort>,
        out_descs: Vec<PortDescriptor>,
        loop_ids: Vec<crate::expr::LoopId>,
    ) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        let mut input_conns = Vec::with_capacity(inputs.len());
        let mut in_descs = Vec::with_capacity(inputs.len());
        for (slot, src) in inputs.iter().enumerate() {
            let conn_id = self.exprs[src.expr.index()].outputs[src.port];
            self.conns[conn_id.index()]
                .consumers
                .push(ExprPort { expr: id, port: slot });
            in_descs.push(self.exprs[src.expr.index()].out_descs[src.port].clone());
            input_conns.push(conn_id);
        }
        let mut outputs = Vec::with_capacity(out_descs.len());
        for port in 0..out_descs.len() {
            let conn_id = ConnId(self.conns.len() as u32);
            self.conns.push(Connector {
                source: ExprPort { expr: id, port },
                consumers: Vec::new(),
            });
            outputs.push(conn_id);
        }
        self.exprs.push(Expression {
            id,
            op,
            inputs: input_conns,
            outputs,
            in_descs,
            out_descs,
            loop_ids,
        });
        self.order.push(id);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expression {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expression {
        &mut self.exprs[id.index()]
    }

    pub fn conn(&self, id: ConnId) -> &Connector {
        &self.conns[id.index()]
    }

    /// Producer port feeding `expr`'s `slot`-th input.
    pub fn source_of(&self, expr: ExprId, slot: usize) -> ExprPort {
        self.conns[self.exprs[expr.index()].inputs[slot].index()].source
    }

    /// Consumer ports of `expr`'s `port`-th output.
    pub fn consumers_of(&self, expr: ExprId, port: usize) -> &[ExprPort] {
        &self.conns[self.exprs[expr.index()].outputs[port].index()].consumers
    }

    pub fn order(&self) -> &[ExprId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Position of an expression in the physical order.
    ///
    /// # Panics
    ///
    /// Panics if the expression is not in the order.
    pub fn position(&self, id: ExprId) -> usize {
        self.order
            .iter()
            .position(|&e| e == id)
            .unwrap_or_else(|| panic!("{id} missing from physical order"))
    }

    /// Moves the expression at `from` to sit immediately before the
    /// expression currently at `to`.
    pub fn move_expr(&mut self, from: usize, to: usize) {
        assert!(from < self.order.len() && to <= self.order.len());
        let id = self.order.remove(from);
        let to = if from < to { to - 1 } else { to };
        self.order.insert(to, id);
    }

    /// First and one-past-last positions of the loop body in the
    /// physical order.
    ///
    /// # Panics
    ///
    /// Panics if no expression carries the loop id.
    pub fn loop_bounds(&self, loop_id: crate::expr::LoopId) -> (usize, usize) {
        let mut begin = None;
        let mut end = 0;
        for (pos, &id) in self.order.iter().enumerate() {
            if self.exprs[id.index()].loop_ids.contains(&loop_id) {
                begin.get_or_insert(pos);
                end = pos + 1;
            }
        }
        let begin = begin.unwrap_or_else(|| panic!("{loop_id} has no body expressions"));
        (begin, end)
    }

    /// Reorders a loop's port lists to match the physical order of their
    /// owning expressions.
    pub fn sort_loop_ports(&mut self, loop_id: crate::expr::LoopId) {
        let positions: Vec<ExprId> = self.order.clone();
        let pos = |p: &ExprPort| {
            let at = positions.iter().position(|&e| e == p.expr).unwrap_or(usize::MAX);
            (at, p.port)
        };
        let info = self.loop_manager.get_mut(loop_id);
        info.input_ports.sort_by_key(|lp| pos(&lp.port));
        info.output_ports.sort_by_key(|lp| pos(&lp.port));
    }

    /// Checks arena and order consistency, returning the first violation.
    pub fn validate(&self) -> Result<(), LirError> {
        if self.order.len() != self.exprs.len() {
            return Err(LirError::OrderMismatch {
                ordered: self.order.len(),
                exprs: self.exprs.len(),
            });
        }
        for e in &self.exprs {
            for (slot, &conn) in e.inputs.iter().enumerate() {
                let this = ExprPort { expr: e.id, port: slot };
                if !self.conns[conn.index()].consumers.contains(&this) {
                    return Err(LirError::DanglingPort { expr: e.id, port: slot });
                }
            }
        }
        // Producers precede consumers in the physical order.
        let mut seen = vec![false; self.exprs.len()];
        for &id in &self.order {
            for slot in 0..self.exprs[id.index()].inputs.len() {
                let src = self.source_of(id, slot);
                if !seen[src.expr.index()] {
                    return Err(LirError::UseBeforeDef { expr: id, producer: src.expr });
                }
            }
            seen[id.index()] = true;
        }
        Ok(())
    }
}
