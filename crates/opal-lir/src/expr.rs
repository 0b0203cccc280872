//! Expressions, ports, and shape descriptors.

use std::fmt;

/// Index of an expression in the [`LinearIr`](crate::LinearIr) arena.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identifier of a loop record in the [`LoopManager`](crate::LoopManager).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop{}", self.0)
    }
}

/// Index of a connector in the [`LinearIr`](crate::LinearIr) arena.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnId(pub u32);

impl ConnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation tag of a lowered expression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LirOp {
    /// A compile-time scalar constant.
    Scalar(f32),
    /// A kernel parameter (external input).
    Parameter,
    /// Memory read.
    Load,
    /// Memory write.
    Store,
    Add,
    Mul,
    Sub,
    Max,
    /// Replicates a scalar across a vector lane.
    Broadcast,
    /// A kernel result (external output).
    Result,
}

impl LirOp {
    pub fn is_scalar(self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

/// One dimension of a port shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(u64),
    /// Unknown until runtime; poisons any stride arithmetic it touches.
    Dynamic,
}

impl Dim {
    fn mul(self, other: Dim) -> Dim {
        match (self, other) {
            (Dim::Fixed(a), Dim::Fixed(b)) => Dim::Fixed(a * b),
            _ => Dim::Dynamic,
        }
    }
}

/// Shape metadata attached to one expression port.
///
/// `dim_idx` counts from the innermost dimension: index 0 is the last
/// shape entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDescriptor {
    pub shape: Vec<Dim>,
}

impl PortDescriptor {
    pub fn new(shape: Vec<Dim>) -> Self {
        Self { shape }
    }

    pub fn scalar() -> Self {
        Self { shape: vec![Dim::Fixed(1)] }
    }

    /// Absolute shape index for an innermost-relative `dim_idx`.
    pub fn shape_dim(&self, dim_idx: usize) -> usize {
        assert!(
            dim_idx < self.shape.len(),
            "dim_idx {dim_idx} out of range for rank {}",
            self.shape.len()
        );
        self.shape.len() - 1 - dim_idx
    }

    /// Row-major stride of the dimension at absolute index `idx`:
    /// the product of all dimensions to its right.
    pub fn stride_at(&self, idx: usize) -> Dim {
        self.shape[idx + 1..]
            .iter()
            .copied()
            .fold(Dim::Fixed(1), Dim::mul)
    }

    /// Effective stride of this port's `dim_idx` dimension once the loop
    /// iterating it is removed: the dimension collapses into its stride,
    /// so the hoisted consumer steps by `stride * extent`.
    pub fn stride_after_hoist(&self, dim_idx: usize) -> Dim {
        let idx = self.shape_dim(dim_idx);
        self.stride_at(idx).mul(self.shape[idx])
    }
}

/// A (expression, port index) pair on a given side of an expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExprPort {
    pub expr: ExprId,
    pub port: usize,
}

/// A dataflow edge: one producer port, any number of consumer ports.
#[derive(Clone, Debug)]
pub struct Connector {
    pub source: ExprPort,
    pub consumers: Vec<ExprPort>,
}

/// A lowered expression.
///
/// `loop_ids` lists the loops this expression sits inside, outermost
/// first; the innermost loop is always last.
#[derive(Clone, Debug)]
pub struct Expression {
    pub id: ExprId,
    pub op: LirOp,
    pub inputs: Vec<ConnId>,
    pub outputs: Vec<ConnId>,
    pub in_descs: Vec<PortDescriptor>,
    pub out_descs: Vec<PortDescriptor>,
    pub loop_ids: Vec<LoopId>,
}

impl Expression {
    /// Input-side ports of this expression, in slot order.
    pub fn input_ports(&self) -> Vec<ExprPort> {
        (0..self.inputs.len())
            .map(|port| ExprPort { expr: self.id, port })
            .collect()
    }

    /// Output-side ports of this expression, in slot order.
    pub fn output_ports(&self) -> Vec<ExprPort> {
        (0..self.outputs.len())
            .map(|port| ExprPort { expr: self.id, port })
            .collect()
    }

    /// Drops the innermost loop id.
    ///
    /// # Panics
    ///
    /// Panics if the expression is not inside any loop.
    pub fn remove_last_loop_id(&mut self) -> LoopId {
        self.loop_ids
            .pop()
            .unwrap_or_else(|| panic!("{}: no loop id to remove", self.id))
    }
}
