//! Primitive kinds and graph nodes.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use crate::layout::Layout;

/// A unique identifier for a node in the primitive graph.
///
/// Plain index into the owning [`Program`](crate::Program)'s node arena;
/// dependency and user relations are stored as these indices, never as
/// owning pointers.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Zero-based arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One compiled unit of computation in the lowered graph.
///
/// A closed set: pass logic matches exhaustively, so adding a kind is a
/// compile error everywhere it matters rather than a silent fallthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// A constant tensor (weights, bias, lookup tables). Never executed.
    Data,
    /// A graph-level input placeholder.
    Input,
    /// 2D convolution.
    Convolution,
    /// 2D deconvolution (transposed convolution).
    Deconvolution,
    /// Fully-connected (inner product).
    FullyConnected,
    /// Element-wise binary operation.
    Eltwise,
    /// Element-wise activation function.
    Activation,
    /// 2D pooling.
    Pooling,
    /// Memory layout conversion between producer and consumer.
    Reorder,
    /// Index gather.
    Gather,
}

impl PrimitiveKind {
    /// The dependency-slot descriptor for this kind.
    pub const fn operand_spec(self) -> OperandSpec {
        match self {
            Self::Data | Self::Input => OperandSpec {
                input_count: 0,
                weight_count: 0,
            },
            Self::Convolution | Self::Deconvolution | Self::FullyConnected => OperandSpec {
                input_count: 1,
                weight_count: 1,
            },
            Self::Eltwise | Self::Gather => OperandSpec {
                input_count: 2,
                weight_count: 0,
            },
            Self::Activation | Self::Pooling | Self::Reorder => OperandSpec {
                input_count: 1,
                weight_count: 0,
            },
        }
    }

    /// Whether this kind carries weight and bias operands.
    pub const fn has_weights(self) -> bool {
        matches!(
            self,
            Self::Convolution | Self::Deconvolution | Self::FullyConnected
        )
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "data",
            Self::Input => "input",
            Self::Convolution => "convolution",
            Self::Deconvolution => "deconvolution",
            Self::FullyConnected => "fully_connected",
            Self::Eltwise => "eltwise",
            Self::Activation => "activation",
            Self::Pooling => "pooling",
            Self::Reorder => "reorder",
            Self::Gather => "gather",
        })
    }
}

/// Per-kind dependency slot counts.
///
/// A node's dependency list is laid out as
/// `[inputs.. | weights.. | bias.. | fused extras..]`; the counts here
/// fix the prefix sizes, and the bias span fills whatever remains before
/// the fused extras.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandSpec {
    /// Number of activation input slots.
    pub input_count: usize,
    /// Number of weight slots.
    pub weight_count: usize,
}

/// An operation fused into its owner node during graph optimization.
///
/// The fused operation's extra operands (if any) are appended to the
/// owner's dependency list after the bias span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FusedOp {
    /// The fused primitive's kind.
    pub kind: PrimitiveKind,
    /// Number of dependency slots the fused operation appended.
    pub extra_dep_count: usize,
}

/// A vertex in the primitive graph.
///
/// Owned exclusively by the [`Program`](crate::Program); all relations to
/// other nodes are [`NodeId`] indices.
#[derive(Clone, Debug)]
pub struct ProgramNode {
    /// This node's arena index.
    pub id: NodeId,
    /// Primitive type tag.
    pub kind: PrimitiveKind,
    /// Human-readable name.
    pub name: String,
    /// Ordered dependency list (see [`OperandSpec`] for slot layout).
    pub deps: Vec<NodeId>,
    /// Whether this node's output buffer is externally visible.
    pub is_output: bool,
    /// Operations fused into this node.
    pub fused_ops: Vec<FusedOp>,
    /// Computed output layout.
    pub output_layout: Layout,
    /// Nodes whose output buffer must never alias this node's buffer.
    /// Symmetric: if `a` lists `b` then `b` lists `a`.
    pub memory_deps: BTreeSet<NodeId>,
    /// Removed by a pass; excluded from the processing order.
    pub(crate) dead: bool,
}

impl ProgramNode {
    /// Whether this node is a constant (its buffer is never reused).
    pub fn is_data(&self) -> bool {
        self.kind == PrimitiveKind::Data
    }

    /// The `i`-th dependency.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range, meaning an upstream pass produced
    /// an invalid graph.
    pub fn dependency(&self, i: usize) -> NodeId {
        assert!(
            i < self.deps.len(),
            "{}: dependency index {i} out of range ({} deps)",
            self.name,
            self.deps.len()
        );
        self.deps[i]
    }

    /// Total dependency slots appended by fused operations.
    pub fn fused_input_count(&self) -> usize {
        self.fused_ops.iter().map(|f| f.extra_dep_count).sum()
    }

    /// Dependency slot range holding weight operands.
    pub fn weights_range(&self) -> Range<usize> {
        let spec = self.kind.operand_spec();
        spec.input_count..spec.input_count + spec.weight_count
    }

    /// Dependency slot range holding bias operands: everything after the
    /// inputs and weights, before any fused-operation extras.
    ///
    /// # Panics
    ///
    /// Panics if the dependency list is shorter than the fixed prefix plus
    /// the fused extras.
    pub fn bias_range(&self) -> Range<usize> {
        let spec = self.kind.operand_spec();
        let start = spec.input_count + spec.weight_count;
        let end = self.deps.len() - self.fused_input_count();
        assert!(
            start <= end,
            "{}: dependency list too short for {} operands ({} deps, {} fused extras)",
            self.name,
            self.kind,
            self.deps.len(),
            self.fused_input_count()
        );
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DataType, Format};

    fn node(kind: PrimitiveKind, deps: Vec<NodeId>) -> ProgramNode {
        ProgramNode {
            id: NodeId(0),
            kind,
            name: "t".into(),
            deps,
            is_output: false,
            fused_ops: Vec::new(),
            output_layout: Layout::new(DataType::F32, Format::Bfyx, &[1]),
            memory_deps: BTreeSet::new(),
            dead: false,
        }
    }

    #[test]
    fn conv_bias_range_after_input_and_weights() {
        let n = node(
            PrimitiveKind::Convolution,
            vec![NodeId(1), NodeId(2), NodeId(3)],
        );
        assert_eq!(n.weights_range(), 1..2);
        assert_eq!(n.bias_range(), 2..3);
    }

    #[test]
    fn fused_extras_shrink_bias_range() {
        let mut n = node(
            PrimitiveKind::Convolution,
            vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)],
        );
        n.fused_ops.push(FusedOp {
            kind: PrimitiveKind::Eltwise,
            extra_dep_count: 1,
        });
        assert_eq!(n.bias_range(), 2..3);
    }

    #[test]
    fn biasless_conv_has_empty_range() {
        let n = node(PrimitiveKind::Convolution, vec![NodeId(1), NodeId(2)]);
        assert!(n.bias_range().is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn dependency_out_of_range_panics() {
        let n = node(PrimitiveKind::Activation, vec![NodeId(1)]);
        n.dependency(1);
    }

    #[test]
    fn operand_specs_are_exhaustive() {
        assert_eq!(PrimitiveKind::FullyConnected.operand_spec().weight_count, 1);
        assert_eq!(PrimitiveKind::Eltwise.operand_spec().input_count, 2);
        assert!(!PrimitiveKind::Pooling.has_weights());
        assert!(PrimitiveKind::Deconvolution.has_weights());
    }
}
