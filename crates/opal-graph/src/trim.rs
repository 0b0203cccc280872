//! Dead node elimination.

use std::collections::BTreeSet;

use crate::node::NodeId;
use crate::program::Program;
use crate::Pass;

/// Removes every node no graph output transitively depends on.
///
/// Reachability is a reverse walk over dependency edges starting from the
/// output set. Unreachable nodes are tombstoned in reverse processing
/// order so each one is user-free when it goes.
#[derive(Debug)]
pub struct TrimToOutputs;

impl Pass for TrimToOutputs {
    fn name(&self) -> &str {
        "trim_to_outputs"
    }

    fn run(&mut self, program: &mut Program) -> bool {
        let mut reachable: BTreeSet<NodeId> = BTreeSet::new();
        let mut stack: Vec<NodeId> = program
            .nodes()
            .filter(|n| n.is_output)
            .map(|n| n.id)
            .collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            stack.extend(program.node(id).deps.iter().copied());
        }

        let doomed: Vec<NodeId> = program
            .processing_order()
            .iter()
            .rev()
            .copied()
            .filter(|id| !reachable.contains(id))
            .collect();
        for id in &doomed {
            log::debug!("trim_to_outputs: removing {}", program.node(*id).name);
            program.remove_node(*id);
        }
        !doomed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DataType, Format, Layout};
    use crate::node::PrimitiveKind;

    fn l() -> Layout {
        Layout::new(DataType::F32, Format::Bfyx, &[1, 4, 4, 4])
    }

    #[test]
    fn removes_dangling_branch() {
        let mut p = Program::new();
        let input = p.add_node(PrimitiveKind::Input, "input", vec![], l());
        let keep = p.add_node(PrimitiveKind::Activation, "keep", vec![input], l());
        let side = p.add_node(PrimitiveKind::Activation, "side", vec![input], l());
        let side2 = p.add_node(PrimitiveKind::Pooling, "side2", vec![side], l());
        p.mark_output(keep);
        p.rebuild_processing_order();

        assert!(TrimToOutputs.run(&mut p));
        assert!(p.is_live(input) && p.is_live(keep));
        assert!(!p.is_live(side) && !p.is_live(side2));
        assert_eq!(p.processing_order(), &[input, keep]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn keeps_shared_constants() {
        let mut p = Program::new();
        let input = p.add_node(PrimitiveKind::Input, "input", vec![], l());
        let w = p.add_data("weights", l());
        let conv = p.add_node(PrimitiveKind::Convolution, "conv", vec![input, w], l());
        p.mark_output(conv);
        p.rebuild_processing_order();

        assert!(!TrimToOutputs.run(&mut p));
        assert!(p.is_live(w));
    }
}
