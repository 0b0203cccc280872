//! Memory dependency analysis.

use crate::node::NodeId;
use crate::program::Program;
use crate::{Pass, ProgramNode};

/// Marks node pairs whose output buffers must never alias.
///
/// A single forward walk of the processing order. For every non-constant
/// node the pass records a mutual dependency with each of its direct
/// dependencies, and with every graph output processed before it: output
/// buffers are externally visible, so no later node may reuse one in
/// place. A node that is itself an output joins the running output list
/// only after its own conflicts are recorded.
///
/// Constant nodes are skipped as walk subjects, but a constant that is a
/// direct dependency still enters its consumer's set: a weight buffer
/// must outlive every dispatch that reads it.
#[derive(Debug)]
pub struct BasicMemoryDependencies;

impl Pass for BasicMemoryDependencies {
    fn name(&self) -> &str {
        "basic_memory_dependencies"
    }

    fn run(&mut self, program: &mut Program) -> bool {
        let order: Vec<NodeId> = program.processing_order().to_vec();
        let mut past_outputs: Vec<NodeId> = Vec::with_capacity(order.len());
        let mut changed = false;

        for id in order {
            if program.node(id).is_data() {
                continue;
            }
            let deps: Vec<NodeId> = program.node(id).deps.clone();
            for d in deps {
                changed |= !program.node(id).memory_deps.contains(&d);
                program.add_memory_dependency(id, d);
            }
            for &past in &past_outputs {
                changed |= !program.node(id).memory_deps.contains(&past);
                program.add_memory_dependency(id, past);
            }
            if program.node(id).is_output {
                past_outputs.push(id);
            }
        }
        changed
    }
}

/// True if `a` and `b` may share an output buffer.
pub fn can_share_buffer(a: &ProgramNode, b: &ProgramNode) -> bool {
    !a.memory_deps.contains(&b.id)
}
