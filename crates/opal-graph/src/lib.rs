//! Primitive graph model and graph-level compilation passes.
//!
//! A [`Program`] is an arena of [`ProgramNode`]s connected by [`NodeId`]
//! indices, kept in a deterministic topological processing order. Passes
//! implement the [`Pass`] trait; a [`PassManager`] runs them once, in
//! order, since each graph pass is a single-shot transformation whose
//! placement in the pipeline matters.
//!
//! Built-in passes:
//! - [`BasicMemoryDependencies`]: marks which node pairs must never share
//!   an output buffer.
//! - [`PreOptimizeBias`]: reorders bias constants into the canonical
//!   per-channel layout before kernel selection.
//! - [`TrimToOutputs`]: removes nodes that no graph output depends on.

mod bias_opt;
mod display;
mod error;
mod layout;
mod memory_deps;
mod node;
mod program;
mod trim;

pub use bias_opt::{PreOptimizeBias, ReorderFactory};
pub use display::dump_program;
pub use error::GraphError;
pub use layout::{DataType, Format, Layout};
pub use memory_deps::{can_share_buffer, BasicMemoryDependencies};
pub use node::{FusedOp, NodeId, OperandSpec, PrimitiveKind, ProgramNode};
pub use program::Program;
pub use trim::TrimToOutputs;

use std::fmt::Debug;

/// A graph-level transformation over a [`Program`].
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass once. Returns `true` if anything was modified.
    fn run(&mut self, program: &mut Program) -> bool;
}

/// Runs passes once each, in registration order.
///
/// Graph passes are not fixed-point rewrites: memory dependency analysis
/// must see the final structure, so it runs after every structural pass.
#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Runs every pass once and validates the resulting graph.
    pub fn run(&mut self, program: &mut Program) -> Result<(), GraphError> {
        for pass in &mut self.passes {
            let changed = pass.run(program);
            log::debug!("pass {}: changed={changed}", pass.name());
            program.validate()?;
        }
        Ok(())
    }
}

/// Convenience function: runs the standard graph pipeline.
pub fn optimize(program: &mut Program) -> Result<(), GraphError> {
    let mut pm = PassManager::new();
    pm.add_pass(Box::new(TrimToOutputs));
    pm.add_pass(Box::new(PreOptimizeBias::new()));
    pm.add_pass(Box::new(BasicMemoryDependencies));
    pm.run(program)
}
