//! Lowered linear IR for kernel bodies.
//!
//! After graph-level optimization each fusible subgraph lowers into a
//! [`LinearIr`]: a flat arena of [`Expression`]s in physical emission
//! order, with loops described not as syntax but as port sets in a
//! [`LoopManager`]. [`ExtractLoopInvariants`] is the code-motion pass
//! over this form: it hoists per-iteration-constant expressions to the
//! position immediately enclosing their loop.

mod error;
mod expr;
mod extract;
mod ir;
mod loops;

pub use error::LirError;
pub use expr::{ConnId, Connector, Dim, ExprId, ExprPort, Expression, LirOp, LoopId, PortDescriptor};
pub use extract::ExtractLoopInvariants;
pub use ir::LinearIr;
pub use loops::{LoopManager, LoopPort, UnifiedLoopInfo};
