//! Human-readable program dumps for logs and the CLI.

use std::fmt::Write;

use crate::program::Program;

/// Renders the program in processing order, one node per line.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::new();
    for &id in program.processing_order() {
        let n = program.node(id);
        let _ = write!(out, "{id}: {} `{}` {}", n.kind, n.name, n.output_layout);
        if !n.deps.is_empty() {
            let deps: Vec<String> = n.deps.iter().map(|d| d.to_string()).collect();
            let _ = write!(out, " deps=[{}]", deps.join(", "));
        }
        if !n.memory_deps.is_empty() {
            let mem: Vec<String> = n.memory_deps.iter().map(|d| d.to_string()).collect();
            let _ = write!(out, " mem=[{}]", mem.join(", "));
        }
        if n.is_output {
            out.push_str(" (output)");
        }
        out.push('\n');
    }
    out
}
