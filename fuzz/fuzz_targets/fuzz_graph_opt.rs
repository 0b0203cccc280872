#![no_main]

use libfuzzer_sys::fuzz_target;
use opal_graph::{optimize, DataType, Format, Layout, NodeId, PrimitiveKind, Program};

fn layout(b: u8) -> Layout {
    Layout::new(DataType::F32, Format::Bfyx, &[1, i64::from(b % 8) + 1, 4, 4])
}

fn pick(ids: &[NodeId], sel: u8) -> NodeId {
    ids[usize::from(sel) % ids.len()]
}

// Builds an arbitrary acyclic graph and runs the standard pipeline on
// it. Construction only wires dependencies to already-existing nodes,
// so any pass failure or panic is an optimizer bug.
fuzz_target!(|data: &[u8]| {
    let mut p = Program::new();
    let mut ids = vec![p.add_node(PrimitiveKind::Input, "in", vec![], layout(0))];

    for (i, op) in data.chunks_exact(3).enumerate().take(256) {
        let id = match op[0] % 4 {
            0 => p.add_data(format!("d{i}"), layout(op[2])),
            1 => p.add_node(
                PrimitiveKind::Activation,
                format!("a{i}"),
                vec![pick(&ids, op[1])],
                layout(op[2]),
            ),
            2 => p.add_node(
                PrimitiveKind::Eltwise,
                format!("e{i}"),
                vec![pick(&ids, op[1]), pick(&ids, op[2])],
                layout(op[2]),
            ),
            _ => {
                let src = pick(&ids, op[1]);
                let w = p.add_data(format!("w{i}"), layout(op[1]));
                let b = p.add_data(format!("b{i}"), layout(op[2]));
                p.add_node(
                    PrimitiveKind::Convolution,
                    format!("c{i}"),
                    vec![src, w, b],
                    layout(op[2]),
                )
            }
        };
        if op[1] % 5 == 0 {
            p.mark_output(id);
        }
        ids.push(id);
    }

    p.mark_output(*ids.last().unwrap());
    p.rebuild_processing_order();
    optimize(&mut p).unwrap();
});
