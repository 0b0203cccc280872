//! Shared fixtures: graph builders, mock driver and stream, and a
//! reference evaluator for the linear IR.

use std::collections::HashMap;
use std::sync::Arc;

use opal_cache::{CompiledKernel, CompilerDriver, DriverError, KernelSource};
use opal_exec::{BufferAllocator, BufferId, DeviceStream, Event, ExecError, KernelArgs};
use opal_graph::{DataType, Format, Layout, NodeId, PrimitiveKind, Program, ProgramNode};
use opal_lir::{Dim, ExprId, LinearIr, LirOp};

#[allow(dead_code)]
pub fn act_layout(features: i64) -> Layout {
    Layout::new(DataType::F32, Format::Bfyx, &[1, features, 8, 8])
}

#[allow(dead_code)]
pub fn flat_bias(features: i64) -> Layout {
    Layout::new(DataType::F32, Format::Bfyx, &[features])
}

/// input -> conv(+w,+b) -> relu -> pool, pool marked output.
#[allow(dead_code)]
pub fn conv_chain(features: i64) -> (Program, [NodeId; 6]) {
    let mut p = Program::new();
    let input = p.add_node(PrimitiveKind::Input, "input", vec![], act_layout(features));
    let w = p.add_data("weights", act_layout(features));
    let b = p.add_data("bias", flat_bias(features));
    let conv = p.add_node(
        PrimitiveKind::Convolution,
        "conv",
        vec![input, w, b],
        act_layout(features),
    );
    let relu = p.add_node(PrimitiveKind::Activation, "relu", vec![conv], act_layout(features));
    let pool = p.add_node(PrimitiveKind::Pooling, "pool", vec![relu], act_layout(features));
    p.mark_output(pool);
    p.rebuild_processing_order();
    (p, [input, w, b, conv, relu, pool])
}

/// "Compiles" by reversing the source bytes so binaries are nontrivial.
#[derive(Debug, Default)]
pub struct MockDriver {
    pub fail_options: Option<String>,
}

impl CompilerDriver for MockDriver {
    fn build(
        &self,
        options: &str,
        sources: &[Arc<KernelSource>],
    ) -> Result<Vec<CompiledKernel>, DriverError> {
        if self.fail_options.as_deref() == Some(options) {
            return Err(DriverError(format!("cannot build with `{options}`")));
        }
        Ok(sources
            .iter()
            .map(|s| CompiledKernel {
                entry_point: s.entry_point.clone(),
                binary: Arc::new(s.code.bytes().rev().collect()),
            })
            .collect())
    }
}

#[allow(dead_code)]
pub fn source(code: &str, options: &str, entry: &str) -> Arc<KernelSource> {
    Arc::new(KernelSource {
        code: code.into(),
        build_options: options.into(),
        entry_point: entry.into(),
    })
}

/// Sequential allocator handing out fresh buffer ids.
#[derive(Default)]
pub struct SeqAllocator {
    next: u32,
}

impl BufferAllocator for SeqAllocator {
    fn alloc(&mut self, _node: &ProgramNode) -> Result<BufferId, ExecError> {
        self.next += 1;
        Ok(BufferId(self.next))
    }
}

/// Records every dispatch with the events it waited on, plus the
/// membership of each aggregate event.
#[derive(Default)]
pub struct RecordingStream {
    next: u64,
    /// (entry point, completion event, waited-on events).
    pub dispatches: Vec<(String, Event, Vec<Event>)>,
    /// Aggregate event -> the events it joins.
    pub joins: HashMap<Event, Vec<Event>>,
    pub markers: usize,
}

impl RecordingStream {
    /// True if waiting on `waited` transitively covers `target`.
    #[allow(dead_code)]
    pub fn covers(&self, waited: &[Event], target: Event) -> bool {
        waited.iter().any(|&e| {
            e == target
                || self
                    .joins
                    .get(&e)
                    .is_some_and(|members| self.covers(members, target))
        })
    }
}

impl DeviceStream for RecordingStream {
    fn enqueue(
        &mut self,
        kernel: &CompiledKernel,
        _args: &KernelArgs,
        wait_for: &[Event],
    ) -> Result<Event, ExecError> {
        self.next += 1;
        let event = Event(self.next);
        self.dispatches
            .push((kernel.entry_point.clone(), event, wait_for.to_vec()));
        Ok(event)
    }

    fn enqueue_marker(&mut self, deps: &[Event]) -> Event {
        self.markers += 1;
        self.next += 1;
        let event = Event(self.next);
        self.joins.insert(event, deps.to_vec());
        event
    }

    fn group_events(&mut self, deps: &[Event]) -> Event {
        self.next += 1;
        let event = Event(self.next);
        self.joins.insert(event, deps.to_vec());
        event
    }

    fn user_event(&mut self, _set: bool) -> Event {
        self.next += 1;
        Event(self.next)
    }

    fn wait(&mut self, _event: Event) -> Result<(), ExecError> {
        Ok(())
    }
}

/// Reference evaluator: runs expressions as pure dataflow over dense
/// f32 tensors in physical order, with size-1 broadcasting.
#[allow(dead_code)]
pub fn evaluate(ir: &LinearIr, params: &HashMap<ExprId, Vec<f32>>) -> HashMap<ExprId, Vec<f32>> {
    let mut values: HashMap<ExprId, Vec<f32>> = HashMap::new();
    for &id in ir.order() {
        let e = ir.expr(id);
        let out_shape = fixed_shape(&e.out_descs[0].shape);
        let arg = |slot: usize| -> (Vec<f32>, Vec<u64>) {
            let src = ir.source_of(id, slot);
            (
                values[&src.expr].clone(),
                fixed_shape(&ir.expr(src.expr).out_descs[src.port].shape),
            )
        };
        let value = match e.op {
            LirOp::Scalar(c) => vec![c],
            LirOp::Parameter => params
                .get(&id)
                .unwrap_or_else(|| panic!("no value bound for parameter {id}"))
                .clone(),
            LirOp::Load | LirOp::Store | LirOp::Result => arg(0).0,
            LirOp::Broadcast => {
                let (v, shape) = arg(0);
                broadcast_map(&v, &shape, &out_shape, |a| a)
            }
            LirOp::Add => zip_broadcast(arg(0), arg(1), &out_shape, |a, b| a + b),
            LirOp::Sub => zip_broadcast(arg(0), arg(1), &out_shape, |a, b| a - b),
            LirOp::Mul => zip_broadcast(arg(0), arg(1), &out_shape, |a, b| a * b),
            LirOp::Max => zip_broadcast(arg(0), arg(1), &out_shape, |a, b| a.max(b)),
        };
        values.insert(id, value);
    }
    values
}

fn fixed_shape(dims: &[Dim]) -> Vec<u64> {
    dims.iter()
        .map(|d| match d {
            Dim::Fixed(n) => *n,
            Dim::Dynamic => panic!("evaluator cannot run dynamic shapes"),
        })
        .collect()
}

fn element_count(shape: &[u64]) -> usize {
    shape.iter().product::<u64>() as usize
}

/// Maps a linear index in `out_shape` to the linear index of the same
/// coordinate in `in_shape`, clamping size-1 dimensions.
fn project_index(mut idx: usize, out_shape: &[u64], in_shape: &[u64]) -> usize {
    let mut coords = vec![0u64; out_shape.len()];
    for (d, &extent) in out_shape.iter().enumerate().rev() {
        coords[d] = idx as u64 % extent;
        idx /= extent as usize;
    }
    let offset = out_shape.len() - in_shape.len();
    let mut at = 0usize;
    for (d, &extent) in in_shape.iter().enumerate() {
        let c = if extent == 1 { 0 } else { coords[d + offset] };
        at = at * extent as usize + c as usize;
    }
    at
}

fn broadcast_map(v: &[f32], shape: &[u64], out_shape: &[u64], f: impl Fn(f32) -> f32) -> Vec<f32> {
    (0..element_count(out_shape))
        .map(|i| f(v[project_index(i, out_shape, shape)]))
        .collect()
}

fn zip_broadcast(
    (a, a_shape): (Vec<f32>, Vec<u64>),
    (b, b_shape): (Vec<f32>, Vec<u64>),
    out_shape: &[u64],
    f: impl Fn(f32, f32) -> f32,
) -> Vec<f32> {
    (0..element_count(out_shape))
        .map(|i| {
            f(
                a[project_index(i, out_shape, &a_shape)],
                b[project_index(i, out_shape, &b_shape)],
            )
        })
        .collect()
}
