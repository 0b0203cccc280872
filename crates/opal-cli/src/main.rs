use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use opal_graph::{
    dump_program, optimize, DataType, Format, Layout, NodeId, PrimitiveKind, Program,
};

/// Opal primitive graph optimizer
///
/// Reads a line-based graph description, runs the optimization pipeline,
/// and prints the resulting program in processing order.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input graph description file
    input: PathBuf,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Include memory-dependency sets in the dump
    #[arg(long)]
    emit_deps: bool,

    /// Validate and optimize without producing output
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    let mut program = parse_graph(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("graph description parse failed")?;

    optimize(&mut program)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("graph optimization failed")?;

    if cli.dry_run {
        return Ok(());
    }

    let dump = if cli.emit_deps {
        dump_program(&program)
    } else {
        // Strip the memory-dependency annotations for the short form.
        dump_program(&program)
            .lines()
            .map(|l| match l.find(" mem=[") {
                Some(at) => {
                    let tail = l[at..].find(']').map(|e| &l[at + e + 1..]).unwrap_or("");
                    format!("{}{tail}\n", &l[..at])
                }
                None => format!("{l}\n"),
            })
            .collect()
    };

    match &cli.output {
        Some(path) => std::fs::write(path, dump)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{dump}"),
    }
    Ok(())
}

/// Parses the line-based graph description:
///
/// ```text
/// input  NAME DTYPE SHAPE      # graph input, e.g. `input img f32 1x3x8x8`
/// data   NAME DTYPE SHAPE      # constant (weights, bias)
/// node   NAME KIND DEP...      # primitive consuming earlier names
/// output NAME                  # mark a name as a graph output
/// ```
///
/// Shapes are `x`-separated batch-first dims; `#` starts a comment.
fn parse_graph(source: &str) -> Result<Program, String> {
    let mut program = Program::new();
    let mut names: HashMap<String, NodeId> = HashMap::new();

    for (lineno, raw) in source.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let err = |msg: String| format!("line {}: {msg}", lineno + 1);
        let mut words = line.split_whitespace();
        let directive = words.next().unwrap();
        let fields: Vec<&str> = words.collect();

        match directive {
            "input" | "data" => {
                let [name, dtype, shape] = fields[..] else {
                    return Err(err(format!("`{directive}` wants NAME DTYPE SHAPE")));
                };
                let layout = parse_layout(dtype, shape).map_err(&err)?;
                let kind = if directive == "input" {
                    PrimitiveKind::Input
                } else {
                    PrimitiveKind::Data
                };
                let id = program.add_node(kind, name, Vec::new(), layout);
                if names.insert(name.to_owned(), id).is_some() {
                    return Err(err(format!("duplicate name `{name}`")));
                }
            }
            "node" => {
                if fields.len() < 2 {
                    return Err(err("`node` wants NAME KIND DEP...".into()));
                }
                let name = fields[0];
                let kind = parse_kind(fields[1]).map_err(&err)?;
                let mut dep_ids = Vec::with_capacity(fields.len() - 2);
                for dep in &fields[2..] {
                    let id = names
                        .get(*dep)
                        .copied()
                        .ok_or_else(|| err(format!("unknown input name `{dep}`")))?;
                    dep_ids.push(id);
                }
                let Some(&first) = dep_ids.first() else {
                    return Err(err(format!("`{name}` needs at least one input")));
                };
                // Until shape inference, a node inherits its first
                // input's layout.
                let layout = program.node(first).output_layout;
                let id = program.add_node(kind, name, dep_ids, layout);
                if names.insert(name.to_owned(), id).is_some() {
                    return Err(err(format!("duplicate name `{name}`")));
                }
            }
            "output" => {
                let [name] = fields[..] else {
                    return Err(err("`output` wants NAME".into()));
                };
                let id = names
                    .get(name)
                    .copied()
                    .ok_or_else(|| err(format!("unknown name `{name}`")))?;
                program.mark_output(id);
            }
            other => return Err(err(format!("unknown directive `{other}`"))),
        }
    }

    program.rebuild_processing_order();
    log::info!("parsed {} node(s)", program.processing_order().len());
    Ok(program)
}

fn parse_kind(s: &str) -> Result<PrimitiveKind, String> {
    Ok(match s {
        "convolution" => PrimitiveKind::Convolution,
        "deconvolution" => PrimitiveKind::Deconvolution,
        "fully_connected" => PrimitiveKind::FullyConnected,
        "eltwise" => PrimitiveKind::Eltwise,
        "activation" => PrimitiveKind::Activation,
        "pooling" => PrimitiveKind::Pooling,
        "reorder" => PrimitiveKind::Reorder,
        "gather" => PrimitiveKind::Gather,
        _ => return Err(format!("unknown primitive kind `{s}`")),
    })
}

fn parse_layout(dtype: &str, shape: &str) -> Result<Layout, String> {
    let data_type = match dtype {
        "f32" => DataType::F32,
        "f16" => DataType::F16,
        "i8" => DataType::I8,
        "u8" => DataType::U8,
        "i32" => DataType::I32,
        _ => return Err(format!("unknown data type `{dtype}`")),
    };
    let dims: Vec<i64> = shape
        .split('x')
        .map(|d| d.parse().map_err(|_| format!("bad dimension `{d}`")))
        .collect::<Result<_, _>>()?;
    if dims.is_empty() || dims.len() > 4 {
        return Err(format!("shape `{shape}` must have 1 to 4 dims"));
    }
    Ok(Layout::new(data_type, Format::Bfyx, &dims))
}
