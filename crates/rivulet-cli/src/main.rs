//! rivulet CLI: run, validate and describe graph definitions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rivulet_core::config::EngineConfig;
use rivulet_exec::{ComponentRegistry, Graph, GraphSpec, TransformRegistry};

#[derive(Parser)]
#[command(name = "rivulet")]
#[command(about = "rivulet: concurrent record-dataflow ETL engine", long_about = None)]
struct Cli {
    /// Log filter, e.g. `debug` or `rivulet_exec=trace` (defaults to RUST_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph definition (YAML, or JSON by extension)
    Run {
        /// Path to the graph definition
        #[arg(short, long)]
        graph: PathBuf,

        /// Memory cap in bytes (overrides config)
        #[arg(long)]
        memory_cap: Option<usize>,

        /// Spill directory (overrides config)
        #[arg(long)]
        spill_dir: Option<String>,

        /// Spill codec: none, zstd or lz4 (overrides config)
        #[arg(long)]
        spill_codec: Option<String>,

        /// Bounded edge capacity in records (overrides config)
        #[arg(long)]
        edge_capacity: Option<usize>,

        /// Print the full graph result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a graph definition parses and every component initialises
    Validate {
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Show the phases, components and edges of a graph definition
    Explain {
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// List the registered component types
    Types,
}

/// Command-line settings that take precedence over the definition's config.
#[derive(Debug, Default)]
struct Overrides {
    memory_cap: Option<usize>,
    spill_dir: Option<String>,
    spill_codec: Option<String>,
    edge_capacity: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    // a subscriber can only fail to install if one already exists
    let _ = rivulet_exec::init_tracing(cli.log.as_deref());

    let outcome = match cli.command {
        Commands::Run {
            graph,
            memory_cap,
            spill_dir,
            spill_codec,
            edge_capacity,
            json,
        } => {
            let overrides = Overrides {
                memory_cap,
                spill_dir,
                spill_codec,
                edge_capacity,
            };
            run_graph(&graph, &overrides, json)
        }
        Commands::Validate { graph } => validate_graph(&graph).map(|()| {
            println!("✓ Graph is valid");
            0
        }),
        Commands::Explain { graph } => explain_graph(&graph).map(|()| 0),
        Commands::Types => {
            for tag in ComponentRegistry::with_builtins().types() {
                println!("{tag}");
            }
            Ok(0)
        }
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn effective_config(spec: &GraphSpec, overrides: &Overrides) -> EngineConfig {
    let mut config = spec.config.clone().unwrap_or_else(EngineConfig::from_env);
    if let Some(cap) = overrides.memory_cap {
        config.mem_cap_bytes = cap;
    }
    if let Some(dir) = &overrides.spill_dir {
        config.spill_dir = dir.clone();
    }
    if let Some(codec) = &overrides.spill_codec {
        config.spill_codec = codec.clone();
    }
    if let Some(capacity) = overrides.edge_capacity {
        config.edge_capacity = capacity;
    }
    config
}

fn build(path: &Path, overrides: &Overrides) -> Result<Graph, Box<dyn std::error::Error>> {
    let spec = GraphSpec::from_path(path)?;
    let config = effective_config(&spec, overrides);
    config.validate()?;
    let mut graph = Graph::with_config(config)?;
    spec.instantiate(
        &mut graph,
        &ComponentRegistry::with_builtins(),
        &TransformRegistry::new(),
    )?;
    Ok(graph)
}

/// Exit code 0 when every component finished OK, 2 otherwise.
fn run_graph(
    path: &Path,
    overrides: &Overrides,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let graph = build(path, overrides)?;
    let result = graph.run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{} Graph finished: {}", if result.is_ok() { "✓" } else { "✗" }, result.code);
        println!("  Run id: {}", result.run_id);
        println!("  Duration: {}ms", result.elapsed_ms);
        println!(
            "  Peak memory: {} bytes, spilled: {} bytes",
            result.memory.peak_bytes, result.memory.spilled_bytes
        );
        for c in &result.components {
            match &c.message {
                Some(msg) => println!("  {} [{}] {}: {}", c.id, c.kind, c.code, msg),
                None => println!("  {} [{}] {}", c.id, c.kind, c.code),
            }
        }
    }
    Ok(if result.is_ok() { 0 } else { 2 })
}

fn validate_graph(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let overrides = Overrides {
        spill_dir: Some("memory://validate".into()),
        ..Overrides::default()
    };
    build(path, &overrides)?.init()?;
    Ok(())
}

fn explain_graph(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let spec = GraphSpec::from_path(path)?;
    let mut phases: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for c in &spec.components {
        phases.entry(c.phase).or_default().push(c.id.as_str());
    }

    println!("Graph");
    println!("=====");
    println!();
    println!("Record layouts:");
    for (name, meta) in &spec.metadata {
        let fields: Vec<String> = meta
            .fields
            .iter()
            .map(|f| format!("{}: {:?}", f.name, f.data_type))
            .collect();
        println!("  {name} ({})", fields.join(", "));
    }
    println!();
    println!("Components:");
    for (phase, ids) in &phases {
        println!("  Phase {phase}:");
        for id in ids {
            if let Some(c) = spec.components.iter().find(|c| c.id == *id) {
                println!("    {} [{}]", c.id, c.kind);
            }
        }
    }
    println!();
    println!("Edges:");
    for e in &spec.edges {
        println!("  {} -> {} ({})", e.from, e.to, e.metadata);
    }
    Ok(())
}
