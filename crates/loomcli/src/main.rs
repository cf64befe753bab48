use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use loomcore::{Blueprint, Event, FlowError, NodeOptions, Value};
use loomruntime::{
    dump_data, dump_library, save_blueprint, validate_blueprint, Format, LoomRuntime,
    PersistError, RuntimeConfig,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Loom blueprint CLI", long_about = None)]
struct Cli {
    /// Runtime configuration file (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a blueprint file
    Run {
        /// Path to the blueprint
        file: PathBuf,

        /// Blueprint argument as key=value; values are parsed as JSON when possible
        #[arg(short, long = "arg", value_parser = parse_arg)]
        args: Vec<(String, Value)>,
    },

    /// Check that a blueprint loads and its wiring is sound
    Validate {
        /// Path to the blueprint
        file: PathBuf,
    },

    /// List available node types
    Nodes {
        /// Output format
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write an example blueprint
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pythagorean.yaml")]
        output: PathBuf,
    },

    /// Print the version
    Version,
}

fn parse_arg(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("missing key in '{}'", raw));
    }
    Ok((key.to_string(), Value::parse_lenient(value)))
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Process status for a blueprint exit code; nonzero codes never wrap to 0.
fn exit_status(code: i32) -> i32 {
    match code & 0xff {
        0 if code != 0 => 1,
        status => status,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = RuntimeConfig::load_or_default(cli.config.as_deref())
        .context("failed to load runtime config")?;
    let runtime = LoomRuntime::with_config(loomnodes::standard_library(), &config);
    tracing::debug!(config = ?cli.config, node_types = runtime.library().len(), "runtime ready");

    match cli.command {
        Commands::Run { file, args } => {
            let code = run_blueprint(&runtime, file, args.into_iter().collect()).await?;
            if code != 0 {
                std::process::exit(exit_status(code));
            }
        }

        Commands::Validate { file } => {
            validate(&runtime, file).await?;
        }

        Commands::Nodes { format } => {
            let format: Format = format.parse()?;
            print!("{}", dump_data(&dump_library(runtime.library()), format)?);
        }

        Commands::Init { output } => {
            create_example_blueprint(&runtime, output)?;
        }

        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Runs the blueprint and returns the process exit code.
async fn run_blueprint(
    runtime: &LoomRuntime,
    file: PathBuf,
    args: HashMap<String, Value>,
) -> Result<i32> {
    println!("🚀 Loading blueprint from: {}", file.display());

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::BlueprintStarted { blueprint, .. } => {
                    println!("▶️  Blueprint {} started", blueprint);
                }
                Event::NodeErrored { node_id, slot, error, .. } => {
                    println!("  ❌ {}.{} failed: {}", node_id, slot, error);
                }
                Event::BlueprintFinished { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Blueprint completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Blueprint failed after {}ms", duration_ms);
                    }
                }
                _ => {}
            }
        }
    });

    let path = file.to_string_lossy();
    let result = runtime.run(&path, args).await;

    // Let the listener drain before printing the summary.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    event_task.abort();

    match result {
        Ok(Some(value)) => {
            println!();
            println!("📤 Result:");
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
            Ok(0)
        }
        Ok(None) => Ok(0),
        Err(PersistError::Flow(FlowError::Exit(code))) => {
            tracing::warn!(code, "blueprint exited");
            eprintln!("Blueprint exited with code {}", code);
            Ok(code)
        }
        Err(e) => Err(anyhow!(e).context(format!("failed to run {}", file.display()))),
    }
}

async fn validate(runtime: &LoomRuntime, file: PathBuf) -> Result<()> {
    println!("🔍 Validating blueprint: {}", file.display());

    let blueprint = runtime.load(&file.to_string_lossy()).await?;
    validate_blueprint(&blueprint)?;

    let nodes = blueprint.walk_nodes().count();
    println!("✅ Blueprint is valid:");
    println!("   Label: {}", blueprint.label());
    println!("   Nodes: {}", nodes);
    Ok(())
}

fn pythagorean(runtime: &LoomRuntime) -> loomcore::Result<Blueprint> {
    let blueprint = Blueprint::with_options(
        runtime
            .blueprint_options()
            .with_label("Pythagorean Theorem"),
    )?;
    blueprint.create("flow.Input", NodeOptions::new().with_id("a").with_value("default", 3))?;
    blueprint.create("flow.Input", NodeOptions::new().with_id("b").with_value("default", 4))?;
    blueprint.create("math.Pow", NodeOptions::new().with_id("a2"))?;
    blueprint.create("math.Pow", NodeOptions::new().with_id("b2"))?;
    blueprint.create("math.Add", NodeOptions::new().with_id("add"))?;
    blueprint.create("math.Sqrt", NodeOptions::new().with_id("sqrt"))?;
    blueprint.create("flow.Return", NodeOptions::new().with_id("c"))?;

    for (source, target) in [
        ("a.value", "a2.base"),
        ("b.value", "b2.base"),
        ("a2.value", "add.a"),
        ("b2.value", "add.b"),
        ("add.value", "sqrt.x"),
        ("sqrt.value", "c.value"),
        ("on_run", "c.return_"),
    ] {
        blueprint.connect(source, target)?;
    }
    Ok(blueprint)
}

fn create_example_blueprint(runtime: &LoomRuntime, output: PathBuf) -> Result<()> {
    let blueprint = pythagorean(runtime)?;
    save_blueprint(&output, &blueprint)?;

    println!("✨ Created example blueprint: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  loom run {} --arg a=5 --arg b=12", output.display());
    Ok(())
}
