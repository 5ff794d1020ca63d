use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rill_core::executor::worker::worker_main;
use rill_core::{serializer, BridgeRegistry, ExecutorOptions, GraphExecutor};
use rill_nodes::default_registry;
use rill_types::log::{error, info};
use rill_types::serde_json;

#[derive(Parser)]
#[command(name = "rill", about = "Run serialized rill graphs", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a graph document and run it to completion.
    Run {
        /// Path to the graph document (.json, .yml or .yaml).
        path: PathBuf,
        /// Stop after this many seconds instead of waiting for the graph
        /// to finish on its own.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Validate a graph document and print its compact form.
    Check {
        /// Path to the graph document (.json, .yml or .yaml).
        path: PathBuf,
    },
    /// Internal: run as a worker process for a parent launcher.
    #[command(hide = true)]
    Worker,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Worker = cli.command {
        // the worker installs its own stdout-forwarding logger
        return match worker_main(&default_registry()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("worker failed: {err}");
                ExitCode::FAILURE
            }
        };
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match cli.command {
        Command::Run { path, duration } => run(path, duration),
        Command::Check { path } => check(path),
        Command::Worker => unreachable!("handled above"),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: PathBuf, duration: Option<f64>) -> Result<(), Box<dyn std::error::Error>> {
    let registry = default_registry();
    let (graph, initial) = serializer::load(&path, &registry, None)?;
    info!(
        "Loaded graph with {} nodes, initial node {initial}",
        graph.node_count()
    );

    let mut executor =
        GraphExecutor::start_all(&graph, &BridgeRegistry::default(), &ExecutorOptions::default())?;
    match duration {
        Some(seconds) => {
            std::thread::sleep(Duration::from_secs_f64(seconds));
            info!("Duration elapsed, stopping graph");
        }
        None => executor.join_all()?,
    }
    executor.stop_all();
    info!("Graph finished: {}", executor.is_finished());
    Ok(())
}

fn check(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let registry = default_registry();
    let (graph, initial) = serializer::load(&path, &registry, None)?;
    let compact = serializer::to_compact_dict(&graph)?;
    println!("{}", serde_json::to_string_pretty(&compact)?);
    info!(
        "Graph ok: {} nodes, initial node {initial}",
        graph.node_count()
    );
    Ok(())
}
