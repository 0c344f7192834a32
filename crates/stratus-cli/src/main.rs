//! Stratus synthesis CLI.
//!
//! Provides the `stratus` binary. The `plan` subcommand reads a construct
//! file and an optional constraints file, runs the orchestrator against
//! the knowledge base (embedded, or the directory named by `KB_DIR`), and
//! writes the resulting resource graph as YAML.
//!
//! Exit codes: 0 success, 2 constraints unsatisfied, 3 knowledge-base
//! consistency error, 4 I/O error, 5 canceled.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stratus_cli::{input, output};
use stratus_engine::{FailureKind, Orchestrator, OrchestratorConfig};
use stratus_kb::KnowledgeBase;

/// Infrastructure synthesis engine.
#[derive(Parser)]
#[command(name = "stratus", about = "Infrastructure synthesis engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Lower a construct graph to a provider-ready resource graph.
    Plan {
        /// Path to the construct file.
        #[arg(short, long)]
        input: PathBuf,

        /// Path to the constraints file.
        #[arg(short, long)]
        constraints: Option<PathBuf>,

        /// Output path (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

const EXIT_OK: i32 = 0;
const EXIT_UNSATISFIED: i32 = 2;
const EXIT_KB: i32 = 3;
const EXIT_IO: i32 = 4;
const EXIT_CANCELED: i32 = 5;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Plan {
            input,
            constraints,
            output,
        } => run_plan(&input, constraints.as_deref(), output.as_deref()),
    };
    process::exit(exit_code);
}

fn run_plan(
    input: &std::path::Path,
    constraints: Option<&std::path::Path>,
    output: Option<&std::path::Path>,
) -> i32 {
    let kb = match KnowledgeBase::load() {
        Ok(kb) => Arc::new(kb),
        Err(e) => {
            eprintln!("Error: failed to load knowledge base: {e}");
            return EXIT_KB;
        }
    };

    let raw_input = match std::fs::read_to_string(input) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {e}", input.display());
            return EXIT_IO;
        }
    };
    let graph = match input::load_construct_graph(&raw_input, &kb) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Error: invalid construct file '{}': {e}", input.display());
            return EXIT_IO;
        }
    };

    let constraints = match constraints {
        Some(path) => {
            let raw = match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("Error: failed to read '{}': {e}", path.display());
                    return EXIT_IO;
                }
            };
            match input::load_constraints(&raw) {
                Ok(constraints) => constraints,
                Err(e) => {
                    eprintln!("Error: invalid constraints file '{}': {e}", path.display());
                    return EXIT_IO;
                }
            }
        }
        None => Vec::new(),
    };

    let orchestrator = Orchestrator::new(kb, OrchestratorConfig::from_env());
    match orchestrator.run(&graph, &constraints) {
        Ok(solved) => match output::serialize_graph(&solved.graph) {
            Ok(yaml) => write_output(output, &yaml),
            Err(e) => {
                eprintln!("Error: failed to serialize output: {e}");
                EXIT_IO
            }
        },
        Err(failure) => {
            eprint!("{}", failure.diagnostics);
            // A partial graph still goes out for inspection.
            if let Some(partial) = &failure.partial {
                if let Ok(yaml) = output::serialize_graph(partial) {
                    let _ = write_output(output, &yaml);
                }
            }
            match failure.kind {
                FailureKind::ConstraintUnsatisfied => EXIT_UNSATISFIED,
                FailureKind::KbInconsistency => EXIT_KB,
                FailureKind::Canceled => EXIT_CANCELED,
            }
        }
    }
}

fn write_output(path: Option<&std::path::Path>, yaml: &str) -> i32 {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, yaml) {
                eprintln!("Error: failed to write '{}': {e}", path.display());
                return EXIT_IO;
            }
            EXIT_OK
        }
        None => {
            print!("{yaml}");
            EXIT_OK
        }
    }
}
