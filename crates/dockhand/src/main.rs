//! Dockhand command-line launcher
//!
//! - `graph`: describe the container pipeline dependency graph
//! - `plan`: show which prerequisite tools a call would trigger
//! - `simulate`: route a call through dry-run tools and print the result

use anyhow::Result;
use clap::{Parser, Subcommand};
use dockhand_logging::LogConfig;
use dockhand_orchestrator::pipeline::container_pipeline;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

mod cli;

use cli::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "dockhand", version, about = "Dependency-aware container pipeline orchestrator")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to $DOCKHAND_HOME/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session lifetime in seconds
    #[arg(long, global = true, env = "DOCKHAND_SESSION_TTL_SECS")]
    session_ttl_secs: Option<u64>,

    /// Maximum number of live sessions
    #[arg(long, global = true, env = "DOCKHAND_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every tool with its requires/provides and autofix targets
    Graph {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the prerequisite chain the router would run for a tool
    Plan {
        /// Tool to plan for
        tool: String,

        /// Steps the session has already completed
        #[arg(short, long = "completed")]
        completed: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Route a call through dry-run tools and print the route result
    Simulate {
        /// Tool to call
        tool: String,

        /// Call parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Session id to run in
        #[arg(short, long)]
        session: Option<String>,

        /// Re-run even when already satisfied; skip prerequisites
        #[arg(long)]
        force: bool,

        /// Make a pipeline tool report failure (repeatable)
        #[arg(long)]
        fail: Vec<String>,
    },
}

fn run(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides {
        session_ttl_secs: cli.session_ttl_secs,
        max_sessions: cli.max_sessions,
    };
    let config = cli::config::load(cli.config.as_deref(), &overrides)?;
    debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Commands::Graph { json } => {
            cli::graph::run(cli::graph::GraphArgs { json }, &container_pipeline())
        }
        Commands::Plan {
            tool,
            completed,
            json,
        } => cli::plan::run(
            cli::plan::PlanArgs {
                tool,
                completed,
                json,
            },
            &container_pipeline(),
        ),
        Commands::Simulate {
            tool,
            params,
            session,
            force,
            fail,
        } => cli::simulate::run(
            cli::simulate::SimulateArgs {
                tool,
                params,
                session,
                force,
                fail,
            },
            config,
        ),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = dockhand_logging::init_logging(LogConfig {
        app_name: "dockhand",
        verbose: cli.verbose,
        ..LogConfig::default()
    }) {
        eprintln!("WARNING: file logging disabled: {:#}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
