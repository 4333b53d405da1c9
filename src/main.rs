use anyhow::{Context, Result};
use clap::Parser;
use hydrosched::{run, InputArgs};
use std::process;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "hydrosched")]
#[command(version)]
#[command(about = "Stochastic dual dynamic programming for hydrothermal scheduling")]
struct Cli {
    /// Directory with config.json, system.json, graph.json and recourse.json
    path: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Cut file of a previous training, for simulating without training
    #[arg(long)]
    cuts: Option<String>,

    /// Skip the policy simulation
    #[arg(long)]
    no_simulation: bool,
}

fn setup_logging(verbose: bool) -> Result<()> {
    // RUST_LOG takes precedence over the verbosity flag
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set the tracing subscriber")
}

fn try_main(cli: Cli) -> Result<()> {
    setup_logging(cli.verbose)?;
    let args = InputArgs {
        path: cli.path,
        cuts: cli.cuts,
        simulate: !cli.no_simulation,
    };
    run(&args)
        .with_context(|| format!("Failed to run the study in '{}'", args.path))
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = try_main(cli) {
        eprintln!("Application error: {e:#}");
        process::exit(1);
    }
}
