//! Explain Fidelity - Main Entry Point

use clap::Parser;
use explain_fidelity::cli::{cmd_all, cmd_merge, cmd_run, cmd_stats, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "explain_fidelity=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(&args.resolve()?)?,
        Commands::Merge(args) => cmd_merge(&args.resolve()?)?,
        Commands::Stats(args) => cmd_stats(&args.resolve()?)?,
        Commands::All(args) => cmd_all(&args.resolve()?)?,
    }

    Ok(())
}
