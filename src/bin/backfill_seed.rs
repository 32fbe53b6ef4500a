use anyhow::Result;
use clap::{Parser, Subcommand};
use seed_backfill::cli::backfill::{repl, run_once, BackfillArgs, BackfillCliConfig};
use seed_backfill::tracing::init_tracing;
use seed_backfill::util::env;

#[derive(Parser, Debug)]
#[command(name = "backfill_seed", version, about = "Backfill randomizer seed metadata into the races table")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Backfill one seed
    Run(BackfillArgs),
    /// Interactive session; one seed per line, sharing one database connection
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();
    let cfg = BackfillCliConfig {
        database_url: cli.db_url,
    };
    match cli.command {
        Commands::Run(args) => run_once(cfg, args).await,
        Commands::Repl => repl(cfg).await,
    }
}
