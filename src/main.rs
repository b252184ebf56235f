//! dlink CLI
//!
//! Resolves protected and ad-gated download links into direct URLs.
//! Falls back to headless Chrome when plain HTTP is not enough.

use anyhow::Result;
use clap::{Parser, Subcommand};

use dlink::classify::{run_classify, run_sites, ClassifyArgs, SitesArgs};
use dlink::resolve_links::{run_resolve, ResolveArgs};

#[derive(Parser)]
#[command(name = "dlink")]
#[command(version)]
#[command(about = "Resolve protected and ad-gated download links into direct URLs")]
#[command(long_about = "Resolves link shorteners, file-host gates and bot-protected pages into direct download URLs.\n\nCommands:\n  resolve    Resolve links to direct download URLs\n  classify   Show which site family a link belongs to\n  sites      List supported domain substrings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve links to direct download URLs
    Resolve(ResolveArgs),
    /// Show which site family a link belongs to
    Classify(ClassifyArgs),
    /// List supported domain substrings
    Sites(SitesArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve(args) => run_resolve(args).await,
        Commands::Classify(args) => run_classify(args).await,
        Commands::Sites(args) => run_sites(args).await,
    }
}
