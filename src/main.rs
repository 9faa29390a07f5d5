//! depcache CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "depcache")]
#[command(about = "Decide which classes must be recompiled after a build round", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed one compilation round and print the classes to recompile
    Round {
        /// Directory of class descriptors produced by this round
        #[arg(short, long)]
        classes: Option<PathBuf>,

        /// Class whose source file was deleted (repeatable)
        #[arg(long = "removed", value_name = "QNAME")]
        removed: Vec<String>,

        /// Class already compiled successfully in this build (repeatable)
        #[arg(long = "successful", value_name = "QNAME")]
        successful: Vec<String>,

        /// Print the result as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Show what the cache knows about a class
    Show {
        /// Fully qualified class name
        qname: String,
    },
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "depcache={log_level},depcache_make={log_level},depcache_core={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("depcache v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Project root: {}", cli.root.display());

    match cli.command {
        Commands::Round {
            classes,
            removed,
            successful,
            json,
        } => {
            let options = commands::RoundOptions {
                classes,
                removed,
                successful: successful.into_iter().collect(),
                json,
            };
            commands::round(&cli.root, options)
        }
        Commands::Show { qname } => commands::show(&cli.root, &qname),
        Commands::Clear => commands::clear(&cli.root),
        Commands::Version => {
            println!("depcache v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
