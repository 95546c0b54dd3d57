//! Strikewatch CLI - Command-line interface
//!
//! Watches the live lightning feed around a region and logs nearby strikes.

mod commands;
mod error;

use clap::{Parser, Subcommand};

use commands::{cover, init, run};

#[derive(Parser)]
#[command(name = "strikewatch")]
#[command(version)]
#[command(about = "Nearby lightning strikes from the public Blitzortung feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the geohash cells and topics subscribed for a region
    Cover(cover::CoverArgs),

    /// Connect to the broker and log strikes in the configured region
    Run(run::RunArgs),

    /// Write a default configuration file
    Init(init::InitArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Cover(args) => cover::run(args),
        Commands::Run(args) => run::run(args),
        Commands::Init(args) => init::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}
