use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod player;

#[derive(Debug, Parser)]
#[command(name = "talebridge")]
#[command(about = "Narrative script player over the talebridge boundary")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play a script interactively on the terminal.
    Play(PlayArgs),
    /// Recompile a script and print its canonical source.
    Print(PrintArgs),
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// Script file to play.
    pub script: PathBuf,
    /// Beat to start at instead of the script's entry beat.
    #[arg(long)]
    pub beat: Option<String>,
    /// Structurally identical localized script; its text replaces the
    /// original during playback.
    #[arg(long)]
    pub translations: Option<PathBuf>,
    /// Snapshot file to resume from instead of starting fresh.
    #[arg(long)]
    pub resume: Option<PathBuf>,
    /// Run the engine on a dedicated thread and pump callbacks from here.
    #[arg(long = "dedicated-thread")]
    pub dedicated_thread: bool,
}

#[derive(Debug, Args)]
pub struct PrintArgs {
    pub script: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Play(args) => player::run_play(args),
        Command::Print(args) => player::run_print(args),
    }
}
