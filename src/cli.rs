//! CLI argument parsing for the dispatch-prep-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dispatch-prep-worker",
    about = "Prepares routing problems for same-day field dispatch"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build one routing problem from a snapshot bundle
    Plan {
        /// Snapshot bundle JSON
        #[arg(long)]
        input: PathBuf,
        /// Planning settings JSON; defaults when omitted
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Where to write the problem JSON; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run database migrations and exit
    Migrate,
}
