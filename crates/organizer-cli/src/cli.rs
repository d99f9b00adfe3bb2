use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface for operating the encrypted store by hand.
#[derive(Parser, Debug)]
#[command(
    name = "organizer",
    about = "Encrypted local storage for the academic organizer",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to a storage health check when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the storage directory and encryption key if they do not exist.
    Init,
    /// Encrypt a file and store it under a name.
    Put {
        /// Entry name, e.g. `courses/cs101/syllabus.pdf`.
        name: String,
        /// File whose bytes are stored.
        file: PathBuf,
    },
    /// Decrypt an entry to stdout or to a file.
    Get {
        name: String,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Overwrite an entry with random bytes, then remove it.
    Rm { name: String },
    /// Round-trip a small value through the store.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
