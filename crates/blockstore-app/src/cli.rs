use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "blockstore",
    about = "Versioned building-block store: demo, inspect and maintain model files",
    version
)]
pub struct Cli {
    /// Path to the model store file
    #[arg(long, short, default_value = "model.zblk")]
    pub store: PathBuf,

    /// JSON file with store configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a sketch -> extrude -> fillet model and exercise undo/redo
    Demo,

    /// Print store metadata and per-collection document counts
    Inspect {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the store as a single compacted snapshot
    Compact,

    /// Re-encode one collection with its current mapping and stamp its version
    Upgrade {
        /// Collection name
        collection: String,
    },

    /// Write the raw store image to a file
    Export {
        /// Output path
        out: PathBuf,
    },
}
