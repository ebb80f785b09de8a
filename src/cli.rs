// Command-line interface definitions for voxpool
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "voxpool")]
#[command(author, version, about = "Shared speech model manager and STT bridge")]
#[command(long_about = "
Voxpool loads speech-to-text, language and speech-synthesis backends once and
shares them between concurrent requests. Local whisper models are pooled
across accelerators with round-robin dispatch; a remote STT bridge can be used
instead of (or as a fallback for) local models.

USAGE:
  voxpool                  Load models and serve the bridge API
  voxpool transcribe FILE  Transcribe one file through the configured route
  voxpool status           Load models and print the status snapshot
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the primary transcription model (e.g. large-v3, medium, base)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Send speech-to-text to this bridge instead of loading a local model
    #[arg(long, value_name = "URL")]
    pub remote_stt: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load models and serve the bridge API (default if no command specified)
    Serve {
        /// Address to bind (overrides [service] host)
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Port to bind (overrides [service] port)
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Load models and print the status snapshot as JSON
    Status,

    /// Transcribe an audio file through the configured route
    Transcribe {
        /// Path to audio file
        file: std::path::PathBuf,

        /// Language hint (e.g. en, ja); omit for auto-detection
        #[arg(long, value_name = "LANG")]
        language: Option<String>,
    },

    /// List voice profiles
    Voices {
        /// Also list the stored voices of this user
        #[arg(long, value_name = "ID")]
        owner: Option<i64>,
    },

    /// Show the effective configuration
    Config,
}
