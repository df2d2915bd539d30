//! Reelsmith CLI — compile media-composition templates into video.
//!
//! Usage:
//!   reelsmith compile <DESCRIPTOR>   Compile a template into a video
//!   reelsmith validate <DESCRIPTOR>  Check a descriptor for problems
//!   reelsmith probe <PATH>           Show media metadata for a file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use reelsmith_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "reelsmith",
    about = "Template-driven video composition over ffmpeg",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a template descriptor into a single output video
    Compile {
        /// Path to the descriptor JSON
        descriptor: PathBuf,

        /// Output directory for the final video
        #[arg(short, long, default_value = "out")]
        output: PathBuf,

        /// Scratch directory for intermediate artifacts
        #[arg(long)]
        build_dir: Option<PathBuf>,

        /// Persistent asset store shared across compiles
        #[arg(long)]
        assets_dir: Option<PathBuf>,

        /// Maximum number of segment builds in flight at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Audio sample rate for synthesized tracks
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Audio channel layout for synthesized tracks
        #[arg(long)]
        channel_layout: Option<String>,
    },

    /// Validate a template descriptor
    Validate {
        /// Path to the descriptor JSON
        descriptor: PathBuf,
    },

    /// Probe a media file for duration and codec metadata
    Probe {
        /// Path to the media file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut app = AppConfig::load();
    if cli.verbose {
        app.logging.level = "debug".to_string();
    }
    reelsmith_common::logging::init_logging(&app.logging);

    match cli.command {
        Commands::Compile {
            descriptor,
            output,
            build_dir,
            assets_dir,
            max_concurrent,
            sample_rate,
            channel_layout,
        } => {
            commands::compile::run(
                &app,
                descriptor,
                output,
                build_dir,
                assets_dir,
                max_concurrent,
                sample_rate,
                channel_layout,
            )
            .await
        }
        Commands::Validate { descriptor } => commands::validate::run(descriptor),
        Commands::Probe { path } => commands::probe::run(path).await,
    }
}
