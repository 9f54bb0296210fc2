//! imagepipe CLI - Command-line interface
//!
//! This binary provides a command-line interface to the imagepipe library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::common::{parse_dimensions, PriorityArg};
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "imagepipe")]
#[command(version, about = "Load, decode and process images with request coalescing", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.imagepipe/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load images and save them as PNG files
    Fetch {
        /// Image URLs; repeated URLs share one download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory for the output files
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Resize to WIDTHxHEIGHT, ignoring aspect ratio
        #[arg(long, value_parser = parse_dimensions)]
        resize: Option<(u32, u32)>,

        /// Convert to grayscale
        #[arg(long)]
        grayscale: bool,

        /// Gaussian blur with the given sigma
        #[arg(long)]
        blur: Option<f32>,

        /// Decode a thumbnail no larger than this many pixels on its longest side
        #[arg(long)]
        thumbnail: Option<u32>,

        /// Request priority
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,

        /// Ignore cached data and images
        #[arg(long)]
        reload: bool,

        /// Save the downloaded bytes without decoding
        #[arg(long, conflicts_with_all = ["resize", "grayscale", "blur", "thumbnail"])]
        raw: bool,

        /// Run every request separately, even for equal URLs
        #[arg(long)]
        no_coalescing: bool,

        /// Decode previews while data arrives
        #[arg(long)]
        progressive: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage the disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Fetch {
            urls,
            output_dir,
            resize,
            grayscale,
            blur,
            thumbnail,
            priority,
            reload,
            raw,
            no_coalescing,
            progressive,
        } => {
            if let Some(sigma) = blur.filter(|sigma| !(*sigma > 0.0)) {
                return Err(CliError::Usage(format!(
                    "--blur must be positive, got {}",
                    sigma
                )));
            }
            let args = FetchArgs {
                urls,
                output_dir,
                resize,
                grayscale,
                blur,
                thumbnail,
                priority,
                reload,
                raw,
                no_coalescing,
                progressive,
            };
            commands::fetch::run(args, config_path).await
        }
        Commands::Config { command } => commands::config::run(command, config_path),
        Commands::Cache { action } => commands::cache::run(action, config_path).await,
    }
}
