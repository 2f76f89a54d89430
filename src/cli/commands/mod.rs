//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod check;
mod extract;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ocrx::config::{
    inspect_credentials, load_settings_with_options, CredentialStatus, LoadOptions,
};

#[derive(Parser)]
#[command(name = "ocrx")]
#[command(about = "Extract structured text from images")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from an image file
    Extract {
        /// Image file to read
        file: PathBuf,
        /// Declared MIME type (guessed from the extension if omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Language pack hint (repeatable, e.g. -l eng -l deu)
        #[arg(short, long = "lang")]
        languages: Vec<String>,
        /// Minimum span confidence to include in the text (0.0 - 1.0)
        #[arg(long)]
        min_confidence: Option<f32>,
        /// Longest side of the raster handed to the engine
        #[arg(long)]
        max_dimension: Option<u32>,
        /// Skip median denoising
        #[arg(long)]
        no_denoise: bool,
        /// Skip Otsu binarization
        #[arg(long)]
        no_binarize: bool,
        /// Skip skew correction
        #[arg(long)]
        no_deskew: bool,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server
    Serve {
        /// Address to bind to (port, host, or host:port)
        #[arg(short, long, env = "OCRX_BIND")]
        bind: Option<String>,
    },

    /// Check engine availability, installed languages, and credentials
    Check,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
    };
    let (settings, _config) = load_settings_with_options(options).await?;

    let credentials = inspect_credentials(settings.credentials.as_deref());
    match &credentials {
        CredentialStatus::NotConfigured => {
            tracing::debug!("No cloud credential file configured");
        }
        status if status.is_usable() => tracing::info!("Cloud credentials {}", status),
        status => tracing::warn!("Cloud credentials {}", status),
    }

    match cli.command {
        Commands::Extract {
            file,
            mime,
            languages,
            min_confidence,
            max_dimension,
            no_denoise,
            no_binarize,
            no_deskew,
            json,
        } => {
            let mut options = settings.defaults.clone();
            if !languages.is_empty() {
                options = options.with_languages(languages);
            }
            if let Some(min) = min_confidence {
                options.min_confidence = min;
            }
            if let Some(max) = max_dimension {
                options.max_dimension = max;
            }
            options.denoise &= !no_denoise;
            options.binarize &= !no_binarize;
            options.deskew &= !no_deskew;

            extract::cmd_extract(&settings, &file, mime.as_deref(), &options, json).await
        }
        Commands::Serve { bind } => serve::cmd_serve(&settings, bind.as_deref()).await,
        Commands::Check => check::cmd_check(&settings, &credentials).await,
    }
}
