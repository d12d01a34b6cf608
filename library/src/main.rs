//! Retrohost launcher
//!
//! Lists the local cache, downloads missing cores, and runs games headless.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use retrohost_core::app::config;
use retrohost_library::commands::{self, RunOptions};

/// Host libretro cores and manage their cache
#[derive(Parser)]
#[command(name = "retrohost")]
#[command(about = "Run libretro cores and keep their cache in sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached cores, apps and saves
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Download missing cores and system files
    Sync {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },

    /// Run an app without a window
    Run {
        /// App name, as shown by `list`
        app: String,

        /// Frames to run
        #[arg(long, default_value_t = 600)]
        frames: u64,

        /// Restore this save before running
        #[arg(long)]
        load: Option<String>,

        /// Save the game under this name afterwards
        #[arg(long)]
        save: Option<String>,

        /// Write a screenshot of the last frame
        #[arg(long)]
        screenshot: bool,

        /// Write the game's audio to a WAV file
        #[arg(long)]
        audio_out: Option<PathBuf>,
    },

    /// Load a save, switching to the app it belongs to
    LoadSave {
        name: String,

        /// App to try first
        #[arg(long)]
        app: Option<String>,
    },

    /// Rename a save
    RenameSave { from: String, to: String },

    /// Show the configuration
    Config {
        /// Write the defaults to config.toml if it does not exist
        #[arg(long)]
        write_default: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load();

    if let Commands::Config { write_default } = cli.command {
        return commands::show_config(&config, write_default);
    }

    let mut web = commands::open_cache(config)?;
    match cli.command {
        Commands::List { json } => commands::list(&web, json),
        Commands::Sync { timeout } => commands::sync(&mut web, Duration::from_secs(timeout)),
        Commands::Run {
            app,
            frames,
            load,
            save,
            screenshot,
            audio_out,
        } => {
            let options = RunOptions {
                frames,
                load,
                save,
                screenshot_dir: screenshot.then(commands::screenshots_dir).flatten(),
                audio_out,
            };
            commands::run(&mut web, &app, &options).map(|_| ())
        }
        Commands::LoadSave { name, app } => {
            commands::load_save(&mut web, &name, app.as_deref()).map(|_| ())
        }
        Commands::RenameSave { from, to } => commands::rename_save(&mut web, &from, &to),
        Commands::Config { .. } => Ok(()),
    }
}
