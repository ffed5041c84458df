//! `clipseek` command-line entry point.

mod cli_args;
mod commands;
mod settings;

use anyhow::Result;
use clap::Parser;
use clipseek_core::{AutoDecoder, ClipExtractor, FfmpegDecoder};
use tracing::{debug, info};

use cli_args::{Cli, Command};
use settings::{default_settings_path, load_settings};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clipseek=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    debug!(path = %settings_path.display(), ?settings, "settings loaded");

    let ffmpeg = cli
        .ffmpeg
        .clone()
        .unwrap_or_else(|| settings.ffmpeg_path.clone().into());
    let decoder = AutoDecoder::new(FfmpegDecoder::new(ffmpeg.clone()));
    let cfg = settings.to_match_config();
    info!(version = env!("CARGO_PKG_VERSION"), "clipseek starting");

    match &cli.command {
        Command::Find(args) => commands::run_find(cfg, &decoder, args),
        Command::Batch(args) => commands::run_batch(cfg, &settings, &decoder, args),
        Command::BuildDb(args) => commands::run_build_db(cfg, &decoder, args),
        Command::ListDb(args) => commands::run_list_db(&settings, args),
        Command::ExtractClips(args) => {
            commands::run_extract_clips(cfg, &decoder, &ClipExtractor::new(ffmpeg), args)
        }
    }
}
