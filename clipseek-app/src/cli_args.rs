use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clipseek_core::{BackendKind, MatchConfig};

/// Locate short audio clips inside a long recording.
///
/// Settings are read from `--config` (or the per-user settings file) and
/// individual flags override them.
#[derive(Parser, Debug)]
#[command(name = "clipseek", version)]
pub struct Cli {
    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// ffmpeg binary used to decode non-WAV input.
    #[arg(long, global = true)]
    pub ffmpeg: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find one sample inside a long recording.
    Find(FindArgs),

    /// Match every sample in a database against a long recording.
    Batch(BatchArgs),

    /// Decode a directory of clips into a sample database.
    BuildDb(BuildDbArgs),

    /// List the samples stored in a database.
    ListDb(ListDbArgs),

    /// Cut clips at random offsets out of a long recording, with a manifest
    /// of where each one starts.
    ExtractClips(ExtractClipsArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Decode and search rate in Hz.
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Search window length in seconds.
    #[arg(long)]
    pub chunk_duration: Option<f64>,

    /// Overlap between consecutive windows in seconds.
    #[arg(long)]
    pub overlap: Option<f64>,
}

impl WindowArgs {
    pub fn apply(&self, cfg: &mut MatchConfig) {
        if let Some(sr) = self.sample_rate {
            cfg.sample_rate = sr;
        }
        if let Some(c) = self.chunk_duration {
            cfg.chunk_duration = c;
        }
        if let Some(o) = self.overlap {
            cfg.overlap = o;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FindArgs {
    /// Long recording to search in.
    #[arg(long)]
    pub long: PathBuf,

    /// Clip to look for.
    #[arg(long)]
    pub sample: PathBuf,

    /// sequential | threaded | device
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Sequential backend: stop once a chunk scores at least this.
    #[arg(long)]
    pub stop_confidence: Option<f64>,

    /// Threaded backend: worker count.
    #[arg(long)]
    pub workers: Option<usize>,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Print a JSON report instead of text.
    #[arg(long)]
    pub json: bool,
}

impl FindArgs {
    pub fn apply(&self, cfg: &mut MatchConfig) {
        self.window.apply(cfg);
        if let Some(b) = self.backend {
            cfg.backend = b;
        }
        if let Some(s) = self.stop_confidence {
            cfg.stop_confidence = s;
        }
        if let Some(w) = self.workers {
            cfg.workers = w;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Long recording to search in.
    #[arg(long)]
    pub long: PathBuf,

    /// Sample database; defaults to `sampleDbPath` from settings.
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[command(flatten)]
    pub window: WindowArgs,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BuildDbArgs {
    /// Directory of audio clips.
    #[arg(long)]
    pub samples: PathBuf,

    /// Database file to write.
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long)]
    pub sample_rate: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct ListDbArgs {
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractClipsArgs {
    /// Long recording to cut clips from.
    #[arg(long)]
    pub long: PathBuf,

    /// Directory the clips and `manifest.json` are written to.
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 50)]
    pub count: usize,

    /// Clip length in seconds.
    #[arg(long, default_value_t = 10.0)]
    pub length: f64,

    /// Seed for reproducible offsets; random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
}
