//! Persistent CLI settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use clipseek_core::{BackendKind, MatchConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub sample_rate: u32,
    pub chunk_duration: f64,
    pub overlap: f64,
    pub stop_confidence: f64,
    /// 0 means "one per available core".
    pub workers: usize,
    pub backend: String,
    pub ffmpeg_path: String,
    pub sample_db_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let core = MatchConfig::default();
        Self {
            sample_rate: core.sample_rate,
            chunk_duration: core.chunk_duration,
            overlap: core.overlap,
            stop_confidence: core.stop_confidence,
            workers: 0,
            backend: core.backend.as_str().into(),
            ffmpeg_path: "ffmpeg".into(),
            sample_db_path: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(1_000, 384_000);
        if !self.chunk_duration.is_finite() {
            self.chunk_duration = MatchConfig::default().chunk_duration;
        }
        self.chunk_duration = self.chunk_duration.clamp(1.0, 3_600.0);
        if !self.overlap.is_finite() {
            self.overlap = MatchConfig::default().overlap;
        }
        self.overlap = self.overlap.max(0.0);
        if !self.stop_confidence.is_finite() {
            self.stop_confidence = MatchConfig::default().stop_confidence;
        }
        self.workers = self.workers.min(256);
        self.backend = normalize_backend(&self.backend);
        let ffmpeg = self.ffmpeg_path.trim();
        self.ffmpeg_path = if ffmpeg.is_empty() {
            "ffmpeg".into()
        } else {
            ffmpeg.into()
        };
        self.sample_db_path = self
            .sample_db_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }

    /// Core search configuration. Overlap is not clamped against the chunk
    /// here so that an inconsistent file is reported by validation.
    pub fn to_match_config(&self) -> MatchConfig {
        let defaults = MatchConfig::default();
        MatchConfig {
            sample_rate: self.sample_rate,
            chunk_duration: self.chunk_duration,
            overlap: self.overlap,
            stop_confidence: self.stop_confidence,
            workers: if self.workers == 0 {
                defaults.workers
            } else {
                self.workers
            },
            backend: self.backend.parse().unwrap_or(defaults.backend),
        }
    }
}

pub fn normalize_backend(raw: &str) -> String {
    raw.parse::<BackendKind>()
        .unwrap_or(BackendKind::Sequential)
        .as_str()
        .into()
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clipseek")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("clipseek")
            .join("settings.json")
    }
}

/// Missing file means defaults; an unreadable or malformed one is logged
/// and also falls back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings file: {e}");
            AppSettings::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            warn!(path = %path.display(), "cannot read settings file: {e}");
            AppSettings::default()
        }
    };
    settings.normalize();
    settings
}
