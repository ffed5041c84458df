//! Test-clip extraction: cut fixed-length clips at random offsets out of a
//! long recording and record where each one came from.
//!
//! Clips are cut with ffmpeg stream copy (`-acodec copy`), so they keep the
//! source container and codec. Start offsets are whole seconds; the written
//! [`ClipManifest`] is the ground truth a later `find`/`batch` run can be
//! checked against.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClipseekError, Result};

/// File name the manifest is written under inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipSpec {
    pub name: String,
    pub start_seconds: f64,
    pub length_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipManifest {
    pub long_path: String,
    pub seed: Option<u64>,
    pub clips: Vec<ClipSpec>,
}

impl ClipManifest {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(anyhow::Error::from)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&text).map_err(anyhow::Error::from)?;
        Ok(manifest)
    }
}

/// Pick `count` clips of `length_secs` inside a recording of `duration_secs`.
/// Starts are whole seconds drawn uniformly from `0..=floor(duration - length)`
/// and may repeat. Names are `clip_01.<extension>`, `clip_02.<extension>`, ...
///
/// # Errors
/// `ClipseekError::Config` for a non-positive length or a recording shorter
/// than one clip.
pub fn plan_clips<R: Rng + ?Sized>(
    rng: &mut R,
    duration_secs: f64,
    count: usize,
    length_secs: f64,
    extension: &str,
) -> Result<Vec<ClipSpec>> {
    if !(length_secs.is_finite() && length_secs > 0.0) {
        return Err(ClipseekError::Config(format!(
            "clip length must be positive, got {length_secs}"
        )));
    }
    let room = duration_secs - length_secs;
    if !(room.is_finite() && room >= 0.0) {
        return Err(ClipseekError::Config(format!(
            "recording of {duration_secs:.2}s is shorter than a {length_secs}s clip"
        )));
    }
    let max_start = room.floor() as u64;

    Ok((1..=count)
        .map(|i| ClipSpec {
            name: format!("clip_{i:02}.{extension}"),
            start_seconds: rng.gen_range(0..=max_start) as f64,
            length_seconds: length_secs,
        })
        .collect())
}

/// Cuts clips through an external `ffmpeg` process.
#[derive(Debug, Clone)]
pub struct ClipExtractor {
    program: PathBuf,
}

impl ClipExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Write `clip` cut from `long` into `out_dir`, overwriting any file of
    /// the same name. Returns the written path.
    ///
    /// # Errors
    /// `ClipseekError::Extract` when ffmpeg cannot be launched, fails, or
    /// produces no file.
    pub fn extract(&self, long: &Path, clip: &ClipSpec, out_dir: &Path) -> Result<PathBuf> {
        let out = out_dir.join(&clip.name);
        debug!(clip = %clip.name, start = clip.start_seconds, "cutting clip");
        let output = Command::new(&self.program)
            .args(["-y", "-v", "error", "-ss"])
            .arg(clip.start_seconds.to_string())
            .arg("-i")
            .arg(long)
            .arg("-t")
            .arg(clip.length_seconds.to_string())
            .args(["-acodec", "copy"])
            .arg(&out)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ClipseekError::Extract {
                path: out.clone(),
                detail: format!("failed to launch {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            return Err(ClipseekError::Extract {
                path: out,
                detail: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        if !out.is_file() {
            return Err(ClipseekError::Extract {
                path: out,
                detail: "ffmpeg reported success but wrote no file".into(),
            });
        }
        Ok(out)
    }

    /// Cut every clip into `out_dir` (created if missing) and write the
    /// manifest beside them. Stops at the first failure.
    pub fn extract_all(
        &self,
        long: &Path,
        clips: &[ClipSpec],
        seed: Option<u64>,
        out_dir: &Path,
    ) -> Result<ClipManifest> {
        std::fs::create_dir_all(out_dir)?;
        for (i, clip) in clips.iter().enumerate() {
            let path = self.extract(long, clip, out_dir)?;
            info!(
                index = i + 1,
                start = clip.start_seconds,
                path = %path.display(),
                "clip written"
            );
        }
        let manifest = ClipManifest {
            long_path: long.display().to_string(),
            seed,
            clips: clips.to_vec(),
        };
        manifest.write(&out_dir.join(MANIFEST_FILE))?;
        Ok(manifest)
    }
}
