//! Decoder capability: file path in, mono peak-normalized signal out.
//!
//! `FfmpegDecoder` shells out to ffmpeg and reads raw little-endian f32 from
//! its stdout. `WavDecoder` reads WAV files natively via hound so tests and
//! ffmpeg-less hosts still work. `AutoDecoder` picks between them by extension.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::{resample::resample, AudioSignal};
use crate::error::{ClipseekError, Result};

/// Anything that can turn a file into a mono, peak-normalized signal at a
/// requested rate.
pub trait Decoder: Send + Sync {
    /// # Errors
    /// `ClipseekError::Decode` when the file cannot be decoded (the message
    /// carries the upstream diagnostic), `ClipseekError::EmptySignal` when
    /// decoding succeeds but yields no samples.
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioSignal>;
}

/// Decodes through an external `ffmpeg` process.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Decoder for FfmpegDecoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioSignal> {
        debug!(path = %path.display(), sample_rate, "decoding via ffmpeg");
        let output = Command::new(&self.program)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-ac", "1", "-ar"])
            .arg(sample_rate.to_string())
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "-"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ClipseekError::Decode {
                path: path.to_path_buf(),
                detail: format!("failed to launch {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            return Err(ClipseekError::Decode {
                path: path.to_path_buf(),
                detail: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let samples = parse_f32le(&output.stdout).ok_or_else(|| ClipseekError::Decode {
            path: path.to_path_buf(),
            detail: format!(
                "malformed PCM stream: {} bytes is not a whole number of f32 samples",
                output.stdout.len()
            ),
        })?;
        if samples.is_empty() {
            return Err(ClipseekError::EmptySignal {
                path: path.to_path_buf(),
            });
        }

        Ok(AudioSignal::normalized(samples, sample_rate))
    }
}

/// Parse raw little-endian f32 PCM. `None` when the byte count is not a
/// multiple of four.
pub fn parse_f32le(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Reads WAV files natively, down-mixing to mono and resampling when the
/// file rate differs from the requested one.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WavDecoder {
    fn read_mono(path: &Path) -> std::result::Result<(Vec<f32>, u32), String> {
        let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map_err(|e| e.to_string()))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample <= 16 {
                    reader
                        .samples::<i16>()
                        .map(|s| {
                            s.map(|v| (v as f32) / (i16::MAX as f32))
                                .map_err(|e| e.to_string())
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?
                } else {
                    let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|v| (v as f32) / max).map_err(|e| e.to_string()))
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            }
        };

        if channels == 1 {
            return Ok((interleaved, spec.sample_rate));
        }

        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().copied().sum::<f32>() / channels as f32)
            .collect();
        Ok((mono, spec.sample_rate))
    }
}

impl Decoder for WavDecoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioSignal> {
        let (mono, file_rate) = Self::read_mono(path).map_err(|detail| ClipseekError::Decode {
            path: path.to_path_buf(),
            detail,
        })?;
        if mono.is_empty() {
            return Err(ClipseekError::EmptySignal {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), file_rate, sample_rate, "decoded wav");
        let samples = resample(&mono, file_rate, sample_rate)?;
        Ok(AudioSignal::normalized(samples, sample_rate))
    }
}

/// Routes `.wav` files to [`WavDecoder`] and everything else to ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct AutoDecoder {
    ffmpeg: FfmpegDecoder,
    wav: WavDecoder,
}

impl AutoDecoder {
    pub fn new(ffmpeg: FfmpegDecoder) -> Self {
        Self {
            ffmpeg,
            wav: WavDecoder,
        }
    }
}

impl Decoder for AutoDecoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioSignal> {
        let is_wav = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            self.wav.decode(path, sample_rate)
        } else {
            self.ffmpeg.decode(path, sample_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("clipseek-decode-{}-{tag}", std::process::id()))
    }

    #[test]
    fn parse_rejects_partial_sample() {
        assert!(parse_f32le(&[0, 0, 128]).is_none());
    }

    #[test]
    fn parse_reads_little_endian() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.25f32).to_le_bytes());
        assert_eq!(parse_f32le(&bytes), Some(vec![0.5, -1.25]));
    }

    #[test]
    fn missing_ffmpeg_is_decode_failure() {
        let decoder = FfmpegDecoder::new("/nonexistent/clipseek-no-such-ffmpeg");
        let err = decoder
            .decode(Path::new("whatever.mp3"), 44_100)
            .unwrap_err();
        match err {
            ClipseekError::Decode { detail, .. } => assert!(detail.contains("failed to launch")),
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Executable shell script standing in for ffmpeg.
    #[cfg(unix)]
    fn fake_ffmpeg(tag: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = scratch_path(&format!("{tag}.sh"));
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_stderr() {
        let script = fake_ffmpeg(
            "fail",
            "echo 'clip.mp3: Invalid data found when processing input' >&2\nexit 1",
        );
        let err = FfmpegDecoder::new(&script)
            .decode(Path::new("clip.mp3"), 8_000)
            .unwrap_err();
        std::fs::remove_file(&script).ok();
        match err {
            ClipseekError::Decode { path, detail } => {
                assert_eq!(path, Path::new("clip.mp3"));
                assert!(detail.contains("Invalid data found"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn partial_sample_in_stream_is_decode_failure() {
        let script = fake_ffmpeg("partial", "printf 'abc'");
        let err = FfmpegDecoder::new(&script)
            .decode(Path::new("clip.mp3"), 8_000)
            .unwrap_err();
        std::fs::remove_file(&script).ok();
        match err {
            ClipseekError::Decode { detail, .. } => {
                assert!(detail.contains("3 bytes"), "{detail}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn empty_stream_is_empty_signal() {
        let script = fake_ffmpeg("empty", "exit 0");
        let err = FfmpegDecoder::new(&script)
            .decode(Path::new("clip.mp3"), 8_000)
            .unwrap_err();
        std::fs::remove_file(&script).ok();
        assert!(matches!(err, ClipseekError::EmptySignal { .. }), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn valid_stream_is_normalized() {
        // Two f32le samples: 0.5 and -0.25.
        let script = fake_ffmpeg("ok", r"printf '\000\000\000\077\000\000\200\276'");
        let sig = FfmpegDecoder::new(&script)
            .decode(Path::new("clip.mp3"), 8_000)
            .unwrap();
        std::fs::remove_file(&script).ok();
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.sample_rate(), 8_000);
        assert!((sig.samples()[0] - 1.0).abs() < 1e-6);
        assert!((sig.samples()[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn wav_stereo_is_downmixed_and_normalized() {
        let path = scratch_path("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..800 {
            let v = if i % 2 == 0 { 8_000i16 } else { -4_000i16 };
            writer.write_sample(v).unwrap();
            writer.write_sample(v / 2).unwrap();
        }
        writer.finalize().unwrap();

        let sig = WavDecoder.decode(&path, 8_000).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(sig.len(), 800);
        assert_eq!(sig.sample_rate(), 8_000);
        assert!((sig.peak() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn wav_is_resampled_to_requested_rate() {
        let path = scratch_path("rate.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..16_000 {
            writer.write_sample(((i as f32) * 0.05).sin() * 0.3).unwrap();
        }
        writer.finalize().unwrap();

        let sig = WavDecoder.decode(&path, 8_000).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(sig.sample_rate(), 8_000);
        assert_eq!(sig.len(), 8_000);
    }

    #[test]
    fn unreadable_wav_is_decode_failure() {
        let path = scratch_path("garbage.wav");
        std::fs::write(&path, b"definitely not riff").unwrap();
        let err = AutoDecoder::default().decode(&path, 8_000).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, ClipseekError::Decode { .. }));
    }
}
