//! Persisted sample database (SQLite).
//!
//! One row per sample: name, rate, length, precomputed norm and the raw
//! samples as little-endian f32 bytes. Storing the bytes verbatim means a
//! record read back is bit-identical to the one written. Rows are returned
//! in name order, which is the order a batch visits them.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::{
    audio::{decode::Decoder, AudioSignal, SampleRecord},
    error::{ClipseekError, Result},
};

const SCHEMA_VERSION: i64 = 1;

/// Extensions `build_from_dir` treats as audio.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "aac", "ogg", "opus", "mp4"];

fn db_err(e: rusqlite::Error) -> ClipseekError {
    ClipseekError::Database(e.to_string())
}

/// Summary row without the sample payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleInfo {
    pub name: String,
    pub sample_rate: u32,
    pub num_samples: usize,
    pub norm: f64,
    pub created_at: String,
}

pub struct SampleDatabase {
    conn: Connection,
    path: PathBuf,
}

impl SampleDatabase {
    /// Create (or open for writing) a database at `path`, creating parent
    /// directories and the schema as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path).map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
              key TEXT PRIMARY KEY,
              value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS samples (
              name TEXT PRIMARY KEY,
              sample_rate INTEGER NOT NULL,
              num_samples INTEGER NOT NULL,
              norm REAL NOT NULL,
              samples BLOB NOT NULL,
              created_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(db_err)?;

        let db = Self { conn, path };
        db.check_schema()?;
        Ok(db)
    }

    /// Open an existing database read-only.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(ClipseekError::Database(format!(
                "no sample database at {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_err)?;
        let db = Self { conn, path };
        db.check_schema()?;
        Ok(db)
    }

    fn check_schema(&self) -> Result<()> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match version {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(ClipseekError::Database(format!(
                "unsupported schema version {other} in {}",
                self.path.display()
            ))),
            None => Err(ClipseekError::Database(format!(
                "{} is not a sample database",
                self.path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record with this name.
    pub fn insert(&self, record: &SampleRecord) -> Result<()> {
        let blob: Vec<u8> = record
            .signal
            .samples()
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO samples
                (name, sample_rate, num_samples, norm, samples, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    record.name,
                    i64::from(record.signal.sample_rate()),
                    record.len() as i64,
                    record.norm,
                    blob,
                    Utc::now().timestamp()
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every record, ordered by name.
    pub fn records(&self) -> Result<Vec<SampleRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, sample_rate, num_samples, norm, samples FROM samples ORDER BY name",
            )
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let name: String = row.get(0).map_err(db_err)?;
            let sample_rate: i64 = row.get(1).map_err(db_err)?;
            let num_samples: i64 = row.get(2).map_err(db_err)?;
            let norm: f64 = row.get(3).map_err(db_err)?;
            let blob: Vec<u8> = row.get(4).map_err(db_err)?;

            let num_samples = checked_count(&name, num_samples)?;
            if blob.len() % 4 != 0 || blob.len() / 4 != num_samples {
                return Err(ClipseekError::Database(format!(
                    "sample {name}: payload of {} bytes does not hold {num_samples} samples",
                    blob.len()
                )));
            }
            let samples: Vec<f32> = blob
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            let sample_rate = checked_rate(&name, sample_rate)?;
            out.push(SampleRecord::from_parts(
                name,
                AudioSignal::new(samples, sample_rate),
                norm,
            ));
        }
        Ok(out)
    }

    /// Names, sizes and timestamps without loading payloads.
    pub fn list(&self) -> Result<Vec<SampleInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, sample_rate, num_samples, norm, created_at \
                 FROM samples ORDER BY name",
            )
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let name: String = row.get(0).map_err(db_err)?;
            let sample_rate: i64 = row.get(1).map_err(db_err)?;
            let num_samples: i64 = row.get(2).map_err(db_err)?;
            let norm: f64 = row.get(3).map_err(db_err)?;
            let created_at: i64 = row.get(4).map_err(db_err)?;
            out.push(SampleInfo {
                sample_rate: checked_rate(&name, sample_rate)?,
                num_samples: checked_count(&name, num_samples)?,
                norm,
                created_at: Utc
                    .timestamp_opt(created_at, 0)
                    .single()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                name,
            });
        }
        Ok(out)
    }

    /// Decode every audio file in `dir` (name order) into a new database at
    /// `path`. Returns the database and the number of records written.
    ///
    /// # Errors
    /// The first decode failure aborts the build.
    pub fn build_from_dir(
        path: impl Into<PathBuf>,
        dir: &Path,
        decoder: &dyn Decoder,
        sample_rate: u32,
    ) -> Result<(Self, usize)> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_audio_file(p))
            .collect();
        files.sort();
        if files.is_empty() {
            warn!(dir = %dir.display(), "no audio files found");
        }

        let db = Self::create(path)?;
        for (i, file) in files.iter().enumerate() {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let started = std::time::Instant::now();
            let signal = decoder.decode(file, sample_rate)?;
            let record = SampleRecord::new(name, signal);
            db.insert(&record)?;
            info!(
                index = i + 1,
                sample = %record.name,
                seconds = record.signal.duration_secs(),
                load_ms = started.elapsed().as_millis() as u64,
                "sample stored"
            );
        }
        Ok((db, files.len()))
    }
}

fn checked_rate(name: &str, raw: i64) -> Result<u32> {
    u32::try_from(raw)
        .ok()
        .filter(|&sr| sr > 0)
        .ok_or_else(|| ClipseekError::Database(format!("sample {name}: bad sample rate {raw}")))
}

fn checked_count(name: &str, raw: i64) -> Result<usize> {
    usize::try_from(raw)
        .map_err(|_| ClipseekError::Database(format!("sample {name}: bad sample count {raw}")))
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

impl std::fmt::Debug for SampleDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
