//! Subcommand handlers. Results go to stdout; logs go to stderr.

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clipseek_core::{
    plan_clips, AudioSignal, BatchMatcher, BatchReport, ClipExtractor, Decoder, MatchConfig,
    MatchReport, SampleDatabase, SampleRecord, SearchController,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

use crate::cli_args::{BatchArgs, BuildDbArgs, ExtractClipsArgs, FindArgs, ListDbArgs};
use crate::settings::AppSettings;

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn decode_timed(
    decoder: &dyn Decoder,
    path: &Path,
    sample_rate: u32,
    what: &str,
) -> Result<AudioSignal> {
    let started = Instant::now();
    let signal = decoder
        .decode(path, sample_rate)
        .with_context(|| format!("loading {what} {}", path.display()))?;
    info!(
        path = %path.display(),
        minutes = signal.duration_secs() / 60.0,
        load_ms = started.elapsed().as_millis() as u64,
        "loaded {what}"
    );
    Ok(signal)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing report")?);
    Ok(())
}

pub fn run_find(mut cfg: MatchConfig, decoder: &dyn Decoder, args: &FindArgs) -> Result<()> {
    args.apply(&mut cfg);
    // Reject bad settings before paying for a decode.
    let mut controller = SearchController::new(cfg.clone()).context("invalid search settings")?;

    let long = decode_timed(decoder, &args.long, cfg.sample_rate, "long audio")?;
    let sample = decode_timed(decoder, &args.sample, cfg.sample_rate, "sample")?;
    let record = SampleRecord::new(file_label(&args.sample), sample);

    let outcome = controller
        .search(&long, &record)
        .context("searching for sample")?;
    let report = MatchReport::new(args.long.display().to_string(), record.name.clone(), &outcome);

    if args.json {
        return print_json(&report);
    }
    if report.found {
        println!(
            "Best match at: {:.2}s (confidence={:.2}%)",
            report.offset_seconds, report.confidence_percent
        );
    } else {
        println!(
            "No match: the recording is shorter than one search window \
             or the sample is longer than one."
        );
    }
    println!(
        "   Searched {}/{} chunks with the {} backend in {:.2}s{}",
        report.chunks_evaluated,
        report.chunks_planned,
        report.backend,
        report.search_seconds,
        if report.early_stopped { " (stopped early)" } else { "" }
    );
    Ok(())
}

pub fn run_batch(
    mut cfg: MatchConfig,
    settings: &AppSettings,
    decoder: &dyn Decoder,
    args: &BatchArgs,
) -> Result<()> {
    args.window.apply(&mut cfg);
    let matcher = BatchMatcher::open(cfg.clone()).context("invalid batch settings")?;

    let Some(db_path) = args.db.as_ref().or(settings.sample_db_path.as_ref()) else {
        bail!("no sample database given; pass --db or set sampleDbPath in settings");
    };
    let db = SampleDatabase::open(db_path)
        .with_context(|| format!("opening sample database {}", db_path.display()))?;
    let records = db.records().context("reading sample database")?;
    info!(samples = records.len(), db = %db_path.display(), "sample database loaded");

    let long = decode_timed(decoder, &args.long, cfg.sample_rate, "long audio")?;
    let batch = matcher
        .run(&long, &records)
        .context("batch matching failed")?;
    let report = BatchReport::new(args.long.display().to_string(), &batch);

    if args.json {
        return print_json(&report);
    }
    println!("=== MATCH SUMMARY ===");
    print!("{}", report.summary());
    println!(
        "{} samples in {:.2}s ({} uploads, {:.1} MiB)",
        report.matches.len(),
        report.total_seconds,
        report.uploads,
        report.bytes_uploaded as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

pub fn run_build_db(cfg: MatchConfig, decoder: &dyn Decoder, args: &BuildDbArgs) -> Result<()> {
    let sample_rate = args.sample_rate.unwrap_or(cfg.sample_rate);
    if sample_rate == 0 {
        bail!("sample rate must be positive");
    }
    let started = Instant::now();
    let (_db, written) =
        SampleDatabase::build_from_dir(&args.out, &args.samples, decoder, sample_rate)
            .with_context(|| {
                format!("building sample database from {}", args.samples.display())
            })?;
    println!(
        "Saved {written} samples to {} in {:.2}s",
        args.out.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

pub fn run_list_db(settings: &AppSettings, args: &ListDbArgs) -> Result<()> {
    let Some(db_path) = args.db.as_ref().or(settings.sample_db_path.as_ref()) else {
        bail!("no sample database given; pass --db or set sampleDbPath in settings");
    };
    let db = SampleDatabase::open(db_path)
        .with_context(|| format!("opening sample database {}", db_path.display()))?;
    let rows = db.list().context("listing samples")?;
    if args.json {
        return print_json(&rows);
    }
    for row in &rows {
        println!(
            "{:<20} {:>8.2}s  {:>6} Hz  {}",
            row.name,
            row.num_samples as f64 / f64::from(row.sample_rate.max(1)),
            row.sample_rate,
            row.created_at
        );
    }
    Ok(())
}

pub fn run_extract_clips(
    cfg: MatchConfig,
    decoder: &dyn Decoder,
    extractor: &ClipExtractor,
    args: &ExtractClipsArgs,
) -> Result<()> {
    let long = decode_timed(decoder, &args.long, cfg.sample_rate, "long audio")?;
    let extension = args
        .long
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let clips = plan_clips(
        &mut rng,
        long.duration_secs(),
        args.count,
        args.length,
        extension,
    )
    .context("planning clips")?;

    let manifest = extractor
        .extract_all(&args.long, &clips, args.seed, &args.out)
        .with_context(|| format!("extracting clips into {}", args.out.display()))?;
    for clip in &manifest.clips {
        println!("{:<16} {:>10.2}s", clip.name, clip.start_seconds);
    }
    println!(
        "Saved {} clips and {} to {}",
        manifest.clips.len(),
        clipseek_core::clips::MANIFEST_FILE,
        args.out.display()
    );
    Ok(())
}
