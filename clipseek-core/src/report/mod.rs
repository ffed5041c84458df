//! Serializable reports for the command-line host.
//!
//! JSON field names are camelCase; durations are reported as fractional
//! seconds so the output is easy to consume from scripts.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    correlation::BackendKind,
    engine::{batch::BatchResult, SearchOutcome},
};

/// One sample located (or not) in one long recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub long_path: String,
    pub sample_name: String,
    pub found: bool,
    pub score: f64,
    pub offset_seconds: f64,
    pub confidence_percent: f64,
    pub backend: BackendKind,
    pub chunks_planned: usize,
    pub chunks_evaluated: usize,
    pub early_stopped: bool,
    pub search_seconds: f64,
}

impl MatchReport {
    pub fn new(
        long_path: impl Into<String>,
        sample_name: impl Into<String>,
        outcome: &SearchOutcome,
    ) -> Self {
        let SearchOutcome { result, stats } = outcome;
        Self {
            long_path: long_path.into(),
            sample_name: sample_name.into(),
            found: result.is_found(),
            score: result.score,
            offset_seconds: result.offset_seconds,
            confidence_percent: result.confidence_percent,
            backend: stats.backend,
            chunks_planned: stats.chunks_planned,
            chunks_evaluated: stats.chunks_evaluated,
            early_stopped: stats.early_stopped,
            search_seconds: secs(stats.elapsed),
        }
    }

    /// Single-line human summary.
    pub fn summary_line(&self) -> String {
        summary_line(&self.sample_name, self.found, self.offset_seconds, self.confidence_percent)
    }
}

/// Every sample of a database against one long recording, sorted by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub long_path: String,
    pub matches: Vec<MatchReport>,
    pub total_seconds: f64,
    pub uploads: u64,
    pub bytes_uploaded: u64,
}

impl BatchReport {
    pub fn new(long_path: impl Into<String>, batch: &BatchResult) -> Self {
        let long_path = long_path.into();
        let matches = batch
            .entries
            .iter()
            .map(|e| {
                MatchReport::new(
                    long_path.clone(),
                    e.sample_name.clone(),
                    &SearchOutcome {
                        result: e.result,
                        stats: e.stats,
                    },
                )
            })
            .collect();
        Self {
            long_path,
            matches,
            total_seconds: secs(batch.elapsed),
            uploads: batch.uploads,
            bytes_uploaded: batch.bytes_uploaded,
        }
    }

    /// Fixed-width table, one sample per line.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for m in &self.matches {
            let _ = writeln!(out, "{}", m.summary_line());
        }
        out
    }
}

fn summary_line(name: &str, found: bool, offset: f64, confidence: f64) -> String {
    if found {
        format!("{name:<20} → {offset:8.2}s  ({confidence:6.2}%)")
    } else {
        format!("{name:<20} → {:>9}  ({:>6} )", "no match", "-")
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{batch::BatchEntry, MatchResult, SearchStats};

    fn stats(backend: BackendKind) -> SearchStats {
        SearchStats {
            backend,
            chunks_planned: 4,
            chunks_evaluated: 4,
            early_stopped: false,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn match_report_serializes_with_camel_case() {
        let outcome = SearchOutcome {
            result: MatchResult::new(0.9731, 42.25),
            stats: stats(BackendKind::Threaded),
        };
        let report = MatchReport::new("long.mp3", "clip.mp3", &outcome);

        let json = serde_json::to_value(&report).expect("serialize match report");
        assert_eq!(json["longPath"], "long.mp3");
        assert_eq!(json["sampleName"], "clip.mp3");
        assert_eq!(json["found"], true);
        assert_eq!(json["backend"], "threaded");
        assert_eq!(json["chunksEvaluated"], 4);
        let secs = json["searchSeconds"].as_f64().expect("seconds as number");
        assert!((secs - 1.5).abs() < 1e-9);

        let round_trip: MatchReport =
            serde_json::from_value(json).expect("deserialize match report");
        assert_eq!(round_trip, report);
    }

    #[test]
    fn summary_line_is_fixed_width() {
        let outcome = SearchOutcome {
            result: MatchResult::new(0.5, 3.0),
            stats: stats(BackendKind::Sequential),
        };
        let line = MatchReport::new("l", "a.mp3", &outcome).summary_line();
        assert_eq!(line, "a.mp3                →     3.00s  ( 50.00%)");
    }

    #[test]
    fn missing_match_is_marked() {
        let outcome = SearchOutcome {
            result: MatchResult::not_found(),
            stats: stats(BackendKind::Sequential),
        };
        let report = MatchReport::new("l", "short", &outcome);
        assert!(!report.found);
        assert!(report.summary_line().contains("no match"));
    }

    #[test]
    fn batch_report_keeps_entry_order() {
        let batch = BatchResult {
            entries: ["a", "b"]
                .iter()
                .enumerate()
                .map(|(i, name)| BatchEntry {
                    sample_name: (*name).into(),
                    result: MatchResult::new(0.9, i as f64),
                    stats: stats(BackendKind::Device),
                })
                .collect(),
            elapsed: Duration::from_secs(2),
            uploads: 3,
            bytes_uploaded: 1024,
        };
        let report = BatchReport::new("long.wav", &batch);
        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.matches[0].sample_name, "a");
        assert_eq!(report.matches[1].long_path, "long.wav");
        assert_eq!(report.summary().lines().count(), 2);
    }
}
