//! Core data models for gap analysis and catalog reconciliation.
//!
//! Everything that crosses a JSON boundary uses camelCase field names so the
//! analysis input/output matches what the identification pipeline produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::normalize::parse_cue_to_seconds;

// ============================================================================
// Timeline Input
// ============================================================================

/// One identified track anchored at a point in a set's timeline.
///
/// Produced upstream (fingerprinting or scraped comments). Gap analysis only
/// reads it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Seconds from the start of the set. Accepts a number or a cue string
    /// such as `"1:02:30"`; anything unparseable is treated as unknown.
    #[serde(
        default,
        alias = "timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub start_timestamp_seconds: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Seconds(f64),
    Cue(String),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawTimestamp> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawTimestamp::Seconds(s)) if s.is_finite() && s >= 0.0 => Some(s),
        Some(RawTimestamp::Cue(cue)) => parse_cue_to_seconds(&cue).map(|s| s as f64),
        _ => None,
    })
}

/// A previously-seen track with its cross-set appearance history.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub featured_in: Vec<FeaturedIn>,
}

/// One appearance of a repository track in some set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedIn {
    pub set_id: String,
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Request for a single set analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAnalysisInput {
    pub set_id: String,
    #[serde(default)]
    pub set_artist: String,
    pub total_duration: f64,
    #[serde(default)]
    pub tracks: Vec<TrackEvent>,
    #[serde(default)]
    pub repository_tracks: Vec<RepositoryTrack>,
}

// ============================================================================
// Gap Analysis Output
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapConfidence {
    High,
    Medium,
    Low,
}

/// Neighbouring track reference carried on a gap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapNeighbor {
    pub id: String,
    pub title: String,
    pub artist: String,
}

impl From<&TrackEvent> for GapNeighbor {
    fn from(event: &TrackEvent) -> Self {
        Self {
            id: event.id.clone(),
            title: event.title.clone(),
            artist: event.artist.clone(),
        }
    }
}

/// A time span with no confidently identified track.
///
/// Invariant: `0 <= start_time < end_time <= total set duration`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub previous_track: Option<GapNeighbor>,
    pub next_track: Option<GapNeighbor>,
    pub estimated_track_count: u32,
    pub suggestions: Vec<Suggestion>,
    pub confidence: GapConfidence,
}

/// Ranked repository candidate for a gap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<f64>,
    pub match_reason_codes: Vec<String>,
    pub confidence_score: u32,
    pub featured_in_count: usize,
}

/// Result of one set analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAnalysis {
    pub set_id: String,
    pub gaps: Vec<Gap>,
    /// Percentage of the set covered by identified tracks (0-100)
    pub coverage: u32,
    pub estimated_missing_tracks: u32,
    /// Overall confidence in the reconstructed timeline (0-100)
    pub confidence: u32,
}

// ============================================================================
// Reconciliation Records
// ============================================================================

/// A track believed not to exist in any public catalog yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreleasedTrackRecord {
    pub id: String,
    pub artist_name: String,
    pub track_title: String,
    pub is_unreleased: bool,
    pub is_id: bool,
    pub external_catalog_data: Option<Value>,
}

/// Memoized catalog query outcome keyed by normalized `artist|||title`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogLookupCacheEntry {
    pub lookup_key: String,
    pub found: bool,
    pub catalog_data: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Running counters for one reconciliation run, reported to the operator.
#[derive(Default, Debug, Clone, Serialize)]
pub struct ReconcileStats {
    pub checked: usize,

    // Confirmations by source
    pub confirmed_by_id: usize,
    pub confirmed_by_cache: usize,
    pub confirmed_by_query: usize,
    pub confirmed_exact: usize,
    pub confirmed_strong: usize,

    pub still_unreleased: usize,

    // Skips
    pub skipped_dj_edit: usize,
    pub skipped_placeholder: usize,
    pub skipped_cached_not_found: usize,

    // Failures (never fatal)
    pub lookup_errors: usize,
    pub failed_writes: usize,

    pub catalog_queries: usize,
    pub halted_on_rate_limit: bool,
    pub dry_run: bool,

    pub elapsed_seconds: f64,
}

impl ReconcileStats {
    pub fn confirmed(&self) -> usize {
        self.confirmed_by_id + self.confirmed_by_cache + self.confirmed_by_query
    }

    pub fn skipped(&self) -> usize {
        self.skipped_dj_edit + self.skipped_placeholder + self.skipped_cached_not_found
    }

    /// Confirmation rate as a percentage of checked records
    pub fn confirmation_rate(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            100.0 * self.confirmed() as f64 / self.checked as f64
        }
    }

    /// Human-readable run summary for the operator.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("{:=<60}", ""));
        lines.push(if self.dry_run {
            "RECONCILIATION COMPLETE (dry run, nothing written)".to_string()
        } else {
            "RECONCILIATION COMPLETE".to_string()
        });
        lines.push(format!("  Checked:              {}", self.checked));
        lines.push(format!(
            "  Confirmed:            {} ({:.1}%)",
            self.confirmed(),
            self.confirmation_rate()
        ));
        lines.push(format!("    by stored id:       {}", self.confirmed_by_id));
        lines.push(format!("    by cache:           {}", self.confirmed_by_cache));
        lines.push(format!("    by fresh query:     {}", self.confirmed_by_query));
        lines.push(format!(
            "    exact / strong:     {} / {}",
            self.confirmed_exact, self.confirmed_strong
        ));
        lines.push(format!("  Still unreleased:     {}", self.still_unreleased));
        lines.push(format!("  Skipped:              {}", self.skipped()));
        lines.push(format!("    DJ edits:           {}", self.skipped_dj_edit));
        lines.push(format!("    placeholders:       {}", self.skipped_placeholder));
        lines.push(format!(
            "    cached not-found:   {}",
            self.skipped_cached_not_found
        ));
        lines.push(format!("  Catalog queries:      {}", self.catalog_queries));
        lines.push(format!("  Lookup errors:        {}", self.lookup_errors));
        lines.push(format!("  Failed writes:        {}", self.failed_writes));
        if self.halted_on_rate_limit {
            lines.push("  HALTED: provider rate limit reached, rerun to resume".to_string());
        }
        lines.push(format!("  Elapsed:              {:.1}s", self.elapsed_seconds));
        lines.push(format!("{:=<60}", ""));
        lines.join("\n")
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_event_accepts_cue_and_numeric_timestamps() {
        let json = r#"[
            {"id": "a", "title": "One", "artist": "X", "startTimestampSeconds": 95.5},
            {"id": "b", "title": "Two", "artist": "Y", "timestamp": "1:02:03"},
            {"id": "c", "title": "Three", "artist": "Z", "timestamp": "soon"},
            {"id": "d", "title": "Four", "artist": "W"}
        ]"#;
        let events: Vec<TrackEvent> = serde_json::from_str(json).unwrap();
        assert_eq!(events[0].start_timestamp_seconds, Some(95.5));
        assert_eq!(events[1].start_timestamp_seconds, Some(3723.0));
        assert_eq!(events[2].start_timestamp_seconds, None);
        assert_eq!(events[3].start_timestamp_seconds, None);
        assert!(!events[3].verified);
    }

    #[test]
    fn test_track_event_oversized_cue_is_unknown() {
        let json = r#"[{"id": "a", "timestamp": "9999999:00:00"}, {"id": "b", "timestamp": "2:00"}]"#;
        let events: Vec<TrackEvent> = serde_json::from_str(json).unwrap();
        assert_eq!(events[0].start_timestamp_seconds, None);
        assert_eq!(events[1].start_timestamp_seconds, Some(120.0));
    }

    #[test]
    fn test_gap_confidence_serializes_lowercase() {
        let json = serde_json::to_string(&GapConfidence::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }

    #[test]
    fn test_stats_totals_and_summary() {
        let stats = ReconcileStats {
            checked: 10,
            confirmed_by_id: 1,
            confirmed_by_cache: 2,
            confirmed_by_query: 2,
            skipped_dj_edit: 1,
            skipped_cached_not_found: 3,
            halted_on_rate_limit: true,
            ..Default::default()
        };
        assert_eq!(stats.confirmed(), 5);
        assert_eq!(stats.skipped(), 4);
        assert!((stats.confirmation_rate() - 50.0).abs() < f64::EPSILON);
        let summary = stats.summary();
        assert!(summary.contains("HALTED"));
        assert!(summary.contains("by cache:           2"));
    }
}
