//! Repository candidates for timeline gaps.
//!
//! The pool is built once per set: repository rows sharing a normalized
//! (artist, title) are merged, and tracks already identified in the set are
//! dropped. Each gap is then ranked against the pool with the additive scorer.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::{FeaturedIn, RepositoryTrack, SetAnalysisInput, Suggestion};
use crate::normalize::normalize;
use crate::scoring::{artist_tier, score_suggestion, CandidateSignals, SuggestionWeights};

/// Duration-fit rules for keeping a candidate before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationFit {
    /// Keep when |candidate - gap| is within this
    pub tolerance_secs: f64,
    /// Keep when the candidate fits inside the gap with this much slack
    pub slack_secs: f64,
    /// Gaps at least this long accept any candidate
    pub relaxed_gap_secs: f64,
}

impl Default for DurationFit {
    fn default() -> Self {
        Self {
            tolerance_secs: 60.0,
            slack_secs: 30.0,
            relaxed_gap_secs: 600.0,
        }
    }
}

impl DurationFit {
    pub fn accepts(&self, candidate_secs: Option<f64>, gap_secs: f64) -> bool {
        if gap_secs >= self.relaxed_gap_secs {
            return true;
        }
        match candidate_secs {
            Some(d) => (d - gap_secs).abs() <= self.tolerance_secs || d <= gap_secs + self.slack_secs,
            None => false,
        }
    }
}

/// Repository track after merging duplicates.
#[derive(Debug, Clone)]
struct PooledTrack<'a> {
    track: &'a RepositoryTrack,
    artist_norm: String,
    /// Every play of this track, keyed by (set id, timestamp bits) so merged
    /// duplicate rows listing the same play count it once
    appearances: FxHashSet<(&'a str, Option<u64>)>,
}

impl PooledTrack<'_> {
    fn appearances_outside(&self, set_id: &str) -> usize {
        self.appearances.iter().filter(|(id, _)| *id != set_id).count()
    }
}

fn appearance_key(f: &FeaturedIn) -> (&str, Option<u64>) {
    (f.set_id.as_str(), f.timestamp.map(f64::to_bits))
}

/// Ranks repository tracks for the gaps of one set.
pub struct SuggestionRanker<'a> {
    set_id: &'a str,
    set_artist_norm: String,
    pool: Vec<PooledTrack<'a>>,
    weights: &'a SuggestionWeights,
    fit: &'a DurationFit,
}

impl<'a> SuggestionRanker<'a> {
    pub fn new(input: &'a SetAnalysisInput, weights: &'a SuggestionWeights, fit: &'a DurationFit) -> Self {
        let known_ids: FxHashSet<&str> = input.tracks.iter().map(|t| t.id.as_str()).collect();
        let known_keys: FxHashSet<(String, String)> = input
            .tracks
            .iter()
            .map(|t| (normalize(&t.artist), normalize(&t.title)))
            .collect();

        let mut pool: Vec<PooledTrack<'a>> = Vec::new();
        let mut index: FxHashMap<(String, String), usize> = FxHashMap::default();

        for track in &input.repository_tracks {
            if known_ids.contains(track.id.as_str()) {
                continue;
            }
            let key = (normalize(&track.artist), normalize(&track.title));
            if key.1.is_empty() || known_keys.contains(&key) {
                continue;
            }
            let appearances = track.featured_in.iter().map(appearance_key);
            match index.get(&key) {
                Some(&i) => pool[i].appearances.extend(appearances),
                None => {
                    index.insert(key.clone(), pool.len());
                    pool.push(PooledTrack {
                        track,
                        artist_norm: key.0,
                        appearances: appearances.collect(),
                    });
                }
            }
        }

        Self {
            set_id: input.set_id.as_str(),
            set_artist_norm: normalize(&input.set_artist),
            pool,
            weights,
            fit,
        }
    }

    /// Number of distinct candidates after merging and exclusion.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Top candidates for a gap of the given duration, best first.
    pub fn rank(&self, gap_secs: f64) -> Vec<Suggestion> {
        let mut ranked: Vec<Suggestion> = self
            .pool
            .iter()
            .filter(|p| self.fit.accepts(p.track.duration_seconds, gap_secs))
            .filter_map(|p| {
                let cross_set = p.appearances_outside(self.set_id);
                let signals = CandidateSignals {
                    same_artist: artist_tier(&self.set_artist_norm, &p.artist_norm).is_match(),
                    cross_set_appearances: cross_set,
                    duration_diff: p.track.duration_seconds.map(|d| (d - gap_secs).abs()),
                };
                score_suggestion(&signals, self.weights).map(|scored| Suggestion {
                    track_id: p.track.id.clone(),
                    title: p.track.title.clone(),
                    artist: p.track.artist.clone(),
                    duration_seconds: p.track.duration_seconds,
                    match_reason_codes: scored.reasons,
                    confidence_score: scored.score,
                    featured_in_count: p.appearances.len(),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.confidence_score
                .cmp(&a.confidence_score)
                .then_with(|| b.featured_in_count.cmp(&a.featured_in_count))
                .then_with(|| a.track_id.cmp(&b.track_id))
        });
        ranked.truncate(self.weights.max_suggestions);
        ranked
    }
}
