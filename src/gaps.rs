//! Gap detection over a set's identified-track timeline.
//!
//! A single forward walk over timestamped tracks emits intro, between-track
//! and outro gaps. Gaps come out ordered by start time and never overlap:
//! each one starts at the furthest point covered so far.

use rayon::prelude::*;

use crate::models::{Gap, GapConfidence, GapNeighbor, SetAnalysis, SetAnalysisInput, TrackEvent};
use crate::scoring::SuggestionWeights;
use crate::suggest::{DurationFit, SuggestionRanker};

/// Timeline thresholds, all in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct GapConfig {
    /// First track must start later than this for an intro gap
    pub intro_threshold: f64,
    /// Set must run this much past the last track for an outro gap
    pub outro_threshold: f64,
    /// Between-track gaps must be longer than this
    pub min_gap: f64,
    pub default_track_duration: f64,
    pub average_track_duration: f64,
    /// Gaps shorter than this hold no whole track
    pub countable_gap: f64,
    /// Gaps shorter than this hold at most one track
    pub single_track_gap: f64,
    /// Long gap without suggestions is low confidence
    pub long_gap: f64,
    /// Duration window for a high-confidence gap between known tracks
    pub well_bounded_min: f64,
    pub well_bounded_max: f64,
    /// Gap count at which the overall-confidence gap penalty saturates
    pub gap_penalty_cap: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            intro_threshold: 120.0,
            outro_threshold: 120.0,
            min_gap: 90.0,
            default_track_duration: 240.0,
            average_track_duration: 300.0,
            countable_gap: 120.0,
            single_track_gap: 240.0,
            long_gap: 600.0,
            well_bounded_min: 180.0,
            well_bounded_max: 480.0,
            gap_penalty_cap: 10,
        }
    }
}

/// Gap before confidence and suggestions are attached.
#[derive(Debug, Clone)]
pub struct GapSpan<'a> {
    pub start: f64,
    pub end: f64,
    pub previous: Option<&'a TrackEvent>,
    pub next: Option<&'a TrackEvent>,
}

impl GapSpan<'_> {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn effective_duration(event: &TrackEvent, config: &GapConfig) -> f64 {
    event
        .duration_seconds
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(config.default_track_duration)
}

fn total_duration(input: &SetAnalysisInput) -> f64 {
    if input.total_duration.is_finite() && input.total_duration > 0.0 {
        input.total_duration
    } else {
        0.0
    }
}

/// Tracks with a known timestamp, ascending. Ties keep input order.
pub fn timed_events(tracks: &[TrackEvent]) -> Vec<&TrackEvent> {
    let mut timed: Vec<&TrackEvent> = tracks
        .iter()
        .filter(|t| t.start_timestamp_seconds.is_some())
        .collect();
    timed.sort_by(|a, b| {
        let ta = a.start_timestamp_seconds.unwrap_or_default();
        let tb = b.start_timestamp_seconds.unwrap_or_default();
        ta.total_cmp(&tb)
    });
    timed
}

/// Uncovered spans of the timeline, ordered and non-overlapping.
///
/// With no timestamped tracks the whole set is one span.
pub fn detect_gaps<'a>(input: &'a SetAnalysisInput, config: &GapConfig) -> Vec<GapSpan<'a>> {
    let total = total_duration(input);
    if total <= 0.0 {
        return Vec::new();
    }

    let timed = timed_events(&input.tracks);
    let Some(first) = timed.first() else {
        return vec![GapSpan {
            start: 0.0,
            end: total,
            previous: None,
            next: None,
        }];
    };

    let mut spans: Vec<GapSpan<'a>> = Vec::new();
    let mut push = |start: f64,
                    end: f64,
                    previous: Option<&'a TrackEvent>,
                    next: Option<&'a TrackEvent>,
                    min_len: f64| {
        let end = end.min(total);
        if end - start > min_len && start < end {
            spans.push(GapSpan {
                start,
                end,
                previous,
                next,
            });
        }
    };

    let first_start = first.start_timestamp_seconds.unwrap_or_default();
    push(0.0, first_start, None, Some(*first), config.intro_threshold);

    let mut covered_until = first_start + effective_duration(first, config);
    for pair in timed.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let next_start = next.start_timestamp_seconds.unwrap_or_default();
        if next_start > covered_until {
            push(covered_until, next_start, Some(prev), Some(next), config.min_gap);
        }
        covered_until = covered_until.max(next_start + effective_duration(next, config));
    }

    if let Some(last) = timed.last() {
        if covered_until < total {
            push(covered_until, total, Some(*last), None, config.outro_threshold);
        }
    }

    spans
}

/// Whole tracks that plausibly fit in a gap.
pub fn estimate_track_count(duration: f64, config: &GapConfig) -> u32 {
    if duration < config.countable_gap {
        0
    } else if duration < config.single_track_gap {
        1
    } else {
        ((duration / config.average_track_duration).round() as u32).max(1)
    }
}

/// Confidence that a gap really holds unidentified material worth filling.
pub fn classify_gap(
    duration: f64,
    has_previous: bool,
    has_next: bool,
    suggestion_count: usize,
    config: &GapConfig,
) -> GapConfidence {
    if duration > config.long_gap && suggestion_count == 0 {
        GapConfidence::Low
    } else if duration >= config.well_bounded_min
        && duration <= config.well_bounded_max
        && has_previous
        && has_next
    {
        GapConfidence::High
    } else if suggestion_count >= 1 {
        GapConfidence::Medium
    } else {
        GapConfidence::Low
    }
}

/// Share of the set covered by timestamped tracks, 0-100.
pub fn coverage_percent(input: &SetAnalysisInput, config: &GapConfig) -> u32 {
    let total = total_duration(input);
    if total <= 0.0 {
        return 0;
    }
    let covered: f64 = timed_events(&input.tracks)
        .iter()
        .map(|t| effective_duration(t, config))
        .sum();
    ((covered / total * 100.0).round() as u32).min(100)
}

/// Blend of coverage (40%), verified share (40%) and a gap-count penalty (20%), 0-100.
pub fn overall_confidence(coverage: u32, tracks: &[TrackEvent], gap_count: usize, config: &GapConfig) -> u32 {
    let coverage_part = 0.4 * (coverage.min(100) as f64 / 100.0);
    let verified_part = if tracks.is_empty() {
        0.0
    } else {
        0.4 * (tracks.iter().filter(|t| t.verified).count() as f64 / tracks.len() as f64)
    };
    let cap = config.gap_penalty_cap.max(1);
    let gap_part = 0.2 * (1.0 - gap_count.min(cap) as f64 / cap as f64);
    ((coverage_part + verified_part + gap_part) * 100.0).round() as u32
}

/// Full analysis of one set: gaps, suggestions, coverage and confidence.
pub fn analyze_set(
    input: &SetAnalysisInput,
    config: &GapConfig,
    weights: &SuggestionWeights,
    fit: &DurationFit,
) -> SetAnalysis {
    let spans = detect_gaps(input, config);
    let whole_set = spans.len() == 1 && spans[0].previous.is_none() && spans[0].next.is_none();
    let ranker = SuggestionRanker::new(input, weights, fit);

    let gaps: Vec<Gap> = spans
        .iter()
        .enumerate()
        .map(|(i, span)| {
            let duration = span.duration();
            let suggestions = ranker.rank(duration);
            let confidence = if whole_set {
                GapConfidence::Low
            } else {
                classify_gap(
                    duration,
                    span.previous.is_some(),
                    span.next.is_some(),
                    suggestions.len(),
                    config,
                )
            };
            Gap {
                id: format!("{}-gap-{}", input.set_id, i + 1),
                start_time: span.start,
                end_time: span.end,
                duration,
                previous_track: span.previous.map(GapNeighbor::from),
                next_track: span.next.map(GapNeighbor::from),
                estimated_track_count: estimate_track_count(duration, config),
                suggestions,
                confidence,
            }
        })
        .collect();

    let coverage = coverage_percent(input, config);
    let estimated_missing_tracks = gaps.iter().map(|g| g.estimated_track_count).sum();
    let confidence = overall_confidence(coverage, &input.tracks, gaps.len(), config);

    SetAnalysis {
        set_id: input.set_id.clone(),
        gaps,
        coverage,
        estimated_missing_tracks,
        confidence,
    }
}

/// Analyse many independent sets in parallel.
pub fn analyze_sets(
    inputs: &[SetAnalysisInput],
    config: &GapConfig,
    weights: &SuggestionWeights,
    fit: &DurationFit,
) -> Vec<SetAnalysis> {
    inputs
        .par_iter()
        .map(|input| analyze_set(input, config, weights, fit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeaturedIn, RepositoryTrack};

    fn event(id: &str, ts: Option<f64>, dur: Option<f64>, verified: bool) -> TrackEvent {
        TrackEvent {
            id: id.to_string(),
            title: format!("Title {}", id),
            artist: format!("Artist {}", id),
            start_timestamp_seconds: ts,
            duration_seconds: dur,
            verified,
        }
    }

    fn set(total: f64, tracks: Vec<TrackEvent>) -> SetAnalysisInput {
        SetAnalysisInput {
            set_id: "set-1".to_string(),
            set_artist: "Fisher".to_string(),
            total_duration: total,
            tracks,
            repository_tracks: Vec::new(),
        }
    }

    fn analyze(input: &SetAnalysisInput) -> SetAnalysis {
        analyze_set(
            input,
            &GapConfig::default(),
            &SuggestionWeights::default(),
            &DurationFit::default(),
        )
    }

    fn assert_well_formed(analysis: &SetAnalysis, total: f64) {
        for gap in &analysis.gaps {
            assert!(gap.start_time >= 0.0);
            assert!(gap.start_time < gap.end_time);
            assert!(gap.end_time <= total);
            assert!((gap.duration - (gap.end_time - gap.start_time)).abs() < 1e-9);
        }
        for pair in analysis.gaps.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
    }

    #[test]
    fn test_empty_set_is_one_low_gap() {
        let input = set(3600.0, vec![]);
        let analysis = analyze(&input);
        assert_eq!(analysis.gaps.len(), 1);
        let gap = &analysis.gaps[0];
        assert_eq!(gap.start_time, 0.0);
        assert_eq!(gap.end_time, 3600.0);
        assert_eq!(gap.confidence, GapConfidence::Low);
        assert_eq!(analysis.estimated_missing_tracks, 12);
        assert_eq!(analysis.coverage, 0);
    }

    #[test]
    fn test_back_to_back_tracks_have_no_gaps() {
        let input = set(
            480.0,
            vec![
                event("a", Some(0.0), Some(240.0), true),
                event("b", Some(240.0), Some(240.0), true),
            ],
        );
        let analysis = analyze(&input);
        assert!(analysis.gaps.is_empty());
        assert_eq!(analysis.coverage, 100);
        assert_eq!(analysis.confidence, 100);
    }

    #[test]
    fn test_intro_between_and_outro_gaps() {
        let input = set(
            2000.0,
            vec![
                event("b", Some(800.0), Some(300.0), false),
                event("a", Some(200.0), None, true),
                event("x", None, Some(300.0), true),
            ],
        );
        let spans = detect_gaps(&input, &GapConfig::default());
        assert_eq!(spans.len(), 3);
        // intro 0-200
        assert_eq!((spans[0].start, spans[0].end), (0.0, 200.0));
        assert!(spans[0].previous.is_none());
        assert_eq!(spans[0].next.map(|t| t.id.as_str()), Some("a"));
        // a ends at 440 (default 240s), b starts at 800
        assert_eq!((spans[1].start, spans[1].end), (440.0, 800.0));
        // b ends at 1100, outro to 2000
        assert_eq!((spans[2].start, spans[2].end), (1100.0, 2000.0));
        assert!(spans[2].next.is_none());
    }

    #[test]
    fn test_small_gaps_are_ignored() {
        let input = set(
            700.0,
            vec![
                event("a", Some(100.0), Some(200.0), true), // intro of 100s is under 120
                event("b", Some(390.0), Some(200.0), true), // 90s gap is not > 90
            ],
        );
        // b ends at 590, 110s before the end: no outro
        assert!(detect_gaps(&input, &GapConfig::default()).is_empty());
    }

    #[test]
    fn test_overlapping_tracks_never_produce_overlapping_gaps() {
        let input = set(
            3000.0,
            vec![
                event("long", Some(0.0), Some(1200.0), true),
                event("inside", Some(300.0), Some(100.0), true),
                event("after", Some(1500.0), Some(300.0), true),
            ],
        );
        let spans = detect_gaps(&input, &GapConfig::default());
        // covered until 1200 by the long track; next gap 1200-1500
        assert_eq!((spans[0].start, spans[0].end), (1200.0, 1500.0));
        let analysis = analyze(&input);
        assert_well_formed(&analysis, 3000.0);
    }

    #[test]
    fn test_tracks_beyond_total_are_clamped() {
        let input = set(
            1000.0,
            vec![event("a", Some(0.0), Some(240.0), true), event("late", Some(1500.0), Some(240.0), true)],
        );
        let analysis = analyze(&input);
        assert_well_formed(&analysis, 1000.0);
        assert_eq!(analysis.gaps.len(), 1);
        assert_eq!(analysis.gaps[0].end_time, 1000.0);
    }

    #[test]
    fn test_estimate_track_count() {
        let c = GapConfig::default();
        assert_eq!(estimate_track_count(100.0, &c), 0);
        assert_eq!(estimate_track_count(200.0, &c), 1);
        assert_eq!(estimate_track_count(240.0, &c), 1);
        assert_eq!(estimate_track_count(1000.0, &c), 3);
        assert_eq!(estimate_track_count(3600.0, &c), 12);
    }

    #[test]
    fn test_classify_gap() {
        let c = GapConfig::default();
        assert_eq!(classify_gap(700.0, true, true, 0, &c), GapConfidence::Low);
        assert_eq!(classify_gap(300.0, true, true, 0, &c), GapConfidence::High);
        assert_eq!(classify_gap(300.0, false, true, 2, &c), GapConfidence::Medium);
        assert_eq!(classify_gap(700.0, true, true, 1, &c), GapConfidence::Medium);
        assert_eq!(classify_gap(150.0, true, true, 0, &c), GapConfidence::Low);
    }

    #[test]
    fn test_coverage_is_monotonic() {
        let mut tracks = Vec::new();
        let mut last = 0;
        for i in 0..12 {
            tracks.push(event(&format!("t{}", i), Some(i as f64 * 400.0), Some(250.0), i % 2 == 0));
            let cov = coverage_percent(&set(3600.0, tracks.clone()), &GapConfig::default());
            assert!(cov >= last);
            last = cov;
        }
        assert_eq!(last, 83);
        // untimed events do not count
        tracks.push(event("untimed", None, Some(500.0), true));
        assert_eq!(coverage_percent(&set(3600.0, tracks), &GapConfig::default()), 83);
    }

    #[test]
    fn test_overall_confidence_blend() {
        let c = GapConfig::default();
        let tracks = vec![event("a", Some(0.0), None, true), event("b", Some(10.0), None, false)];
        // 0.4 * 0.5 + 0.4 * 0.5 + 0.2 * (1 - 2/10) = 0.56
        assert_eq!(overall_confidence(50, &tracks, 2, &c), 56);
        // penalty saturates
        assert_eq!(overall_confidence(50, &tracks, 40, &c), 40);
    }

    #[test]
    fn test_gaps_get_suggestions_and_medium_confidence() {
        let mut input = set(
            1400.0,
            vec![event("a", Some(0.0), Some(300.0), true), event("b", Some(1000.0), Some(400.0), true)],
        );
        input.repository_tracks = vec![RepositoryTrack {
            id: "r1".to_string(),
            title: "Candidate".to_string(),
            artist: "Fisher".to_string(),
            duration_seconds: Some(650.0),
            featured_in: vec![FeaturedIn {
                set_id: "elsewhere".to_string(),
                set_name: "Elsewhere".to_string(),
                artist: "Someone".to_string(),
                timestamp: Some(60.0),
            }],
        }];
        let analysis = analyze(&input);
        assert_eq!(analysis.gaps.len(), 1);
        let gap = &analysis.gaps[0];
        assert_eq!(gap.duration, 700.0);
        assert_eq!(gap.suggestions.len(), 1);
        // 30 same artist + 10 cross-set + 10 within 60s
        assert_eq!(gap.suggestions[0].confidence_score, 50);
        assert_eq!(gap.confidence, GapConfidence::Medium);
        assert_eq!(gap.estimated_track_count, 2);
        assert_eq!(gap.previous_track.as_ref().map(|t| t.id.as_str()), Some("a"));
    }

    #[test]
    fn test_analyze_sets_in_parallel_keeps_order() {
        let inputs: Vec<SetAnalysisInput> = (0..6)
            .map(|i| {
                let mut s = set(1000.0 + i as f64, vec![]);
                s.set_id = format!("set-{}", i);
                s
            })
            .collect();
        let results = analyze_sets(
            &inputs,
            &GapConfig::default(),
            &SuggestionWeights::default(),
            &DurationFit::default(),
        );
        let ids: Vec<&str> = results.iter().map(|r| r.set_id.as_str()).collect();
        assert_eq!(ids, vec!["set-0", "set-1", "set-2", "set-3", "set-4", "set-5"]);
    }

    #[test]
    fn test_non_positive_total_duration_yields_nothing() {
        let analysis = analyze(&set(0.0, vec![event("a", Some(0.0), None, true)]));
        assert!(analysis.gaps.is_empty());
        assert_eq!(analysis.coverage, 0);
    }
}
