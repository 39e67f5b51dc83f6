//! Scoring functions shared by gap suggestions and catalog reconciliation.
//!
//! Two contexts, different strictness:
//! - Suggestion scoring: additive points, kept above a threshold
//! - Reconciliation scoring: discrete tiers (none / strong / exact)
//!
//! All point values and ratios here are tuned heuristics, not derived ones.
//! They are exposed as overridable structs so product owners can adjust them.
//! Two matching choices are stricter than plain "one contains the other":
//! containment is on whole words by default (`whole_word_containment`), and
//! a contained title must cover `min_title_word_ratio` (0.6) of the longer one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::normalize::{normalize, normalize_title_core, word_count};

// ============================================================================
// Thresholds
// ============================================================================

/// Point scheme for ranking repository tracks against a gap.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionWeights {
    pub same_artist: u32,
    pub per_cross_set_appearance: u32,
    pub cross_set_cap: u32,
    pub close_duration_secs: f64,
    pub close_duration_points: u32,
    pub near_duration_secs: f64,
    pub near_duration_points: u32,
    /// Candidates must score strictly above this to be kept
    pub keep_above: u32,
    pub max_suggestions: usize,
}

impl Default for SuggestionWeights {
    fn default() -> Self {
        Self {
            same_artist: 30,
            per_cross_set_appearance: 10,
            cross_set_cap: 40,
            close_duration_secs: 30.0,
            close_duration_points: 20,
            near_duration_secs: 60.0,
            near_duration_points: 10,
            keep_above: 20,
            max_suggestions: 5,
        }
    }
}

/// Knobs for tiered catalog matching.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileThresholds {
    /// Minimum shorter/longer word-count ratio for a containment title match
    pub min_title_word_ratio: f64,
    /// Containment must align on word boundaries ("one" is not in "someone").
    /// Off falls back to raw substring containment.
    pub whole_word_containment: bool,
}

impl Default for ReconcileThresholds {
    fn default() -> Self {
        Self {
            min_title_word_ratio: 0.6,
            whole_word_containment: true,
        }
    }
}

// ============================================================================
// Regex Patterns
// ============================================================================

/// `(<name> Edit)` / `[<name> Edit]`
static EDIT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\(\[]\s*([^()\[\]]+?)\s+edit\s*[\)\]]").unwrap());

/// `(<X> Remix)`, `(<X> Rework)`, `(<X> Re-edit)`, `(<X> Re-work)`
static VERSION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\(\[]\s*([^()\[\]]+?\s+(?:remix|rework|re-edit|re-work))\s*[\)\]]").unwrap()
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Edit names that are label releases rather than a DJ's private tool edit.
pub const RELEASE_EDIT_NAMES: &[&str] = &[
    "radio", "extended", "single", "album", "club", "original", "short", "vocal", "dub",
    "instrumental", "clean", "explicit",
];

// ============================================================================
// Pattern Helpers
// ============================================================================

/// True for DJ tool edits like "Track (Fisher Edit)". Those almost never reach
/// a public catalog, so they are skipped without querying.
pub fn is_dj_edit(title: &str) -> bool {
    EDIT_TAG.captures_iter(title).any(|caps| {
        let name = caps[1].trim().to_lowercase();
        !RELEASE_EDIT_NAMES.contains(&name.as_str())
    })
}

/// Remix/rework tag from a raw title, lowercased with whitespace collapsed.
/// e.g. "Track (Chris Stussy Remix)" → "chris stussy remix"
pub fn version_tag(title: &str) -> Option<String> {
    VERSION_TAG
        .captures(title)
        .map(|caps| MULTI_SPACE.replace_all(caps[1].trim(), " ").to_lowercase())
}

fn carries_tag(raw_title: &str, tag: &str) -> bool {
    MULTI_SPACE
        .replace_all(&raw_title.to_lowercase(), " ")
        .contains(tag)
}

/// Whole-word containment on normalized strings.
fn contains_words(haystack: &str, needle: &str) -> bool {
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

fn contains(haystack: &str, needle: &str, whole_words: bool) -> bool {
    if whole_words {
        contains_words(haystack, needle)
    } else {
        haystack.contains(needle)
    }
}

// ============================================================================
// Tiered Matching
// ============================================================================

/// Discrete reconciliation confidence. Ordered so `max()` picks the best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    None,
    Strong,
    Exact,
}

impl MatchTier {
    pub fn is_match(self) -> bool {
        self != MatchTier::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::None => "none",
            MatchTier::Strong => "strong",
            MatchTier::Exact => "exact",
        }
    }
}

/// Title tier on normalized, parenthetical-free strings.
pub fn title_tier(a: &str, b: &str, thresholds: &ReconcileThresholds) -> MatchTier {
    if a.is_empty() || b.is_empty() {
        return MatchTier::None;
    }
    if a == b {
        return MatchTier::Exact;
    }
    let (short, long) = if word_count(a) <= word_count(b) {
        (a, b)
    } else {
        (b, a)
    };
    if !contains(long, short, thresholds.whole_word_containment) {
        return MatchTier::None;
    }
    // Guards against "Home" matching "Take Me Home Tonight Forever"
    let ratio = word_count(short) as f64 / word_count(long) as f64;
    if ratio >= thresholds.min_title_word_ratio {
        MatchTier::Strong
    } else {
        MatchTier::None
    }
}

/// Artist tier on normalized strings, whole-word containment.
pub fn artist_tier(a: &str, b: &str) -> MatchTier {
    artist_tier_with(a, b, true)
}

fn artist_tier_with(a: &str, b: &str, whole_words: bool) -> MatchTier {
    if a.is_empty() || b.is_empty() {
        MatchTier::None
    } else if a == b {
        MatchTier::Exact
    } else if contains(a, b, whole_words) || contains(b, a, whole_words) {
        MatchTier::Strong
    } else {
        MatchTier::None
    }
}

/// Compare a queried (artist, title) with one catalog candidate.
///
/// Raw strings in, tier out. DJ edits never match; a remix/rework tag on the
/// query must be carried by the candidate.
pub fn catalog_match_tier(
    query_artist: &str,
    query_title: &str,
    candidate_artist: &str,
    candidate_title: &str,
    thresholds: &ReconcileThresholds,
) -> MatchTier {
    if is_dj_edit(query_title) {
        return MatchTier::None;
    }

    let q_title = normalize_title_core(query_title);
    let c_title = normalize_title_core(candidate_title);
    let q_artist = normalize(query_artist);
    let c_artist = normalize(candidate_artist);
    if q_title.is_empty() || c_title.is_empty() || q_artist.is_empty() || c_artist.is_empty() {
        return MatchTier::None;
    }

    if let Some(tag) = version_tag(query_title) {
        if !carries_tag(candidate_title, &tag) {
            return MatchTier::None;
        }
    }

    let title = title_tier(&q_title, &c_title, thresholds);
    let artist = artist_tier_with(&q_artist, &c_artist, thresholds.whole_word_containment);
    // Overall tier is the weaker of the two sides
    title.min(artist)
}

/// Best tier across every credited artist of a candidate.
pub fn catalog_match_tier_multi(
    query_artist: &str,
    query_title: &str,
    candidate_artists: &[String],
    candidate_title: &str,
    thresholds: &ReconcileThresholds,
) -> MatchTier {
    let mut best = MatchTier::None;
    for artist in candidate_artists {
        let tier = catalog_match_tier(query_artist, query_title, artist, candidate_title, thresholds);
        if tier == MatchTier::Exact {
            return tier;
        }
        best = best.max(tier);
    }
    if candidate_artists.len() > 1 {
        // Query artist may itself be a collaboration ("Fisher & Chris Lake")
        let joined = candidate_artists.join(" & ");
        best = best.max(catalog_match_tier(
            query_artist,
            query_title,
            &joined,
            candidate_title,
            thresholds,
        ));
    }
    best
}

// ============================================================================
// Suggestion Scoring
// ============================================================================

/// Signals about one repository candidate relative to one gap.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSignals {
    pub same_artist: bool,
    /// Appearances in sets other than the one being analysed
    pub cross_set_appearances: usize,
    /// |candidate duration - gap duration|, if the candidate duration is known
    pub duration_diff: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub score: u32,
    pub reasons: Vec<String>,
}

fn contributions(signals: &CandidateSignals, w: &SuggestionWeights) -> Vec<(u32, String)> {
    let mut parts = Vec::new();
    if signals.same_artist {
        parts.push((w.same_artist, "Same artist as the set".to_string()));
    }
    if signals.cross_set_appearances > 0 {
        let points = (signals.cross_set_appearances as u32)
            .saturating_mul(w.per_cross_set_appearance)
            .min(w.cross_set_cap);
        parts.push((
            points,
            format!("Played in {} other set(s)", signals.cross_set_appearances),
        ));
    }
    match signals.duration_diff {
        Some(diff) if diff <= w.close_duration_secs => parts.push((
            w.close_duration_points,
            format!("Duration within {}s of gap", w.close_duration_secs),
        )),
        Some(diff) if diff <= w.near_duration_secs => parts.push((
            w.near_duration_points,
            format!("Duration within {}s of gap", w.near_duration_secs),
        )),
        _ => {}
    }
    parts
}

/// Additive score for one candidate. `None` when it does not clear the bar.
pub fn score_suggestion(signals: &CandidateSignals, weights: &SuggestionWeights) -> Option<ScoredCandidate> {
    let scored = contributions(signals, weights).into_iter().fold(
        ScoredCandidate {
            score: 0,
            reasons: Vec::new(),
        },
        |mut acc, (points, reason)| {
            acc.score += points;
            acc.reasons.push(reason);
            acc
        },
    );
    (scored.score > weights.keep_above).then_some(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(qa: &str, qt: &str, ca: &str, ct: &str) -> MatchTier {
        catalog_match_tier(qa, qt, ca, ct, &ReconcileThresholds::default())
    }

    #[test]
    fn test_exact_match_after_normalization() {
        assert_eq!(tier("Fisher", "Unreleased ID", "Fisher", "Unreleased ID"), MatchTier::Exact);
        assert_eq!(tier("FISHER", "Losing It", "Fisher", "Losing It (Original Mix)"), MatchTier::Exact);
    }

    #[test]
    fn test_parenthetical_stripped_on_both_sides() {
        assert_eq!(
            tier("Artist", "Good Life", "Artist", "A Place You Wanna Go (Good Life)"),
            MatchTier::None
        );
    }

    #[test]
    fn test_remix_tag_coherence() {
        assert_eq!(
            tier("Fisher", "Track (Chris Stussy Remix)", "Fisher", "Track (Malin Genie Remix)"),
            MatchTier::None
        );
        assert_eq!(
            tier("Fisher", "Track (Chris Stussy Remix)", "Fisher", "Track"),
            MatchTier::None
        );
        assert_eq!(
            tier("Fisher", "Track (Chris Stussy Remix)", "Fisher", "Track [chris stussy remix]"),
            MatchTier::Exact
        );
    }

    #[test]
    fn test_dj_edit_detection() {
        assert!(is_dj_edit("Losing It (Fisher Edit)"));
        assert!(is_dj_edit("Something [Chris Stussy edit]"));
        assert!(!is_dj_edit("Losing It (Radio Edit)"));
        assert!(!is_dj_edit("Track (Dan Shake Re-edit)"));
        assert!(!is_dj_edit("Editor"));
        assert_eq!(tier("Fisher", "Losing It (Fisher Edit)", "Fisher", "Losing It (Fisher Edit)"), MatchTier::None);
    }

    #[test]
    fn test_version_tag_extraction() {
        assert_eq!(version_tag("Track (Chris  Stussy Remix)").as_deref(), Some("chris stussy remix"));
        assert_eq!(version_tag("Track [Someone Re-Work]").as_deref(), Some("someone re-work"));
        assert_eq!(version_tag("Track (Extended Mix)"), None);
    }

    #[test]
    fn test_title_word_ratio_guard() {
        let t = ReconcileThresholds::default();
        // 3/4 = 0.75
        assert_eq!(title_tier("losing it now", "losing it now please", &t), MatchTier::Strong);
        // 1/5 = 0.2
        assert_eq!(title_tier("home", "take me home tonight forever", &t), MatchTier::None);
        // substring inside a word does not count
        assert_eq!(title_tier("one", "someone", &t), MatchTier::None);
        let loose = ReconcileThresholds {
            min_title_word_ratio: 0.1,
            ..Default::default()
        };
        assert_eq!(title_tier("home", "take me home tonight forever", &loose), MatchTier::Strong);
    }

    #[test]
    fn test_artist_tiers() {
        assert_eq!(artist_tier("fisher", "fisher"), MatchTier::Exact);
        assert_eq!(artist_tier("fisher", "fisher and chris lake"), MatchTier::Strong);
        assert_eq!(artist_tier("ame", "dame"), MatchTier::None);
        assert_eq!(artist_tier("", "fisher"), MatchTier::None);
    }

    #[test]
    fn test_substring_containment_is_opt_in() {
        let substring = ReconcileThresholds {
            whole_word_containment: false,
            ..Default::default()
        };
        assert_eq!(title_tier("one", "someone", &substring), MatchTier::Strong);
        assert_eq!(
            catalog_match_tier("Ame", "Rej", "Dame", "Rej", &substring),
            MatchTier::Strong
        );
        assert_eq!(tier("Ame", "Rej", "Dame", "Rej"), MatchTier::None);
    }

    #[test]
    fn test_empty_sides_never_match() {
        assert_eq!(tier("", "Track", "Fisher", "Track"), MatchTier::None);
        assert_eq!(tier("Fisher", "(Unreleased)", "Fisher", "Track"), MatchTier::None);
    }

    #[test]
    fn test_exact_implies_strong_conditions() {
        let t = ReconcileThresholds::default();
        let pairs = [("losing it", "losing it"), ("a b c", "a b c")];
        for (a, b) in pairs {
            assert_eq!(title_tier(a, b, &t), MatchTier::Exact);
            // Exact strings also satisfy containment and ratio 1.0
            assert!(contains_words(a, b));
            assert!(word_count(a) as f64 / word_count(b) as f64 >= t.min_title_word_ratio);
        }
        assert!(MatchTier::Exact > MatchTier::Strong);
        assert!(MatchTier::Exact.is_match() && MatchTier::Strong.is_match());
    }

    #[test]
    fn test_multi_artist_best_tier() {
        let t = ReconcileThresholds::default();
        let artists = vec!["Chris Lake".to_string(), "Fisher".to_string()];
        assert_eq!(
            catalog_match_tier_multi("Fisher", "Losing It", &artists, "Losing It", &t),
            MatchTier::Exact
        );
        assert_eq!(
            catalog_match_tier_multi("Chris Lake & Fisher", "Losing It", &artists, "Losing It", &t),
            MatchTier::Exact
        );
    }

    #[test]
    fn test_score_suggestion_points() {
        let w = SuggestionWeights::default();
        let s = score_suggestion(
            &CandidateSignals {
                same_artist: true,
                cross_set_appearances: 7,
                duration_diff: Some(12.0),
            },
            &w,
        )
        .unwrap();
        // 30 + capped 40 + 20
        assert_eq!(s.score, 90);
        assert_eq!(s.reasons.len(), 3);

        let near = score_suggestion(
            &CandidateSignals {
                same_artist: false,
                cross_set_appearances: 2,
                duration_diff: Some(45.0),
            },
            &w,
        )
        .unwrap();
        assert_eq!(near.score, 30);
    }

    #[test]
    fn test_score_suggestion_threshold_is_strict() {
        let w = SuggestionWeights::default();
        // exactly 20 is dropped
        assert!(score_suggestion(
            &CandidateSignals {
                same_artist: false,
                cross_set_appearances: 0,
                duration_diff: Some(5.0),
            },
            &w,
        )
        .is_none());
        // 10 + 20 = 30 kept
        assert!(score_suggestion(
            &CandidateSignals {
                same_artist: false,
                cross_set_appearances: 1,
                duration_diff: Some(5.0),
            },
            &w,
        )
        .is_some());
    }
}
