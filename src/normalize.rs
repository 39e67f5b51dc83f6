//! Shared text normalization for gap suggestions and catalog reconciliation.
//!
//! Both pipelines compare artist/title strings through these functions, so a
//! change here shifts match rates in both. Run the tests after changes.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Words and phrases that carry no identity. Longer phrases first so
/// "original mix" is consumed before anything shorter could split it.
pub const STOPLIST: &[&str] = &[
    "free download",
    "original mix",
    "unreleased",
    "preview",
    "remix",
    "clip",
    "edit",
];

static STOPWORDS: Lazy<Regex> = Lazy::new(|| {
    let alternation = STOPLIST
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{})\b", alternation)).unwrap()
});

/// Innermost `(...)` or `[...]` span. Applied repeatedly to unwind nesting.
static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()]*\)|\[[^\[\]]*\]").unwrap());

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII.
/// e.g., "Âme" → "ame", "Röyksopp" → "royksopp"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Unify typographic quotes and spell out ampersands between words.
pub fn normalize_punctuation(s: &str) -> String {
    s.replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(" & ", " and ")
}

fn collapse_whitespace(s: &str) -> String {
    MULTI_SPACE.replace_all(s, " ").trim().to_string()
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Canonicalize an artist or title for comparison.
///
/// Lowercases, folds to ASCII, strips punctuation, removes the stoplist and
/// collapses whitespace. Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let folded = fold_to_ascii(&normalize_punctuation(raw));
    let stripped = NON_ALNUM.replace_all(&folded, "");
    let mut result = collapse_whitespace(&stripped);

    // Removing one stopword can join two words into a new stop phrase
    // ("original remix mix"), so run to a fixpoint.
    loop {
        let next = collapse_whitespace(&STOPWORDS.replace_all(&result, " "));
        if next == result {
            return result;
        }
        result = next;
    }
}

/// `normalize` for optional input; absent values normalize to "".
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}

/// Remove every `(...)` and `[...]` span, including nested ones.
///
/// Must be applied to both sides of a title comparison, otherwise
/// "Good Life" would be contained in "A Place You Wanna Go (Good Life)".
pub fn strip_parenthetical(raw: &str) -> String {
    let mut result = raw.to_string();
    loop {
        let next = PARENTHETICAL.replace_all(&result, " ").to_string();
        if next == result {
            break;
        }
        result = next;
    }
    collapse_whitespace(&result)
}

/// Normalized title with parenthetical content removed first.
pub fn normalize_title_core(title: &str) -> String {
    normalize(&strip_parenthetical(title))
}

/// Cache key for a catalog lookup: `artist|||title`, both normalized.
///
/// Parentheticals are kept in the title part so differently-remixed versions
/// of the same base track never share a cached outcome.
pub fn lookup_key(artist: &str, title: &str) -> String {
    format!("{}|||{}", normalize(artist), normalize(title))
}

/// Number of whitespace-separated words in an already-normalized string.
pub fn word_count(normalized: &str) -> usize {
    normalized.split_whitespace().count()
}

/// Convert a cue string like "1:23:45" or "47:30" to seconds.
pub fn parse_cue_to_seconds(cue: &str) -> Option<u32> {
    let parts: Vec<&str> = cue.trim().split(':').collect();
    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (h, m, s) = match nums.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    // Garbage like "9999999:00:00" must not overflow
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

// ============================================================================
// TESTS
// ============================================================================
