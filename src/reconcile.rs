//! Batch confirmation of "unreleased" records against public catalogs.
//!
//! Per record: skip placeholders and DJ edits, trust a confident stored
//! match, consult the lookup cache, and only then query the catalogs. A
//! rate-limit response halts the run; everything else is logged, counted
//! and skipped so the next run can resume from the cache.

use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use strsim::normalized_levenshtein;
use tracing::{debug, error, info, warn};

use crate::cache::{decide, CacheDecision, LookupCache, NOT_FOUND_TTL_DAYS};
use crate::catalog::{CatalogError, CatalogTrack, ThrottledProvider};
use crate::models::{ReconcileStats, UnreleasedTrackRecord};
use crate::normalize::{lookup_key, normalize_title_core};
use crate::progress::{create_progress_bar, log_progress};
use crate::scoring::{catalog_match_tier_multi, is_dj_edit, MatchTier, ReconcileThresholds};
use crate::store::RecordStore;

/// Titles that only mean "not identified yet".
const PLACEHOLDER_TITLES: &[&str] = &["id", "unknown"];

/// Confidence written alongside a fresh match.
const EXACT_CONFIDENCE: f64 = 1.0;
const STRONG_CONFIDENCE: f64 = 0.8;

/// Near misses at or above this similarity are logged for threshold tuning.
const NEAR_MISS_SIMILARITY: f64 = 0.75;

const PROGRESS_LOG_INTERVAL: u64 = 250;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub page_size: usize,
    /// Stop after this many records
    pub limit: Option<usize>,
    /// Run every step but skip record and cache writes
    pub dry_run: bool,
    pub not_found_ttl: Duration,
    /// Stored `match_confidence` at or above this is trusted without a query
    pub prior_match_min_confidence: f64,
    pub thresholds: ReconcileThresholds,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            page_size: 500,
            limit: None,
            dry_run: false,
            not_found_ttl: Duration::days(NOT_FOUND_TTL_DAYS),
            prior_match_min_confidence: 0.9,
            thresholds: ReconcileThresholds::default(),
        }
    }
}

/// Whether the batch should keep going after a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

/// Best candidate found for one record.
#[derive(Debug, Clone)]
struct CatalogMatch {
    provider: &'static str,
    track: CatalogTrack,
    tier: MatchTier,
}

pub fn is_placeholder_title(title: &str) -> bool {
    let t = title.trim().to_lowercase();
    t.is_empty() || PLACEHOLDER_TITLES.contains(&t.as_str())
}

/// True when stored catalog data already carries a provider id from a
/// confident match, so the record can be confirmed without a query.
pub fn has_confident_prior_match(data: Option<&Value>, min_confidence: f64) -> bool {
    let Some(obj) = data.and_then(Value::as_object) else {
        return false;
    };
    let has_id = obj.iter().any(|(k, v)| {
        k.ends_with("_id") && v.as_str().map_or(!v.is_null(), |s| !s.trim().is_empty())
    });
    let confident = obj
        .get("match_confidence")
        .and_then(Value::as_f64)
        .is_some_and(|c| c >= min_confidence)
        || obj
            .iter()
            .any(|(k, v)| k.ends_with("_match_tier") && v.as_str() == Some(MatchTier::Exact.as_str()));
    has_id && confident
}

/// Merge `fields` into existing catalog data. Existing keys not in `fields`
/// are kept; a non-object payload is preserved under `previous_catalog_data`.
pub fn merge_catalog_data(existing: Option<&Value>, fields: Map<String, Value>) -> Value {
    let mut merged = match existing {
        Some(Value::Object(obj)) => obj.clone(),
        Some(other) if !other.is_null() => {
            let mut m = Map::new();
            m.insert("previous_catalog_data".to_string(), other.clone());
            m
        }
        _ => Map::new(),
    };
    merged.extend(fields);
    Value::Object(merged)
}

fn tier_confidence(tier: MatchTier) -> f64 {
    match tier {
        MatchTier::Exact => EXACT_CONFIDENCE,
        MatchTier::Strong => STRONG_CONFIDENCE,
        MatchTier::None => 0.0,
    }
}

/// Drives one reconciliation run over a record store.
pub struct Reconciler<'a> {
    store: &'a dyn RecordStore,
    cache: &'a dyn LookupCache,
    providers: Vec<ThrottledProvider>,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        cache: &'a dyn LookupCache,
        providers: Vec<ThrottledProvider>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            cache,
            providers,
            options,
        }
    }

    /// Process pending records page by page until exhausted, the limit is
    /// reached, or a provider rate-limits us.
    pub fn run(&self) -> ReconcileStats {
        let start = Instant::now();
        let mut stats = ReconcileStats {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        let pending = self.store.count_pending().unwrap_or_else(|e| {
            warn!(error = %e, "Could not count pending records");
            0
        });
        let total = self.options.limit.map_or(pending, |l| l.min(pending));
        let provider_names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        info!(
            pending,
            total,
            providers = ?provider_names,
            dry_run = self.options.dry_run,
            "Starting reconciliation"
        );

        let pb = create_progress_bar(total as u64, "Reconciling");
        let page_size = self.options.page_size.max(1);
        let mut after_id: Option<String> = None;

        'pages: loop {
            let remaining = self
                .options
                .limit
                .map_or(usize::MAX, |l| l.saturating_sub(stats.checked));
            if remaining == 0 {
                break;
            }
            let want = page_size.min(remaining);

            let page = match self.store.fetch_pending_page(after_id.as_deref(), want) {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, after = ?after_id, "Failed to fetch page, stopping");
                    break;
                }
            };
            let Some(last) = page.last() else {
                break;
            };
            after_id = Some(last.id.clone());

            for record in &page {
                let flow = self.reconcile_record(record, &mut stats);
                pb.inc(1);
                log_progress("reconcile", stats.checked as u64, total as u64, PROGRESS_LOG_INTERVAL);
                if flow == Flow::Halt {
                    stats.halted_on_rate_limit = true;
                    break 'pages;
                }
            }

            if page.len() < want {
                break;
            }
        }

        pb.finish_and_clear();
        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            checked = stats.checked,
            confirmed = stats.confirmed(),
            still_unreleased = stats.still_unreleased,
            halted = stats.halted_on_rate_limit,
            "Reconciliation finished"
        );
        stats
    }

    /// Reconcile a single record, updating `stats`.
    pub fn reconcile_record(&self, record: &UnreleasedTrackRecord, stats: &mut ReconcileStats) -> Flow {
        stats.checked += 1;
        let artist = record.artist_name.as_str();
        let title = record.track_title.as_str();

        if is_placeholder_title(title) {
            stats.skipped_placeholder += 1;
            return Flow::Continue;
        }
        if is_dj_edit(title) {
            debug!(id = %record.id, title, "Skipping DJ edit");
            stats.skipped_dj_edit += 1;
            return Flow::Continue;
        }

        if has_confident_prior_match(
            record.external_catalog_data.as_ref(),
            self.options.prior_match_min_confidence,
        ) {
            if self.persist(record, Map::new(), stats) {
                stats.confirmed_by_id += 1;
            }
            return Flow::Continue;
        }

        let key = lookup_key(artist, title);
        let cached = self.cache.get(&key).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Cache read failed, querying catalogs");
            None
        });
        match decide(cached, self.options.not_found_ttl) {
            CacheDecision::Hit(data) => {
                let fields = match data {
                    Some(Value::Object(obj)) => obj,
                    _ => Map::new(),
                };
                if self.persist(record, fields, stats) {
                    stats.confirmed_by_cache += 1;
                }
                return Flow::Continue;
            }
            CacheDecision::KnownMissing => {
                stats.skipped_cached_not_found += 1;
                return Flow::Continue;
            }
            CacheDecision::Miss => {}
        }

        let found = match self.search_catalogs(artist, title, stats) {
            Ok(found) => found,
            Err(e) if e.is_rate_limit() => {
                warn!(id = %record.id, error = %e, "Rate limited, halting run");
                return Flow::Halt;
            }
            Err(e) => {
                warn!(id = %record.id, artist, title, error = %e, "Catalog lookup failed");
                stats.lookup_errors += 1;
                return Flow::Continue;
            }
        };

        match found {
            Some(m) => {
                let mut fields = m.track.catalog_fields(m.provider, m.tier);
                fields.insert("match_confidence".to_string(), json!(tier_confidence(m.tier)));
                self.write_cache(&key, true, Some(&Value::Object(fields.clone())), stats);
                info!(
                    id = %record.id,
                    artist,
                    title,
                    provider = m.provider,
                    tier = m.tier.as_str(),
                    "Confirmed released"
                );
                if self.persist(record, fields, stats) {
                    stats.confirmed_by_query += 1;
                    match m.tier {
                        MatchTier::Exact => stats.confirmed_exact += 1,
                        _ => stats.confirmed_strong += 1,
                    }
                }
            }
            None => {
                self.write_cache(&key, false, None, stats);
                stats.still_unreleased += 1;
            }
        }
        Flow::Continue
    }

    /// Query every provider and phrasing; an exact match stops the search.
    ///
    /// A failed query is skipped so later phrasings and providers still run.
    /// The error only surfaces when nothing matched. Rate limits surface
    /// immediately.
    fn search_catalogs(
        &self,
        artist: &str,
        title: &str,
        stats: &mut ReconcileStats,
    ) -> Result<Option<CatalogMatch>, CatalogError> {
        let mut best: Option<CatalogMatch> = None;
        let mut nearest: Option<(f64, String)> = None;
        let mut last_error: Option<CatalogError> = None;
        let query_core = normalize_title_core(title);

        for provider in &self.providers {
            for query in provider.query_phrasings(artist, title) {
                stats.catalog_queries += 1;
                let candidates = match provider.search(&query) {
                    Ok(candidates) => candidates,
                    Err(e) if e.is_rate_limit() => return Err(e),
                    Err(e) => {
                        debug!(provider = provider.name(), query = %query, error = %e, "Query failed, trying next");
                        last_error = Some(e);
                        continue;
                    }
                };
                for track in candidates {
                    let tier = catalog_match_tier_multi(
                        artist,
                        title,
                        &track.artists,
                        &track.title,
                        &self.options.thresholds,
                    );
                    if tier.is_match() {
                        if best.as_ref().map_or(true, |b| tier > b.tier) {
                            best = Some(CatalogMatch {
                                provider: provider.name(),
                                track,
                                tier,
                            });
                        }
                        if tier == MatchTier::Exact {
                            return Ok(best);
                        }
                    } else {
                        let similarity = normalized_levenshtein(&query_core, &normalize_title_core(&track.title));
                        if nearest.as_ref().map_or(true, |(s, _)| similarity > *s) {
                            nearest = Some((similarity, track.title));
                        }
                    }
                }
            }
        }

        if best.is_some() {
            return Ok(best);
        }
        if let Some(e) = last_error {
            return Err(e);
        }
        if let Some((similarity, candidate)) = nearest.filter(|(s, _)| *s >= NEAR_MISS_SIMILARITY) {
            debug!(artist, title, candidate = %candidate, similarity, "Near miss rejected");
        }
        Ok(None)
    }

    /// Merge and store; returns false if the write failed.
    fn persist(&self, record: &UnreleasedTrackRecord, mut fields: Map<String, Value>, stats: &mut ReconcileStats) -> bool {
        fields.insert("confirmed_at".to_string(), json!(Utc::now().to_rfc3339()));
        let merged = merge_catalog_data(record.external_catalog_data.as_ref(), fields);

        if self.options.dry_run {
            debug!(id = %record.id, "Dry run: would mark released");
            return true;
        }
        match self.store.mark_released(&record.id, &merged) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Failed to update record");
                stats.failed_writes += 1;
                false
            }
        }
    }

    fn write_cache(&self, key: &str, found: bool, data: Option<&Value>, stats: &mut ReconcileStats) {
        if self.options.dry_run {
            return;
        }
        if let Err(e) = self.cache.put(key, found, data) {
            warn!(key, error = %e, "Failed to write lookup cache");
            stats.failed_writes += 1;
        }
    }
}

/// Interval override from a CLI millisecond value.
pub fn interval_override(delay_ms: Option<u64>) -> Option<StdDuration> {
    delay_ms.map(StdDuration::from_millis)
}
