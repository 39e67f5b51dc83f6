//! Public music catalog clients.
//!
//! Each provider turns an (artist, title) pair into one or more search
//! phrasings and returns raw candidates; tier scoring happens in the
//! reconciler. Calls are blocking and serialized behind a per-provider
//! rate limiter.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::normalize::strip_parenthetical;
use crate::scoring::MatchTier;

const USER_AGENT: &str = concat!("setlist-reconcile/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 15;
const SEARCH_LIMIT: &str = "5";

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_SEARCH_URL: &str = "https://api.spotify.com/v1/search";
const SPOTIFY_MIN_INTERVAL_MS: u64 = 150;

const DEEZER_SEARCH_URL: &str = "https://api.deezer.com/search";
const DEEZER_MIN_INTERVAL_MS: u64 = 1200;
/// Deezer signals quota exhaustion in the body with HTTP 200.
const DEEZER_QUOTA_ERROR_CODE: i64 = 4;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Rate limited by {provider}")]
    RateLimited {
        provider: &'static str,
        retry_after_secs: Option<u64>,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl CatalogError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CatalogError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CatalogError::Timeout(e.to_string())
        } else if e.is_decode() {
            CatalogError::Parse(e.to_string())
        } else {
            CatalogError::Network(e.to_string())
        }
    }
}

/// One search result, provider-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTrack {
    pub provider_id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub release_date: Option<String>,
    pub isrc: Option<String>,
    pub url: Option<String>,
    pub duration_ms: Option<u64>,
}

impl CatalogTrack {
    /// Provider-prefixed fields merged into a record's catalog data.
    pub fn catalog_fields(&self, provider: &str, tier: MatchTier) -> Map<String, Value> {
        let mut fields = Map::new();
        let mut put = |name: &str, value: Value| {
            if !value.is_null() {
                fields.insert(format!("{}_{}", provider, name), value);
            }
        };
        put("id", json!(self.provider_id));
        put("url", json!(self.url));
        put("title", json!(self.title));
        put("artists", json!(self.artists));
        put("album", json!(self.album));
        put("release_date", json!(self.release_date));
        put("isrc", json!(self.isrc));
        put("duration_ms", json!(self.duration_ms));
        put("match_tier", json!(tier.as_str()));
        fields
    }
}

/// A searchable public catalog.
pub trait CatalogProvider: Send + Sync {
    /// Short lowercase name, also the prefix of merged fields.
    fn name(&self) -> &'static str;

    /// Minimum delay between two requests to this provider.
    fn min_interval(&self) -> Duration;

    /// Search strings to try in order, most specific first.
    fn query_phrasings(&self, artist: &str, title: &str) -> Vec<String>;

    fn search(&self, query: &str) -> Result<Vec<CatalogTrack>, CatalogError>;
}

/// Free-text phrasing shared by providers: brackets flattened, tags kept.
fn free_text_query(artist: &str, title: &str) -> String {
    let flattened: String = title
        .chars()
        .map(|c| if matches!(c, '(' | ')' | '[' | ']') { ' ' } else { c })
        .collect();
    format!("{} {}", artist, flattened)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn quoted(s: &str) -> String {
    s.replace('"', "")
}

fn http_client() -> Result<Client, CatalogError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| CatalogError::Network(e.to_string()))
}

/// Statuses every provider treats as "back off and stop the run".
fn is_rate_limit_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn rate_limited(provider: &'static str, response: &Response) -> Option<CatalogError> {
    is_rate_limit_status(response.status()).then(|| CatalogError::RateLimited {
        provider,
        retry_after_secs: retry_after(response),
    })
}

fn retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Enforces a minimum interval between consecutive calls.
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the next request is allowed.
    pub fn wait(&self) {
        let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::trace!("Rate limiting: waiting {:?}", wait_time);
                std::thread::sleep(wait_time);
            }
        }
        *last = Some(Instant::now());
    }
}

/// Provider paired with its limiter.
pub struct ThrottledProvider {
    provider: Box<dyn CatalogProvider>,
    limiter: RateLimiter,
}

impl ThrottledProvider {
    /// `interval` overrides the provider's own minimum when given.
    pub fn new(provider: Box<dyn CatalogProvider>, interval: Option<Duration>) -> Self {
        let min_interval = interval.unwrap_or_else(|| provider.min_interval());
        Self {
            provider,
            limiter: RateLimiter::new(min_interval),
        }
    }

    pub fn name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn query_phrasings(&self, artist: &str, title: &str) -> Vec<String> {
        self.provider.query_phrasings(artist, title)
    }

    pub fn search(&self, query: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        self.limiter.wait();
        tracing::debug!(provider = self.provider.name(), query = %query, "Catalog search");
        self.provider.search(query)
    }
}

// ============================================================================
// Spotify
// ============================================================================

#[derive(Debug, Deserialize)]
struct SpotifyToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifySearchResponse {
    tracks: SpotifyPage,
}

#[derive(Debug, Deserialize)]
struct SpotifyPage {
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: String,
    name: String,
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    external_ids: Option<SpotifyExternalIds>,
    external_urls: Option<SpotifyExternalUrls>,
    duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyExternalUrls {
    spotify: Option<String>,
}

impl From<SpotifyTrack> for CatalogTrack {
    fn from(t: SpotifyTrack) -> Self {
        let (album, release_date) = match t.album {
            Some(a) => (Some(a.name), a.release_date),
            None => (None, None),
        };
        CatalogTrack {
            provider_id: t.id,
            title: t.name,
            artists: t.artists.into_iter().map(|a| a.name).collect(),
            album,
            release_date,
            isrc: t.external_ids.and_then(|e| e.isrc),
            url: t.external_urls.and_then(|u| u.spotify),
            duration_ms: t.duration_ms,
        }
    }
}

/// Spotify Web API search with client-credentials auth.
pub struct SpotifyCatalog {
    http: Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<(String, Instant)>>,
}

impl SpotifyCatalog {
    pub fn new(client_id: String, client_secret: String) -> Result<Self, CatalogError> {
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return Err(CatalogError::Auth("missing Spotify client credentials".to_string()));
        }
        Ok(Self {
            http: http_client()?,
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    fn access_token(&self) -> Result<String, CatalogError> {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((value, expires_at)) = token.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(value.clone());
            }
        }

        let response = self
            .http
            .post(SPOTIFY_TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Auth(format!("token request failed ({}): {}", status, body)));
        }

        let fresh: SpotifyToken = response.json()?;
        // Refresh a minute early
        let lifetime = Duration::from_secs(fresh.expires_in.saturating_sub(60));
        *token = Some((fresh.access_token.clone(), Instant::now() + lifetime));
        Ok(fresh.access_token)
    }

    fn clear_token(&self) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl CatalogProvider for SpotifyCatalog {
    fn name(&self) -> &'static str {
        "spotify"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(SPOTIFY_MIN_INTERVAL_MS)
    }

    fn query_phrasings(&self, artist: &str, title: &str) -> Vec<String> {
        vec![
            format!(
                "track:\"{}\" artist:\"{}\"",
                quoted(&strip_parenthetical(title)),
                quoted(artist)
            ),
            free_text_query(artist, title),
        ]
    }

    fn search(&self, query: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        let token = self.access_token()?;
        let response = self
            .http
            .get(SPOTIFY_SEARCH_URL)
            .bearer_auth(token)
            .query(&[("q", query), ("type", "track"), ("limit", SEARCH_LIMIT)])
            .send()?;

        if let Some(e) = rate_limited("spotify", &response) {
            return Err(e);
        }
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.clear_token();
            return Err(CatalogError::Auth("access token rejected".to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Api(status.as_u16(), body));
        }

        let page: SpotifySearchResponse = response.json()?;
        Ok(page.tracks.items.into_iter().map(CatalogTrack::from).collect())
    }
}

// ============================================================================
// Deezer
// ============================================================================

#[derive(Debug, Deserialize)]
struct DeezerResponse {
    #[serde(default)]
    data: Vec<DeezerTrack>,
    error: Option<DeezerError>,
}

#[derive(Debug, Deserialize)]
struct DeezerError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DeezerTrack {
    id: u64,
    title: String,
    link: Option<String>,
    /// Seconds
    duration: Option<u64>,
    isrc: Option<String>,
    artist: DeezerArtist,
    album: Option<DeezerAlbum>,
}

#[derive(Debug, Deserialize)]
struct DeezerArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DeezerAlbum {
    title: String,
}

impl From<DeezerTrack> for CatalogTrack {
    fn from(t: DeezerTrack) -> Self {
        CatalogTrack {
            provider_id: t.id.to_string(),
            title: t.title,
            artists: vec![t.artist.name],
            album: t.album.map(|a| a.title),
            release_date: None,
            isrc: t.isrc,
            url: t.link,
            duration_ms: t.duration.map(|s| s * 1000),
        }
    }
}

fn parse_deezer(body: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
    let parsed: DeezerResponse =
        serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))?;
    if let Some(err) = parsed.error {
        if err.code == DEEZER_QUOTA_ERROR_CODE {
            return Err(CatalogError::RateLimited {
                provider: "deezer",
                retry_after_secs: None,
            });
        }
        return Err(CatalogError::Api(200, format!("{} ({})", err.message, err.code)));
    }
    Ok(parsed.data.into_iter().map(CatalogTrack::from).collect())
}

/// Deezer public search. No credentials needed.
pub struct DeezerCatalog {
    http: Client,
}

impl DeezerCatalog {
    pub fn new() -> Result<Self, CatalogError> {
        Ok(Self { http: http_client()? })
    }
}

impl CatalogProvider for DeezerCatalog {
    fn name(&self) -> &'static str {
        "deezer"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(DEEZER_MIN_INTERVAL_MS)
    }

    fn query_phrasings(&self, artist: &str, title: &str) -> Vec<String> {
        vec![
            format!(
                "artist:\"{}\" track:\"{}\"",
                quoted(artist),
                quoted(&strip_parenthetical(title))
            ),
            free_text_query(artist, title),
        ]
    }

    fn search(&self, query: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        let response = self
            .http
            .get(DEEZER_SEARCH_URL)
            .query(&[("q", query), ("limit", SEARCH_LIMIT)])
            .send()?;

        if let Some(e) = rate_limited("deezer", &response) {
            return Err(e);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Api(status.as_u16(), body));
        }

        parse_deezer(&response.text()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait();
        assert!(start.elapsed() < Duration::from_millis(50));
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_rate_limit_statuses() {
        assert!(is_rate_limit_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_rate_limit_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_rate_limit_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_rate_limit_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_free_text_query_flattens_brackets() {
        assert_eq!(
            free_text_query("Fisher", "Losing It  (Chris Stussy Remix)"),
            "Fisher Losing It Chris Stussy Remix"
        );
    }

    #[test]
    fn test_deezer_phrasings() {
        let deezer = DeezerCatalog::new().unwrap();
        let q = deezer.query_phrasings("Fisher", "Losing \"It\" (Extended Mix)");
        assert_eq!(q[0], "artist:\"Fisher\" track:\"Losing It\"");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_spotify_requires_credentials() {
        assert!(matches!(
            SpotifyCatalog::new(String::new(), "x".to_string()),
            Err(CatalogError::Auth(_))
        ));
    }

    #[test]
    fn test_parse_deezer_results() {
        let body = r#"{"data":[{"id":3135556,"title":"Losing It","link":"https://www.deezer.com/track/3135556",
            "duration":246,"artist":{"name":"FISHER"},"album":{"title":"Losing It"}}],"total":1}"#;
        let tracks = parse_deezer(body).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].provider_id, "3135556");
        assert_eq!(tracks[0].artists, vec!["FISHER".to_string()]);
        assert_eq!(tracks[0].duration_ms, Some(246_000));
    }

    #[test]
    fn test_parse_deezer_quota_is_rate_limit() {
        let body = r#"{"error":{"type":"Exception","message":"Quota limit exceeded","code":4}}"#;
        assert!(parse_deezer(body).unwrap_err().is_rate_limit());
        let other = r#"{"error":{"type":"DataException","message":"no data","code":800}}"#;
        assert!(matches!(parse_deezer(other), Err(CatalogError::Api(200, _))));
    }

    #[test]
    fn test_catalog_fields_are_prefixed() {
        let track = CatalogTrack {
            provider_id: "abc".to_string(),
            title: "Losing It".to_string(),
            artists: vec!["FISHER".to_string()],
            album: None,
            release_date: Some("2018-07-13".to_string()),
            isrc: None,
            url: Some("https://open.spotify.com/track/abc".to_string()),
            duration_ms: Some(246_000),
        };
        let fields = track.catalog_fields("spotify", MatchTier::Exact);
        assert_eq!(fields["spotify_id"], json!("abc"));
        assert_eq!(fields["spotify_match_tier"], json!("exact"));
        assert!(!fields.contains_key("spotify_album"));
        assert!(!fields.contains_key("spotify_isrc"));
    }
}
