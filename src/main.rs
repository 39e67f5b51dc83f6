//! `reconcile-unreleased`: confirm "unreleased" tracks against public catalogs.
//!
//! Pages through `unreleased_tracks` in the given SQLite database, queries the
//! selected catalogs for each pending record and flips confirmed ones to
//! released. Lookup outcomes are cached in the same database, so a run halted
//! by a rate limit can simply be restarted.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use setlist_reconcile::catalog::{CatalogProvider, DeezerCatalog, SpotifyCatalog, ThrottledProvider};
use setlist_reconcile::progress::{init_logging, set_log_only};
use setlist_reconcile::reconcile::{interval_override, ReconcileOptions, Reconciler};
use setlist_reconcile::safety::validate_output_path;
use setlist_reconcile::store::SqliteStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Provider {
    Spotify,
    Deezer,
}

#[derive(Parser, Debug)]
#[command(name = "reconcile-unreleased")]
#[command(about = "Confirm unreleased tracks against public music catalogs")]
struct Args {
    /// SQLite database with the unreleased_tracks table
    db: PathBuf,

    /// Run every step without writing records or cache entries
    #[arg(long)]
    dry_run: bool,

    /// Catalog to query, in order (repeatable). Defaults to spotify
    #[arg(long = "provider", value_enum)]
    providers: Vec<Provider>,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value = "500")]
    page_size: usize,

    /// Override every provider's minimum delay between requests
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Days before a not-found lookup is retried
    #[arg(long, default_value = "30")]
    not_found_ttl_days: i64,

    /// Write run counters as JSON to this file
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Hide progress bars and log progress lines instead
    #[arg(long)]
    log_only: bool,

    #[arg(long, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    spotify_client_id: Option<String>,

    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    spotify_client_secret: Option<String>,
}

fn build_providers(args: &Args) -> Result<Vec<ThrottledProvider>> {
    let mut selected = args.providers.clone();
    if selected.is_empty() {
        selected.push(Provider::Spotify);
    }
    selected.dedup();

    let interval = interval_override(args.delay_ms);
    let mut providers = Vec::with_capacity(selected.len());
    for provider in selected {
        let catalog: Box<dyn CatalogProvider> = match provider {
            Provider::Spotify => {
                let (Some(id), Some(secret)) = (&args.spotify_client_id, &args.spotify_client_secret) else {
                    bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set to query Spotify");
                };
                Box::new(SpotifyCatalog::new(id.clone(), secret.clone()).context("Invalid Spotify credentials")?)
            }
            Provider::Deezer => Box::new(DeezerCatalog::new().context("Failed to create Deezer client")?),
        };
        providers.push(ThrottledProvider::new(catalog, interval));
    }
    Ok(providers)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    set_log_only(args.log_only);

    if args.page_size == 0 {
        bail!("--page-size must be at least 1");
    }
    if let Some(stats_path) = &args.stats {
        validate_output_path(stats_path, &[args.db.as_path()])?;
    }

    // Credentials are checked before touching the database
    let providers = build_providers(&args)?;

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;

    let options = ReconcileOptions {
        page_size: args.page_size,
        limit: args.limit,
        dry_run: args.dry_run,
        not_found_ttl: chrono::Duration::days(args.not_found_ttl_days.max(0)),
        ..Default::default()
    };
    if options.dry_run {
        info!("Dry run: no records or cache entries will be written");
    }

    let stats = Reconciler::new(&store, &store, providers, options).run();
    println!("{}", stats.summary());

    if let Some(stats_path) = &args.stats {
        stats
            .write_to_file(stats_path)
            .with_context(|| format!("Failed to write stats to {}", stats_path.display()))?;
        info!(path = %stats_path.display(), "Wrote run stats");
    }

    Ok(())
}
