#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch driver for the airport taxi trip pipeline.
//!
//! One [`run`] performs a full refresh:
//!
//! 1. extract every trip from the operational store (`DL*` settings)
//! 2. connect to the analytical store (`DM*` settings) and warm the
//!    reverse-geocode cache from it
//! 3. keep only trips whose pickup reverse geocodes to a recognized airport
//! 4. attach each kept trip's dropoff postal code
//! 5. reset (or, with `reset = false`, ensure) the destination table
//! 6. insert the trips idempotently
//!
//! New reverse-geocode results are written back to the cache table while
//! steps 3 and 4 run and again before step 5.
//!
//! Connection, extraction and schema failures abort the run. Individual
//! lookup, parse and insert failures are logged, counted in the returned
//! [`RunSummary`] and skipped.

use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use taxi_etl_database::DbError;
use taxi_etl_database::db::{self, DESTINATION_PREFIX, DbConfig, SOURCE_PREFIX};
use taxi_etl_database::destination::{self, PostgresTripSink, TripSink};
use taxi_etl_database::geocode_cache::{self, CacheStore, PostgresCacheStore};
use taxi_etl_database::source;
use taxi_etl_enrich::classifier::{AirportMatchSet, ClassifierError, PlaceClassifier};
use taxi_etl_enrich::{EnrichOptions, enrich};
use taxi_etl_geocoder::cache::CachingGeocoder;
use taxi_etl_geocoder::nominatim::{NominatimClient, NominatimConfig};
use taxi_etl_geocoder::{GeocodeError, ReverseGeocoder};
use taxi_etl_trip_models::progress::{ProgressCallback, null_progress};
use taxi_etl_trip_models::{RunSummary, TripRecord};
use thiserror::Error;
use tokio::time::MissedTickBehavior;

/// Env var overriding the reverse-geocode endpoint.
pub const GEOCODER_URL_VAR: &str = "GEOCODER_URL";

/// Env var overriding the `User-Agent` sent to the geocoder.
pub const GEOCODER_USER_AGENT_VAR: &str = "GEOCODER_USER_AGENT";

/// Default period between cache flushes during enrichment.
pub const DEFAULT_CACHE_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Connecting, extracting, resetting the schema or another store
    /// operation failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The airport match set could not be loaded.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// The geocoder client could not be built.
    #[error(transparent)]
    Geocoder(#[from] GeocodeError),
}

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Operational store holding `taxi_trips`.
    pub source: DbConfig,
    /// Analytical store receiving the airport trips.
    pub destination: DbConfig,
    pub geocoder: NominatimConfig,
    /// Maximum reverse-geocode requests in flight.
    pub concurrency: usize,
    /// Drop and recreate the destination table before loading.
    pub reset: bool,
    /// Persist lookups in `reverse_geocode_cache` across runs.
    pub geocode_cache: bool,
    /// Replacement airport match set; the built-in set when `None`.
    pub airports: Option<PathBuf>,
    /// Process only the first `limit` extracted trips.
    pub limit: Option<usize>,
    /// How often new lookups are flushed to the cache table while enriching.
    pub cache_flush_interval: Duration,
}

impl PipelineConfig {
    /// Builds a config with default tuning from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Database`] if either store's connection
    /// settings are incomplete.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config with default tuning, reading variables through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Database`] if either store's connection
    /// settings are incomplete.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let source = DbConfig::from_lookup(SOURCE_PREFIX, &lookup)?;
        let destination = DbConfig::from_lookup(DESTINATION_PREFIX, &lookup)?;

        let mut geocoder = NominatimConfig::default();
        if let Some(url) = lookup(GEOCODER_URL_VAR).filter(|v| !v.is_empty()) {
            geocoder.base_url = url;
        }
        if let Some(agent) = lookup(GEOCODER_USER_AGENT_VAR).filter(|v| !v.is_empty()) {
            geocoder.user_agent = agent;
        }

        Ok(Self {
            source,
            destination,
            geocoder,
            concurrency: 1,
            reset: true,
            geocode_cache: true,
            airports: None,
            limit: None,
            cache_flush_interval: DEFAULT_CACHE_FLUSH_INTERVAL,
        })
    }

    /// Sets the number of retries after a failed lookup.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.geocoder.retry.max_retries = max_retries;
        self
    }

    /// Sets the per-request geocoder timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.geocoder.timeout = timeout;
        self
    }
}

/// Progress hooks for the three per-trip stages.
#[derive(Clone)]
pub struct StageProgress {
    pub pickups: Arc<dyn ProgressCallback>,
    pub dropoffs: Arc<dyn ProgressCallback>,
    pub load: Arc<dyn ProgressCallback>,
}

impl Default for StageProgress {
    fn default() -> Self {
        Self {
            pickups: null_progress(),
            dropoffs: null_progress(),
            load: null_progress(),
        }
    }
}

/// Runs one full extract, enrich and load cycle.
///
/// # Errors
///
/// Returns [`PipelineError`] if the match set or geocoder cannot be set up,
/// either store cannot be reached, extraction fails, or the destination
/// schema cannot be prepared.
pub async fn run(
    config: &PipelineConfig,
    progress: &StageProgress,
) -> Result<RunSummary, PipelineError> {
    let classifier = match &config.airports {
        Some(path) => AirportMatchSet::from_path(path)?,
        None => AirportMatchSet::builtin(),
    };
    let client = NominatimClient::new(config.geocoder.clone())?;

    log::info!("Connecting to source {:?}", config.source);
    let mut trips = {
        let source_db = db::connect(&config.source).await?;
        source::extract_trips(source_db.as_ref()).await?
    };
    if let Some(limit) = config.limit
        && trips.len() > limit
    {
        log::info!("Limiting run to the first {limit} of {} trips", trips.len());
        trips.truncate(limit);
    }

    log::info!("Connecting to destination {:?}", config.destination);
    let destination_db = db::connect(&config.destination).await?;

    let seeded = if config.geocode_cache {
        warm_cache(destination_db.as_ref()).await
    } else {
        Vec::new()
    };
    let geocoder = CachingGeocoder::with_entries(client, seeded);

    let sink = PostgresTripSink::new(destination_db.as_ref());
    let cache_store = PostgresCacheStore::new(destination_db.as_ref());
    let options = RunOptions {
        reset: config.reset,
        concurrency: config.concurrency,
        cache_flush_interval: config.cache_flush_interval,
    };
    let summary = enrich_and_load(
        trips,
        &geocoder,
        &classifier,
        &sink,
        config
            .geocode_cache
            .then_some(&cache_store as &dyn CacheStore),
        &options,
        progress,
    )
    .await?;

    log_summary(&summary);

    Ok(summary)
}

/// Reads persisted lookups, falling back to a cold cache on failure.
async fn warm_cache(db: &dyn switchy_database::Database) -> Vec<geocode_cache::CacheEntry> {
    if let Err(e) = geocode_cache::ensure_table(db).await {
        log::warn!("Reverse-geocode cache unavailable, continuing without it: {e}");
        return Vec::new();
    }

    geocode_cache::load_entries(db).await.unwrap_or_else(|e| {
        log::warn!("Failed to read reverse-geocode cache, continuing without it: {e}");
        Vec::new()
    })
}

/// Per-run switches for [`enrich_and_load`].
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Drop and recreate the destination table instead of ensuring it.
    pub reset: bool,
    /// Maximum reverse-geocode requests in flight.
    pub concurrency: usize,
    /// How often lookups learned so far are written to the cache store.
    pub cache_flush_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reset: true,
            concurrency: 1,
            cache_flush_interval: DEFAULT_CACHE_FLUSH_INTERVAL,
        }
    }
}

/// Enriches `trips` and loads the retained ones into `sink`.
///
/// While enrichment runs, lookups learned so far are flushed to `cache`
/// every [`RunOptions::cache_flush_interval`], and once more before the
/// destination table is touched, so neither a schema failure nor a crash
/// part way through costs the geocode calls already made.
///
/// The table is prepared only after enrichment finishes, so a run that dies
/// while geocoding leaves the previously loaded rows in place.
///
/// # Errors
///
/// Returns [`PipelineError::Database`] if the schema cannot be reset or
/// ensured.
pub async fn enrich_and_load<G: ReverseGeocoder>(
    trips: Vec<TripRecord>,
    geocoder: &CachingGeocoder<G>,
    classifier: &dyn PlaceClassifier,
    sink: &dyn TripSink,
    cache: Option<&dyn CacheStore>,
    options: &RunOptions,
    progress: &StageProgress,
) -> Result<RunSummary, PipelineError> {
    let enrich_options = EnrichOptions {
        concurrency: options.concurrency,
        pickup_progress: progress.pickups.clone(),
        dropoff_progress: progress.dropoffs.clone(),
    };

    let enriched = {
        let mut enrichment = pin!(enrich(trips, geocoder, classifier, &enrich_options));
        let mut ticker =
            tokio::time::interval(options.cache_flush_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                enriched = &mut enrichment => break enriched,
                _ = ticker.tick(), if cache.is_some() => flush_cache(cache, geocoder).await,
            }
        }
    };
    flush_cache(cache, geocoder).await;

    log::info!(
        "Geocode cache: {} hits, {} misses, {} entries",
        geocoder.hits(),
        geocoder.misses(),
        geocoder.len()
    );

    if options.reset {
        sink.reset_schema().await?;
    } else {
        sink.ensure_schema().await?;
    }

    let load = destination::load(sink, &enriched.trips, &progress.load).await;

    Ok(RunSummary {
        enrich: enriched.stats,
        load,
    })
}

/// Writes lookups not yet persisted to `cache`. A failed write is logged
/// and retried at the next flush.
async fn flush_cache<G>(cache: Option<&dyn CacheStore>, geocoder: &CachingGeocoder<G>) {
    let Some(store) = cache else {
        return;
    };

    let fresh = geocoder.fresh_entries();
    if fresh.is_empty() {
        return;
    }

    match store.store(&fresh).await {
        Ok(written) => {
            geocoder.mark_persisted(fresh.iter().map(|(key, _)| key));
            log::debug!("Persisted {written} new reverse-geocode results");
        }
        Err(e) => log::warn!(
            "Failed to persist {} reverse-geocode results, will retry: {e}",
            fresh.len()
        ),
    }
}

fn log_summary(summary: &RunSummary) {
    let RunSummary { enrich, load } = summary;

    log::info!(
        "Run complete: extracted={} matched={} inserted={} already_present={} insert_failures={}",
        enrich.extracted,
        enrich.matched,
        load.inserted,
        load.already_present,
        load.failed,
    );

    if enrich.failures() > 0 {
        log::warn!(
            "{} enrichment failures: {} pickup lookups failed, {} dropoff lookups failed, \
             {} postal codes unparsed",
            enrich.failures(),
            enrich.pickup_lookup_failures,
            enrich.dropoff_lookup_failures,
            enrich.postal_code_parse_failures,
        );
    }
}
