//! Durable reverse-geocode cache stored in the analytical store.
//!
//! Keeps the decoded response of every successful lookup keyed by the
//! six-decimal coordinate strings sent on the wire. The table survives
//! [`crate::destination::TripSink::reset_schema`] and is written to while
//! enrichment is still running, so a run that dies part way does not repeat
//! the geocode calls it already made.

use async_trait::async_trait;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use taxi_etl_trip_models::PlaceDescription;

use crate::DbError;

/// A cached lookup: `((lat_key, lon_key), place)`.
pub type CacheEntry = ((String, String), PlaceDescription);

/// Maximum number of parameters `PostgreSQL` allows per statement.
pub const PG_MAX_PARAMS: usize = 65_535;

const PARAMS_PER_ROW: usize = 3;

const CREATE_CACHE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS reverse_geocode_cache (
    lat_key TEXT NOT NULL,
    lon_key TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (lat_key, lon_key)
)";

/// Creates the cache table if it does not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the statement fails.
pub async fn ensure_table(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw(CREATE_CACHE_TABLE_SQL).await?;
    Ok(())
}

/// Reads every cached lookup.
///
/// Rows whose stored response no longer decodes are skipped with a
/// warning; they will be looked up again.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn load_entries(db: &dyn Database) -> Result<Vec<CacheEntry>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT lat_key, lon_key, response FROM reverse_geocode_cache",
            &[],
        )
        .await?;

    let mut entries = Vec::with_capacity(rows.len());

    for row in &rows {
        let lat_key: String = row.to_value("lat_key").unwrap_or_default();
        let lon_key: String = row.to_value("lon_key").unwrap_or_default();
        let response: String = row.to_value("response").unwrap_or_default();

        match serde_json::from_str::<PlaceDescription>(&response) {
            Ok(place) => entries.push(((lat_key, lon_key), place)),
            Err(e) => log::warn!("Skipping unreadable cache entry ({lat_key}, {lon_key}): {e}"),
        }
    }

    log::info!("Loaded {} cached reverse-geocode results", entries.len());

    Ok(entries)
}

/// Writes cache entries, leaving existing keys untouched.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or an insert fails.
pub async fn store_entries(db: &dyn Database, entries: &[CacheEntry]) -> Result<u64, DbError> {
    let mut written = 0u64;

    for chunk in entries.chunks(PG_MAX_PARAMS / PARAMS_PER_ROW) {
        let (sql, params) = build_insert(chunk)?;
        written += db.exec_raw_params(&sql, &params).await?;
    }

    Ok(written)
}

/// Where newly learned lookups are written during a run.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Writes `entries`, leaving existing keys untouched. Returns the number
    /// of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the entries cannot be written.
    async fn store(&self, entries: &[CacheEntry]) -> Result<u64, DbError>;
}

/// [`CacheStore`] backed by the `reverse_geocode_cache` table.
pub struct PostgresCacheStore<'a> {
    db: &'a dyn Database,
}

impl<'a> PostgresCacheStore<'a> {
    #[must_use]
    pub const fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheStore for PostgresCacheStore<'_> {
    async fn store(&self, entries: &[CacheEntry]) -> Result<u64, DbError> {
        store_entries(self.db, entries).await
    }
}

/// Builds one multi-row `INSERT … ON CONFLICT DO NOTHING` for `chunk`.
fn build_insert(chunk: &[CacheEntry]) -> Result<(String, Vec<DatabaseValue>), DbError> {
    let mut sql =
        String::from("INSERT INTO reverse_geocode_cache (lat_key, lon_key, response) VALUES ");
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(chunk.len() * PARAMS_PER_ROW);
    let mut idx = 1usize;

    for (i, ((lat_key, lon_key), place)) in chunk.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!("(${idx}, ${}, ${})", idx + 1, idx + 2));
        params.push(DatabaseValue::String(lat_key.clone()));
        params.push(DatabaseValue::String(lon_key.clone()));
        params.push(DatabaseValue::String(serde_json::to_string(place)?));
        idx += PARAMS_PER_ROW;
    }

    sql.push_str(" ON CONFLICT (lat_key, lon_key) DO NOTHING");
    Ok((sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lat: &str, lon: &str, name: &str) -> CacheEntry {
        (
            (lat.to_string(), lon.to_string()),
            PlaceDescription {
                display_name: name.to_string(),
                ..PlaceDescription::default()
            },
        )
    }

    #[test]
    fn builds_numbered_multi_row_insert() {
        let chunk = vec![
            entry("41.974200", "-87.907300", "O'Hare"),
            entry("41.786000", "-87.752000", "Midway"),
        ];
        let (sql, params) = build_insert(&chunk).unwrap();

        assert!(sql.contains("($1, $2, $3), ($4, $5, $6)"));
        assert!(sql.ends_with("ON CONFLICT (lat_key, lon_key) DO NOTHING"));
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn stored_response_round_trips_through_json() {
        let chunk = vec![entry("41.974200", "-87.907300", "O'Hare")];
        let (_, params) = build_insert(&chunk).unwrap();

        let DatabaseValue::String(json) = &params[2] else {
            panic!("response param is not a string");
        };
        let place: PlaceDescription = serde_json::from_str(json).unwrap();
        assert_eq!(place.display_name, "O'Hare");
    }
}
