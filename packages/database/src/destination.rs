//! Loading enriched trips into the analytical store.
//!
//! Rows are keyed by trip id and inserted with `ON CONFLICT DO NOTHING`, so
//! a trip that is already recorded is never overwritten and re-running a
//! load only fills in missing ids. [`TripSink::reset_schema`] is the
//! destructive counterpart: it drops and recreates the table before a full
//! refresh.

use std::sync::Arc;

use async_trait::async_trait;
use switchy_database::{Database, DatabaseValue};
use taxi_etl_trip_models::progress::ProgressCallback;
use taxi_etl_trip_models::{LoadStats, TripRecord};

use crate::DbError;

/// Destination table for airport pickups.
pub const TRIPS_TABLE: &str = "requirement_2_airport_trips";

const DROP_TABLE_SQL: &str = "DROP TABLE IF EXISTS requirement_2_airport_trips";

const CREATE_TABLE_SQL: &str = "CREATE TABLE requirement_2_airport_trips (
    TripID               TEXT PRIMARY KEY,
    TaxiID               TEXT,
    TripStartTimestamp   TIMESTAMPTZ,
    PickupLatitude       FLOAT,
    PickupLongitude      FLOAT,
    PickupLocationName   TEXT,
    DropoffLatitude      FLOAT,
    DropoffLongitude     FLOAT,
    DropoffZipCode       INTEGER
)";

const CREATE_TABLE_IF_MISSING_SQL: &str = "CREATE TABLE IF NOT EXISTS requirement_2_airport_trips (
    TripID               TEXT PRIMARY KEY,
    TaxiID               TEXT,
    TripStartTimestamp   TIMESTAMPTZ,
    PickupLatitude       FLOAT,
    PickupLongitude      FLOAT,
    PickupLocationName   TEXT,
    DropoffLatitude      FLOAT,
    DropoffLongitude     FLOAT,
    DropoffZipCode       INTEGER
)";

const INSERT_TRIP_SQL: &str = "INSERT INTO requirement_2_airport_trips (
        TripID, TaxiID, TripStartTimestamp, PickupLatitude, PickupLongitude,
        PickupLocationName, DropoffLatitude, DropoffLongitude, DropoffZipCode
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (TripID) DO NOTHING";

/// Where enriched trips are persisted.
#[async_trait]
pub trait TripSink: Send + Sync {
    /// Drops and recreates the trips table. Destroys all recorded trips.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SchemaReset`] if either statement fails.
    async fn reset_schema(&self) -> Result<(), DbError>;

    /// Creates the trips table if it does not exist, keeping recorded trips.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    async fn ensure_schema(&self) -> Result<(), DbError>;

    /// Inserts one trip unless its id is already recorded.
    ///
    /// Returns `true` if a row was written and `false` if the id existed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    async fn insert_trip(&self, trip: &TripRecord) -> Result<bool, DbError>;
}

/// [`TripSink`] backed by the analytical `PostgreSQL` store.
pub struct PostgresTripSink<'a> {
    db: &'a dyn Database,
}

impl<'a> PostgresTripSink<'a> {
    #[must_use]
    pub const fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TripSink for PostgresTripSink<'_> {
    async fn reset_schema(&self) -> Result<(), DbError> {
        log::warn!("Dropping and recreating {TRIPS_TABLE}");

        self.db
            .exec_raw(DROP_TABLE_SQL)
            .await
            .map_err(|source| DbError::SchemaReset {
                statement: "DROP TABLE",
                source,
            })?;

        self.db
            .exec_raw(CREATE_TABLE_SQL)
            .await
            .map_err(|source| DbError::SchemaReset {
                statement: "CREATE TABLE",
                source,
            })?;

        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), DbError> {
        self.db.exec_raw(CREATE_TABLE_IF_MISSING_SQL).await?;
        Ok(())
    }

    async fn insert_trip(&self, trip: &TripRecord) -> Result<bool, DbError> {
        let affected = self
            .db
            .exec_raw_params(INSERT_TRIP_SQL, &trip_params(trip))
            .await?;
        Ok(affected > 0)
    }
}

/// Positional parameters for [`INSERT_TRIP_SQL`].
fn trip_params(trip: &TripRecord) -> Vec<DatabaseValue> {
    vec![
        DatabaseValue::String(trip.trip_id.clone()),
        DatabaseValue::String(trip.taxi_id.clone()),
        trip.trip_start_timestamp
            .map_or(DatabaseValue::Null, DatabaseValue::DateTime),
        DatabaseValue::Real64(trip.pickup_latitude),
        DatabaseValue::Real64(trip.pickup_longitude),
        trip.pickup_location_name
            .as_ref()
            .map_or(DatabaseValue::Null, |name| DatabaseValue::String(name.clone())),
        DatabaseValue::Real64(trip.dropoff_latitude),
        DatabaseValue::Real64(trip.dropoff_longitude),
        DatabaseValue::Int32(trip.dropoff_zip_code),
    ]
}

/// Inserts every trip, one row at a time.
///
/// A failed row is logged with its trip id and counted; the remaining rows
/// are still attempted.
pub async fn load(
    sink: &dyn TripSink,
    trips: &[TripRecord],
    progress: &Arc<dyn ProgressCallback>,
) -> LoadStats {
    let mut stats = LoadStats::default();
    progress.set_total(trips.len() as u64);

    for trip in trips {
        match sink.insert_trip(trip).await {
            Ok(true) => stats.inserted += 1,
            Ok(false) => {
                log::debug!("Trip {} already recorded, skipping", trip.trip_id);
                stats.already_present += 1;
            }
            Err(e) => {
                log::error!("Error inserting record, trip_id = {}: {e}", trip.trip_id);
                stats.failed += 1;
            }
        }
        progress.inc(1);
    }

    progress.finish(format!(
        "Loaded {} trips ({} already present, {} failed)",
        stats.inserted, stats.already_present, stats.failed
    ));

    stats
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    use taxi_etl_trip_models::progress::null_progress;

    use super::*;

    /// Keyed in-memory table with do-nothing conflict handling. Ids listed in
    /// `failing` make the insert error out.
    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<BTreeMap<String, TripRecord>>,
        failing: BTreeSet<String>,
    }

    impl MemorySink {
        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TripSink for MemorySink {
        async fn reset_schema(&self) -> Result<(), DbError> {
            self.rows.lock().unwrap().clear();
            Ok(())
        }

        async fn ensure_schema(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn insert_trip(&self, trip: &TripRecord) -> Result<bool, DbError> {
            if self.failing.contains(&trip.trip_id) {
                return Err(DbError::Connection {
                    message: "connection reset".to_string(),
                });
            }
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(&trip.trip_id) {
                return Ok(false);
            }
            rows.insert(trip.trip_id.clone(), trip.clone());
            Ok(true)
        }
    }

    fn trip(id: &str, zip: i32) -> TripRecord {
        TripRecord {
            trip_id: id.to_string(),
            taxi_id: "TX".to_string(),
            trip_start_timestamp: None,
            pickup_latitude: 41.9742,
            pickup_longitude: -87.9073,
            dropoff_latitude: 41.88,
            dropoff_longitude: -87.63,
            pickup_location_name: Some("Airport".to_string()),
            dropoff_zip_code: zip,
        }
    }

    #[tokio::test]
    async fn loading_twice_does_not_duplicate_rows() {
        let sink = MemorySink::default();
        let trips = vec![trip("T1", 60666), trip("T2", 60638)];

        let first = load(&sink, &trips, &null_progress()).await;
        let count_after_first = sink.row_count();
        let second = load(&sink, &trips, &null_progress()).await;

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_present, 2);
        assert_eq!(second.failed, 0);
        assert_eq!(sink.row_count(), count_after_first);
    }

    #[tokio::test]
    async fn existing_rows_are_never_overwritten() {
        let sink = MemorySink::default();
        load(&sink, &[trip("T1", 60666)], &null_progress()).await;
        load(&sink, &[trip("T1", 11111), trip("T3", 60601)], &null_progress()).await;

        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows["T1"].dropoff_zip_code, 60666);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn failed_row_does_not_stop_the_load() {
        let sink = MemorySink {
            failing: BTreeSet::from(["T2".to_string()]),
            ..MemorySink::default()
        };
        let trips = vec![trip("T1", 1), trip("T2", 2), trip("T3", 3)];

        let stats = load(&sink, &trips, &null_progress()).await;

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(sink.row_count(), 2);
    }

    #[tokio::test]
    async fn reset_then_empty_load_leaves_empty_table() {
        let sink = MemorySink::default();
        load(&sink, &[trip("T1", 1)], &null_progress()).await;

        sink.reset_schema().await.unwrap();
        let stats = load(&sink, &[], &null_progress()).await;

        assert_eq!(stats, LoadStats::default());
        assert_eq!(sink.row_count(), 0);
    }

    #[test]
    fn params_follow_column_order() {
        let mut record = trip("T1", 60666);
        record.pickup_location_name = None;
        let params = trip_params(&record);

        assert_eq!(params.len(), 9);
        assert!(matches!(&params[0], DatabaseValue::String(id) if id == "T1"));
        assert!(matches!(params[2], DatabaseValue::Null));
        assert!(matches!(params[5], DatabaseValue::Null));
        assert!(matches!(params[8], DatabaseValue::Int32(60666)));
    }
}
