//! Trip extraction from the operational store.
//!
//! The whole `taxi_trips` table is read on every run. All seven projected
//! columns arrive as text and are decoded here:
//!
//! - the trip id is required; a row without one fails the extraction
//! - coordinates that are missing or unparseable become `0.0`
//! - timestamps use the fixed `YYYY-MM-DDTHH:MM:SS.mmm` layout; a value in
//!   any other layout is logged and stored as `NULL`

use chrono::NaiveDateTime;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, Row};
use taxi_etl_trip_models::TripRecord;

use crate::DbError;

/// Fixed projection over the operational trips table.
pub const EXTRACT_TRIPS_SQL: &str = "SELECT TripID, TaxiID, TripStartTimestamp, \
     PickupCentroidLatitude, PickupCentroidLongitude, \
     DropoffCentroidLatitude, DropoffCentroidLongitude \
     FROM taxi_trips";

/// Layout of `TripStartTimestamp` values, e.g. `2023-01-01T00:00:00.000`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Text columns of one extracted row, before decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTripRow {
    pub trip_id: Option<String>,
    pub taxi_id: Option<String>,
    pub trip_start_timestamp: Option<String>,
    pub pickup_latitude: Option<String>,
    pub pickup_longitude: Option<String>,
    pub dropoff_latitude: Option<String>,
    pub dropoff_longitude: Option<String>,
}

/// Reads every trip from the operational store, in query order.
///
/// # Errors
///
/// Returns [`DbError::Extraction`] if the query fails or any row cannot be
/// decoded.
pub async fn extract_trips(db: &dyn Database) -> Result<Vec<TripRecord>, DbError> {
    let rows = db
        .query_raw_params(EXTRACT_TRIPS_SQL, &[])
        .await
        .map_err(|e| DbError::Extraction {
            message: format!("trip query failed: {e}"),
        })?;

    log::info!("Extracted {} trip rows", rows.len());

    rows.iter()
        .map(|row| read_row(row).and_then(decode_trip))
        .collect()
}

fn read_row(row: &Row) -> Result<RawTripRow, DbError> {
    let column = |name: &str| -> Result<Option<String>, DbError> {
        row.to_value(name).map_err(|e| DbError::Extraction {
            message: format!("failed to read column {name}: {e}"),
        })
    };

    // Unquoted identifiers come back lower-cased from PostgreSQL.
    Ok(RawTripRow {
        trip_id: column("tripid")?,
        taxi_id: column("taxiid")?,
        trip_start_timestamp: column("tripstarttimestamp")?,
        pickup_latitude: column("pickupcentroidlatitude")?,
        pickup_longitude: column("pickupcentroidlongitude")?,
        dropoff_latitude: column("dropoffcentroidlatitude")?,
        dropoff_longitude: column("dropoffcentroidlongitude")?,
    })
}

/// Decodes the text columns of one row into a [`TripRecord`].
///
/// # Errors
///
/// Returns [`DbError::Extraction`] if the trip id is missing or empty.
pub fn decode_trip(raw: RawTripRow) -> Result<TripRecord, DbError> {
    let trip_id = raw
        .trip_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DbError::Extraction {
            message: "row has no TripID".to_string(),
        })?;

    let trip_start_timestamp = raw.trip_start_timestamp.as_deref().and_then(|value| {
        let parsed = parse_timestamp(value);
        if parsed.is_none() {
            log::warn!("Trip {trip_id}: unparseable TripStartTimestamp {value:?}");
        }
        parsed
    });

    Ok(TripRecord {
        taxi_id: raw.taxi_id.unwrap_or_default(),
        trip_start_timestamp,
        pickup_latitude: parse_coordinate(raw.pickup_latitude.as_deref()),
        pickup_longitude: parse_coordinate(raw.pickup_longitude.as_deref()),
        dropoff_latitude: parse_coordinate(raw.dropoff_latitude.as_deref()),
        dropoff_longitude: parse_coordinate(raw.dropoff_longitude.as_deref()),
        pickup_location_name: None,
        dropoff_zip_code: 0,
        trip_id,
    })
}

/// Parses a [`TIMESTAMP_FORMAT`] value.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
}

/// Parses a coordinate, yielding `0.0` for missing or unparseable input.
#[must_use]
pub fn parse_coordinate(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}
