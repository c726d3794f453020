#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data types for the taxi trip pipeline.
//!
//! A [`TripRecord`] is created once per extracted source row, annotated by
//! the enrichment passes, and handed to the loader. A [`PlaceDescription`]
//! is the transient result of one reverse-geocode lookup.

pub mod progress;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display};

/// One observed taxi trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    /// Natural key, unique across a full source extraction.
    pub trip_id: String,
    /// Vehicle identifier.
    pub taxi_id: String,
    /// Trip start instant (millisecond precision). `None` when the source
    /// value could not be parsed.
    pub trip_start_timestamp: Option<NaiveDateTime>,
    /// Pickup latitude in degrees.
    pub pickup_latitude: f64,
    /// Pickup longitude in degrees.
    pub pickup_longitude: f64,
    /// Dropoff latitude in degrees.
    pub dropoff_latitude: f64,
    /// Dropoff longitude in degrees.
    pub dropoff_longitude: f64,
    /// Geocoded pickup display name. Set by the classification pass for
    /// retained trips only.
    pub pickup_location_name: Option<String>,
    /// Geocoded dropoff postal code. Zero until the postal-code pass sets it,
    /// and zero when that pass could not resolve it.
    pub dropoff_zip_code: i32,
}

impl TripRecord {
    /// Returns the `(latitude, longitude)` pair for the given end of the trip.
    #[must_use]
    pub const fn coordinates(&self, endpoint: TripEndpoint) -> (f64, f64) {
        match endpoint {
            TripEndpoint::Pickup => (self.pickup_latitude, self.pickup_longitude),
            TripEndpoint::Dropoff => (self.dropoff_latitude, self.dropoff_longitude),
        }
    }
}

/// Which end of a trip a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TripEndpoint {
    /// Where the passenger was picked up.
    Pickup,
    /// Where the passenger was dropped off.
    Dropoff,
}

/// Result of one reverse-geocode lookup.
///
/// Every field defaults when absent so that error bodies returned with a
/// non-success status still decode into an empty description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceDescription {
    /// Provider-assigned place identifier.
    #[serde(default)]
    pub place_id: u64,
    /// Category tag (e.g., `"aeroway"`).
    #[serde(default)]
    pub category: String,
    /// Full human-readable place name.
    #[serde(default)]
    pub display_name: String,
    /// Structured address components.
    #[serde(default)]
    pub address: PlaceAddress,
    /// Bounding box as four coordinate strings
    /// (`[min_lat, max_lat, min_lon, max_lon]`).
    #[serde(default, rename = "boundingbox")]
    pub bounding_box: Vec<String>,
}

impl PlaceDescription {
    /// Returns the postal code, or an empty string when the lookup did not
    /// provide one.
    #[must_use]
    pub fn postcode(&self) -> &str {
        self.address.postcode.as_deref().unwrap_or_default()
    }
}

/// Structured address portion of a [`PlaceDescription`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceAddress {
    /// House number. Providers emit it either as a string or a number.
    #[serde(default, deserialize_with = "deserialize_house_number")]
    pub house_number: Option<String>,
    #[serde(default)]
    pub road: Option<String>,
    #[serde(default)]
    pub neighbourhood: Option<String>,
    #[serde(default)]
    pub suburb: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub municipality: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Integer(i64),
    Float(f64),
}

fn deserialize_house_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Integer(n) => n.to_string(),
            StringOrNumber::Float(n) => n.to_string(),
        }),
    )
}

/// Counters collected by the enrichment passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichStats {
    /// Trips handed to the classification pass.
    pub extracted: u64,
    /// Pickup lookups that failed outright (transport or decode).
    pub pickup_lookup_failures: u64,
    /// Trips retained by the classifier.
    pub matched: u64,
    /// Dropoff lookups that failed outright (transport or decode).
    pub dropoff_lookup_failures: u64,
    /// Dropoff postal codes that could not be parsed as integers.
    pub postal_code_parse_failures: u64,
}

impl EnrichStats {
    /// Number of retained trips carrying a zero postal code because of a
    /// failed lookup or an unparseable value.
    #[must_use]
    pub const fn degraded(&self) -> u64 {
        self.dropoff_lookup_failures + self.postal_code_parse_failures
    }

    /// All enrichment failures, including pickups that could not be
    /// classified.
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.pickup_lookup_failures + self.degraded()
    }
}

/// Counters collected while loading trips into the destination store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Rows newly written.
    pub inserted: u64,
    /// Rows skipped because the trip id was already recorded.
    pub already_present: u64,
    /// Rows whose insert failed.
    pub failed: u64,
}

/// Outcome of one end-to-end pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub enrich: EnrichStats,
    pub load: LoadStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_reverse_geocode_body() {
        let body = serde_json::json!({
            "place_id": 1_234_567,
            "category": "aeroway",
            "display_name": "Chicago Midway International Airport, 5700, South Cicero Avenue, Chicago, Illinois, 60638, United States",
            "address": {
                "house_number": "5700",
                "road": "South Cicero Avenue",
                "city": "Chicago",
                "county": "Cook County",
                "postcode": "60638"
            },
            "boundingbox": ["41.77", "41.80", "-87.77", "-87.74"]
        });

        let place: PlaceDescription = serde_json::from_value(body).unwrap();
        assert_eq!(place.place_id, 1_234_567);
        assert_eq!(place.category, "aeroway");
        assert_eq!(place.address.house_number.as_deref(), Some("5700"));
        assert_eq!(place.postcode(), "60638");
        assert_eq!(place.bounding_box.len(), 4);
        assert!(place.address.suburb.is_none());
    }

    #[test]
    fn error_body_decodes_to_empty_description() {
        let body = serde_json::json!({ "error": "Unable to geocode" });
        let place: PlaceDescription = serde_json::from_value(body).unwrap();
        assert_eq!(place, PlaceDescription::default());
        assert_eq!(place.postcode(), "");
    }

    #[test]
    fn numeric_house_number_is_accepted() {
        let body = serde_json::json!({ "address": { "house_number": 10000 } });
        let place: PlaceDescription = serde_json::from_value(body).unwrap();
        assert_eq!(place.address.house_number.as_deref(), Some("10000"));
    }

    #[test]
    fn coordinates_select_trip_endpoint() {
        let trip = TripRecord {
            trip_id: "T1".to_string(),
            taxi_id: "X".to_string(),
            trip_start_timestamp: None,
            pickup_latitude: 41.9742,
            pickup_longitude: -87.9073,
            dropoff_latitude: 41.88,
            dropoff_longitude: -87.63,
            pickup_location_name: None,
            dropoff_zip_code: 0,
        };
        assert_eq!(trip.coordinates(TripEndpoint::Pickup), (41.9742, -87.9073));
        assert_eq!(trip.coordinates(TripEndpoint::Dropoff), (41.88, -87.63));
        assert_eq!(TripEndpoint::Dropoff.as_ref(), "dropoff");
    }

    #[test]
    fn degraded_counts_dropoff_failures() {
        let stats = EnrichStats {
            dropoff_lookup_failures: 2,
            postal_code_parse_failures: 3,
            ..EnrichStats::default()
        };
        assert_eq!(stats.degraded(), 5);
    }

    #[test]
    fn failures_include_pickup_lookups() {
        let stats = EnrichStats {
            pickup_lookup_failures: 4,
            ..EnrichStats::default()
        };
        assert_eq!(stats.degraded(), 0);
        assert_eq!(stats.failures(), 4);
    }
}
