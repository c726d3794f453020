#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reverse geocoding for taxi trip coordinates.
//!
//! Resolves a latitude/longitude pair to a [`PlaceDescription`] through the
//! [`ReverseGeocoder`] capability:
//!
//! 1. [`nominatim::NominatimClient`] talks to a Nominatim `/reverse`
//!    endpoint, one HTTP round trip per lookup, with an explicit timeout
//!    and [`retry`] backoff around each call.
//! 2. [`cache::CachingGeocoder`] wraps any geocoder and memoizes successful
//!    lookups by coordinate, so repeated pickup/dropoff centroids only hit
//!    the network once.

pub mod cache;
pub mod nominatim;
pub mod retry;

#[cfg(test)]
mod test_server;

use async_trait::async_trait;
use taxi_etl_trip_models::PlaceDescription;
use thiserror::Error;

/// Errors from a single reverse-geocode lookup.
///
/// Both variants are recoverable from the pipeline's point of view: the
/// affected trip continues with degraded enrichment.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The service could not be reached or the response could not be read.
    #[error("Geocode service unavailable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body is not a place description.
    #[error("Geocode decode error: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },
}

/// One answer from a geocoding service.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub place: PlaceDescription,
    /// `false` when the service answered with a non-success status and
    /// `place` was decoded from an error body. Such answers say nothing
    /// about the coordinate and must not be memoized.
    pub definitive: bool,
}

impl Lookup {
    /// A successful answer.
    #[must_use]
    pub const fn definitive(place: PlaceDescription) -> Self {
        Self {
            place,
            definitive: true,
        }
    }
}

/// Capability that resolves a coordinate pair to a place description.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Looks up the place at (`latitude`, `longitude`).
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the service is unreachable or its
    /// response cannot be decoded.
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<PlaceDescription, GeocodeError>;

    /// Like [`Self::reverse`], also reporting whether the answer is
    /// definitive. Geocoders without a notion of soft failures report every
    /// answer as definitive.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the service is unreachable or its
    /// response cannot be decoded.
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<Lookup, GeocodeError> {
        self.reverse(latitude, longitude)
            .await
            .map(Lookup::definitive)
    }
}

/// Renders a coordinate with the fixed six-decimal precision used on the
/// wire and as the cache key.
#[must_use]
pub fn format_coordinate(value: f64) -> String {
    format!("{value:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_six_decimals() {
        assert_eq!(format_coordinate(41.9742), "41.974200");
        assert_eq!(format_coordinate(-87.907_312_345), "-87.907312");
        assert_eq!(format_coordinate(0.0), "0.000000");
    }
}
