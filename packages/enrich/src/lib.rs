#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reverse-geocode enrichment of extracted taxi trips.
//!
//! Runs two passes over the trips:
//!
//! 1. **Classification pass**: every pickup coordinate is reverse geocoded
//!    and the [`classifier::PlaceClassifier`] decides whether the trip is
//!    kept. Kept trips get their pickup location name; the rest are dropped.
//! 2. **Postal-code pass**: every kept trip's dropoff coordinate is
//!    reverse geocoded and its postal code parsed into the trip.
//!
//! Lookup failures never abort a run. A pickup that cannot be geocoded
//! cannot be classified and is dropped; a dropoff that cannot be geocoded,
//! or whose postal code is not an integer, leaves the postal code at zero.
//! Each such event is logged and counted in [`EnrichStats`].
//!
//! Lookups within a pass run through an order-preserving buffered stream,
//! so output order always equals input order whatever the concurrency.

pub mod classifier;

use std::num::ParseIntError;
use std::sync::Arc;

use futures::stream::{self, StreamExt as _};
use taxi_etl_geocoder::{GeocodeError, ReverseGeocoder};
use taxi_etl_trip_models::progress::{ProgressCallback, null_progress};
use taxi_etl_trip_models::{EnrichStats, PlaceDescription, TripEndpoint, TripRecord};

use crate::classifier::PlaceClassifier;

/// Tuning and reporting hooks for [`enrich`].
#[derive(Clone)]
pub struct EnrichOptions {
    /// Maximum lookups in flight at once. `1` reproduces strictly
    /// sequential behaviour.
    pub concurrency: usize,
    /// Progress for the classification pass.
    pub pickup_progress: Arc<dyn ProgressCallback>,
    /// Progress for the postal-code pass.
    pub dropoff_progress: Arc<dyn ProgressCallback>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            pickup_progress: null_progress(),
            dropoff_progress: null_progress(),
        }
    }
}

/// Output of [`enrich`]: the retained trips and what happened on the way.
#[derive(Debug, Clone)]
pub struct Enriched {
    /// Airport pickups, in extraction order.
    pub trips: Vec<TripRecord>,
    pub stats: EnrichStats,
}

/// Runs the classification pass then the postal-code pass.
pub async fn enrich(
    trips: Vec<TripRecord>,
    geocoder: &dyn ReverseGeocoder,
    classifier: &dyn PlaceClassifier,
    options: &EnrichOptions,
) -> Enriched {
    let mut stats = EnrichStats {
        extracted: trips.len() as u64,
        ..EnrichStats::default()
    };

    let mut retained = classify_pickups(trips, geocoder, classifier, options, &mut stats).await;
    assign_postal_codes(&mut retained, geocoder, options, &mut stats).await;

    log::info!(
        "Enrichment: {} of {} trips are airport pickups ({} pickup lookups failed, \
         {} dropoff lookups failed, {} postal codes unparsed)",
        stats.matched,
        stats.extracted,
        stats.pickup_lookup_failures,
        stats.dropoff_lookup_failures,
        stats.postal_code_parse_failures,
    );

    Enriched {
        trips: retained,
        stats,
    }
}

/// Pass 1: keeps the trips whose pickup place the classifier accepts.
async fn classify_pickups(
    trips: Vec<TripRecord>,
    geocoder: &dyn ReverseGeocoder,
    classifier: &dyn PlaceClassifier,
    options: &EnrichOptions,
    stats: &mut EnrichStats,
) -> Vec<TripRecord> {
    let progress = &options.pickup_progress;
    progress.set_message("Classifying pickups".to_string());

    let places = lookup_all(
        &trips,
        TripEndpoint::Pickup,
        geocoder,
        options.concurrency,
        progress,
    )
    .await;

    let mut retained = Vec::new();

    for (mut trip, result) in trips.into_iter().zip(places) {
        match result {
            Ok(place) => {
                if classifier.classify(&place) {
                    trip.pickup_location_name = Some(place.display_name);
                    retained.push(trip);
                }
            }
            Err(e) => {
                log::warn!("Trip {}: pickup lookup failed: {e}", trip.trip_id);
                stats.pickup_lookup_failures += 1;
            }
        }
    }

    stats.matched = retained.len() as u64;
    progress.finish(format!("{} airport pickups", retained.len()));

    retained
}

/// Pass 2: sets each retained trip's dropoff postal code in place.
async fn assign_postal_codes(
    retained: &mut [TripRecord],
    geocoder: &dyn ReverseGeocoder,
    options: &EnrichOptions,
    stats: &mut EnrichStats,
) {
    let progress = &options.dropoff_progress;
    progress.set_message("Resolving dropoff postal codes".to_string());

    let places = lookup_all(
        retained,
        TripEndpoint::Dropoff,
        geocoder,
        options.concurrency,
        progress,
    )
    .await;

    for (trip, result) in retained.iter_mut().zip(places) {
        match result {
            Ok(place) => match parse_postal_code(place.postcode()) {
                Ok(zip) => trip.dropoff_zip_code = zip,
                Err(e) => {
                    log::warn!(
                        "Trip {}: error converting postal code {:?} to integer: {e}",
                        trip.trip_id,
                        place.postcode()
                    );
                    stats.postal_code_parse_failures += 1;
                }
            },
            Err(e) => {
                log::warn!("Trip {}: dropoff lookup failed: {e}", trip.trip_id);
                stats.dropoff_lookup_failures += 1;
            }
        }
    }

    progress.finish(format!("{} dropoff postal codes resolved", retained.len()));
}

/// Looks up one end of every trip, returning results in input order.
async fn lookup_all(
    trips: &[TripRecord],
    endpoint: TripEndpoint,
    geocoder: &dyn ReverseGeocoder,
    concurrency: usize,
    progress: &Arc<dyn ProgressCallback>,
) -> Vec<Result<PlaceDescription, GeocodeError>> {
    progress.set_total(trips.len() as u64);
    log::debug!(
        "Reverse geocoding {} {endpoint} coordinates (concurrency={concurrency})",
        trips.len()
    );

    stream::iter(trips.iter().map(move |trip| {
        let (latitude, longitude) = trip.coordinates(endpoint);
        async move {
            let result = geocoder.reverse(latitude, longitude).await;
            progress.inc(1);
            result
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

/// Parses a postal code exactly as returned by the geocoder.
///
/// No trimming or truncation: `"60666"` parses, `"60666-1234"` and `""`
/// do not.
///
/// # Errors
///
/// Returns [`ParseIntError`] if the string is not a plain integer.
pub fn parse_postal_code(postcode: &str) -> Result<i32, ParseIntError> {
    postcode.parse::<i32>()
}
