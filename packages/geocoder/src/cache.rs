//! In-memory reverse-geocode cache keyed by coordinate.
//!
//! Keys are the coordinates rendered with [`format_coordinate`], i.e. the
//! exact strings sent on the wire, so a cached answer is the answer the
//! service would have given. Only successful lookups are cached; errors are
//! retried on the next request.
//!
//! Answers the wrapped geocoder flags as non-definitive (decoded from an
//! error status) are passed through but never stored.
//!
//! Entries can be seeded from a durable store before a run. Entries learned
//! during the run are read with [`CachingGeocoder::fresh_entries`] and
//! retired with [`CachingGeocoder::mark_persisted`] once written.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use taxi_etl_trip_models::PlaceDescription;

use crate::{GeocodeError, Lookup, ReverseGeocoder, format_coordinate};

/// Cache key: `(latitude, longitude)` rendered to six decimals.
pub type CoordinateKey = (String, String);

/// Builds the cache key for a coordinate pair.
#[must_use]
pub fn coordinate_key(latitude: f64, longitude: f64) -> CoordinateKey {
    (format_coordinate(latitude), format_coordinate(longitude))
}

#[derive(Debug)]
struct CachedPlace {
    place: PlaceDescription,
    /// `true` when learned during this process rather than seeded.
    fresh: bool,
}

/// Memoizing wrapper around any [`ReverseGeocoder`].
#[derive(Debug)]
pub struct CachingGeocoder<G> {
    inner: G,
    entries: Mutex<BTreeMap<CoordinateKey, CachedPlace>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<G> CachingGeocoder<G> {
    /// Wraps `inner` with an empty cache.
    #[must_use]
    pub const fn new(inner: G) -> Self {
        Self {
            inner,
            entries: Mutex::new(BTreeMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Wraps `inner` with a cache seeded from previously persisted entries.
    #[must_use]
    pub fn with_entries(
        inner: G,
        seeded: impl IntoIterator<Item = (CoordinateKey, PlaceDescription)>,
    ) -> Self {
        let entries = seeded
            .into_iter()
            .map(|(key, place)| {
                (
                    key,
                    CachedPlace {
                        place,
                        fresh: false,
                    },
                )
            })
            .collect();

        Self {
            inner,
            entries: Mutex::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Number of cached coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookups answered from the cache.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups forwarded to the wrapped geocoder.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries learned during this process (not seeded), for persisting.
    #[must_use]
    pub fn fresh_entries(&self) -> Vec<(CoordinateKey, PlaceDescription)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, cached)| cached.fresh)
            .map(|(key, cached)| (key.clone(), cached.place.clone()))
            .collect()
    }

    /// Marks entries as written to durable storage so later flushes skip
    /// them.
    pub fn mark_persisted<'a>(&self, keys: impl IntoIterator<Item = &'a CoordinateKey>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if let Some(cached) = entries.get_mut(key) {
                cached.fresh = false;
            }
        }
    }

    fn get(&self, key: &CoordinateKey) -> Option<PlaceDescription> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|cached| cached.place.clone())
    }

    fn insert(&self, key: CoordinateKey, place: PlaceDescription) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(CachedPlace { place, fresh: true });
    }
}

#[async_trait]
impl<G: ReverseGeocoder> ReverseGeocoder for CachingGeocoder<G> {
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<PlaceDescription, GeocodeError> {
        self.lookup(latitude, longitude)
            .await
            .map(|lookup| lookup.place)
    }

    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<Lookup, GeocodeError> {
        let key = coordinate_key(latitude, longitude);

        if let Some(place) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Lookup::definitive(place));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let lookup = self.inner.lookup(latitude, longitude).await?;
        if lookup.definitive {
            self.insert(key, lookup.place.clone());
        } else {
            log::debug!("Not caching non-definitive answer for {key:?}");
        }
        Ok(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers with the latitude as display name and counts calls; fails for
    /// negative latitudes.
    #[derive(Default)]
    struct CountingGeocoder {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ReverseGeocoder for CountingGeocoder {
        async fn reverse(
            &self,
            latitude: f64,
            _longitude: f64,
        ) -> Result<PlaceDescription, GeocodeError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if latitude < 0.0 {
                return Err(GeocodeError::Decode {
                    message: "negative".to_string(),
                });
            }
            Ok(PlaceDescription {
                display_name: format_coordinate(latitude),
                ..PlaceDescription::default()
            })
        }
    }

    #[tokio::test]
    async fn repeated_coordinates_hit_cache() {
        let cache = CachingGeocoder::new(CountingGeocoder::default());

        let first = cache.reverse(41.9742, -87.9073).await.unwrap();
        let second = cache.reverse(41.9742, -87.9073).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.inner.calls.load(Ordering::Relaxed), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn coordinates_equal_at_wire_precision_share_entry() {
        let cache = CachingGeocoder::new(CountingGeocoder::default());

        cache.reverse(41.974_200_01, -87.9073).await.unwrap();
        cache.reverse(41.974_200_04, -87.9073).await.unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = CachingGeocoder::new(CountingGeocoder::default());

        assert!(cache.reverse(-1.0, 0.0).await.is_err());
        assert!(cache.reverse(-1.0, 0.0).await.is_err());

        assert_eq!(cache.inner.calls.load(Ordering::Relaxed), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn seeded_entries_are_not_fresh() {
        let seeded = vec![(
            coordinate_key(41.0, -87.0),
            PlaceDescription {
                display_name: "seeded".to_string(),
                ..PlaceDescription::default()
            },
        )];
        let cache = CachingGeocoder::with_entries(CountingGeocoder::default(), seeded);

        let place = cache.reverse(41.0, -87.0).await.unwrap();
        assert_eq!(place.display_name, "seeded");
        assert_eq!(cache.inner.calls.load(Ordering::Relaxed), 0);
        assert!(cache.fresh_entries().is_empty());

        cache.reverse(42.0, -87.0).await.unwrap();
        let fresh = cache.fresh_entries();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].0, coordinate_key(42.0, -87.0));
    }

    /// Answers every lookup the way a throttled service does: an empty
    /// description decoded from an error status.
    #[derive(Default)]
    struct ThrottledGeocoder {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ReverseGeocoder for ThrottledGeocoder {
        async fn reverse(
            &self,
            latitude: f64,
            longitude: f64,
        ) -> Result<PlaceDescription, GeocodeError> {
            self.lookup(latitude, longitude).await.map(|l| l.place)
        }

        async fn lookup(&self, _lat: f64, _lon: f64) -> Result<Lookup, GeocodeError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Lookup {
                place: PlaceDescription::default(),
                definitive: false,
            })
        }
    }

    #[tokio::test]
    async fn non_definitive_answers_pass_through_uncached() {
        let cache = CachingGeocoder::new(ThrottledGeocoder::default());

        let place = cache.reverse(41.9742, -87.9073).await.unwrap();
        assert_eq!(place, PlaceDescription::default());
        cache.reverse(41.9742, -87.9073).await.unwrap();

        assert_eq!(cache.inner.calls.load(Ordering::Relaxed), 2);
        assert!(cache.is_empty());
        assert!(cache.fresh_entries().is_empty());
    }

    #[tokio::test]
    async fn persisted_entries_are_no_longer_fresh() {
        let cache = CachingGeocoder::new(CountingGeocoder::default());
        cache.reverse(41.0, -87.0).await.unwrap();
        cache.reverse(42.0, -87.0).await.unwrap();

        let first = cache.fresh_entries();
        cache.mark_persisted(first.iter().map(|(key, _)| key));
        cache.reverse(43.0, -87.0).await.unwrap();

        let second = cache.fresh_entries();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, coordinate_key(43.0, -87.0));
        assert_eq!(cache.len(), 3);
    }
}
