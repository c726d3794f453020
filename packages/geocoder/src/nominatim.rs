//! Nominatim / OpenStreetMap reverse geocoder client.
//!
//! Issues `GET {base_url}?format=jsonv2&lat=..&lon=..` with the configured
//! client identifier in the `User-Agent` header. The public instance's usage
//! policy requires that header on every request.
//!
//! A non-success status is logged but not fatal: the body is decoded anyway
//! and, because every [`PlaceDescription`] field defaults, an error body
//! yields an empty description.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use std::time::Duration;

use async_trait::async_trait;
use taxi_etl_trip_models::PlaceDescription;

use crate::retry::{self, RetryPolicy};
use crate::{GeocodeError, Lookup, ReverseGeocoder, format_coordinate};

/// Public Nominatim reverse endpoint.
pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Client identifier sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = "msds432-final-group-4";

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output format requested from the service.
const OUTPUT_FORMAT: &str = "jsonv2";

/// Maximum length of the response body preview included in decode errors.
const BODY_PREVIEW_LEN: usize = 200;

/// Settings for a [`NominatimClient`].
#[derive(Debug, Clone)]
pub struct NominatimConfig {
    /// Reverse endpoint URL.
    pub base_url: String,
    /// Attribution value for the `User-Agent` header.
    pub user_agent: String,
    /// Timeout applied to each HTTP request.
    pub timeout: Duration,
    /// Backoff policy around each request.
    pub retry: RetryPolicy,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Reverse geocoder backed by a Nominatim instance.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    retry: RetryPolicy,
}

impl NominatimClient {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: NominatimConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url,
            user_agent: config.user_agent,
            retry: config.retry,
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimClient {
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
        let lat = format_coordinate(latitude);
        let lon = format_coordinate(longitude);

        let response = retry::send(
            || {
                self.client
                    .get(&self.base_url)
                    .header(reqwest::header::USER_AGENT, &self.user_agent)
                    .query(&[
                        ("format", OUTPUT_FORMAT),
                        ("lat", lat.as_str()),
                        ("lon", lon.as_str()),
                    ])
            },
            &self.retry,
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Nominatim returned HTTP {status} for ({lat}, {lon})");
        }

        let text = response.text().await?;
        Ok(Lookup {
            place: decode_body(&text)?,
            definitive: status.is_success(),
        })
    }
}

/// Decodes a Nominatim `jsonv2` reverse response.
///
/// # Errors
///
/// Returns [`GeocodeError::Decode`] if the body is not a JSON object of the
/// expected shape.
pub fn decode_body(text: &str) -> Result<PlaceDescription, GeocodeError> {
    serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        GeocodeError::Decode {
            message: format!("{e} (body: {preview})"),
        }
    })
}
