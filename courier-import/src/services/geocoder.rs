//! Address search / place detail client
//!
//! Resolution is two calls: free-text search (first candidate wins), then
//! place detail for that candidate's id, whose centroid is the point.
//! [`BaatoClient`] talks to the Baato v1 API; tests substitute their own
//! [`Geocoder`].

use crate::models::Coordinates;
use async_trait::async_trait;
use courier_common::config::GeocoderConfig;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Geocoder client errors
#[derive(Debug, Error)]
pub enum GeocoderError {
    #[error("Geocoder API key is not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One search hit, most relevant first
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCandidate {
    #[serde(deserialize_with = "id_as_string")]
    pub place_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Centroid {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

/// Full record for one place
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceDetail {
    #[serde(default, deserialize_with = "opt_id_as_string")]
    pub place_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub centroid: Option<Centroid>,
}

impl PlaceDetail {
    /// Centroid as a point, None unless both halves are finite
    pub fn centroid_point(&self) -> Option<Coordinates> {
        let centroid = self.centroid.as_ref()?;
        match (centroid.lat, centroid.lon) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Some(Coordinates { lat, lng })
            }
            _ => None,
        }
    }
}

/// Provider response wrapper: `{timestamp, status, message, data}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(i64),
    Text(String),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Number(n) => n.to_string(),
            IdRepr::Text(s) => s,
        }
    }
}

fn id_as_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    IdRepr::deserialize(d).map(String::from)
}

fn opt_id_as_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Option::<IdRepr>::deserialize(d).map(|id| id.map(String::from))
}

/// Address-search collaborator
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Candidates ordered by relevance; an empty list is "no match"
    async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>, GeocoderError>;

    /// Detail for a candidate; None when the provider has no record
    async fn place_detail(&self, place_id: &str) -> Result<Option<PlaceDetail>, GeocoderError>;
}

/// Baato v1 client
///
/// Requests share one token-bucket limiter so concurrent lookups within a
/// wave stay under the provider's rate.
pub struct BaatoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: RwLock<Option<String>>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl BaatoClient {
    pub fn new(config: &GeocoderConfig, api_key: Option<String>) -> Result<Self, GeocoderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.lookup_timeout_ms))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GeocoderError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: RwLock::new(api_key.filter(|k| !k.is_empty())),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Replace the key used for subsequent requests
    pub async fn set_api_key(&self, api_key: Option<String>) {
        *self.api_key.write().await = api_key.filter(|k| !k.is_empty());
    }

    pub async fn has_api_key(&self) -> bool {
        self.api_key.read().await.is_some()
    }

    async fn get_data<T>(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<T>, GeocoderError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let key = self
            .api_key
            .read()
            .await
            .clone()
            .ok_or(GeocoderError::NotConfigured)?;

        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, path);
        let mut query: Vec<(&str, &str)> = vec![("key", key.as_str())];
        query.extend_from_slice(params);

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| GeocoderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocoderError::Api(status.as_u16(), body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| GeocoderError::Parse(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl Geocoder for BaatoClient {
    async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>, GeocoderError> {
        tracing::debug!(query, "Geocoder search");
        self.get_data("search", &[("q", query), ("limit", "1")]).await
    }

    async fn place_detail(&self, place_id: &str) -> Result<Option<PlaceDetail>, GeocoderError> {
        tracing::debug!(place_id, "Geocoder place detail");
        let places: Vec<PlaceDetail> = self.get_data("places", &[("placeId", place_id)]).await?;
        Ok(places.into_iter().next())
    }
}
