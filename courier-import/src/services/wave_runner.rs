//! Runs the lookups of one geocoding wave
//!
//! Lookups run concurrently up to a fixed width, each under its own
//! deadline. Every lookup yields a result; errors never escape a row. The
//! caller applies the collected results in one batch.

use crate::models::{Coordinates, GeocodeFailure};
use crate::services::geocoder::Geocoder;
use crate::services::reconciler::{LookupResult, WaveRequest};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Concurrency width and per-lookup deadline
#[derive(Debug, Clone, Copy)]
pub struct WaveSettings {
    pub max_concurrent: usize,
    pub lookup_timeout: Duration,
}

impl Default for WaveSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            lookup_timeout: Duration::from_millis(5000),
        }
    }
}

/// Search, take the first candidate, fetch its centroid
pub async fn resolve_address(
    geocoder: &dyn Geocoder,
    address: &str,
    timeout: Duration,
) -> Result<Coordinates, GeocodeFailure> {
    let address = address.trim();
    if address.is_empty() {
        return Err(GeocodeFailure::BlankAddress);
    }

    let lookup = async {
        let candidates = geocoder
            .search(address)
            .await
            .map_err(|e| GeocodeFailure::Service {
                message: e.to_string(),
            })?;
        let first = candidates.into_iter().next().ok_or(GeocodeFailure::NoMatch)?;

        let place = geocoder
            .place_detail(&first.place_id)
            .await
            .map_err(|e| GeocodeFailure::Service {
                message: e.to_string(),
            })?;

        place
            .and_then(|p| p.centroid_point())
            .ok_or(GeocodeFailure::NoCentroid)
    };

    match tokio::time::timeout(timeout, lookup).await {
        Ok(result) => result,
        Err(_) => Err(GeocodeFailure::Timeout),
    }
}

/// Run every lookup of `wave`
///
/// Returns None if `cancel` fires first; partial results are dropped.
pub async fn run_wave(
    geocoder: &dyn Geocoder,
    wave: &WaveRequest,
    settings: WaveSettings,
    cancel: &CancellationToken,
) -> Option<Vec<LookupResult>> {
    let width = settings.max_concurrent.max(1);

    let pending: Vec<_> = wave
        .lookups
        .iter()
        .map(|lookup| async move {
            LookupResult {
                row_id: lookup.row_id,
                outcome: resolve_address(geocoder, &lookup.address, settings.lookup_timeout).await,
            }
        })
        .collect();
    let lookups = stream::iter(pending)
        .buffer_unordered(width)
        .collect::<Vec<_>>();

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(wave_id = wave.wave_id, "Geocoding wave cancelled");
            None
        }
        results = lookups => Some(results),
    }
}
