//! Review & submission assembler
//!
//! Turns resolved rows into order-creation items and sends them in one
//! batch. Weight is always coerced into range rather than rejecting a row.

use crate::models::{CanonicalKey, GeocodeRow, GeocodeStatus};
use crate::utils::{parse_leading_number, parse_number_loose};
use async_trait::async_trait;
use courier_common::config::{ImportConfig, OrdersConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

static DIMENSION_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9.]+").expect("valid regex"));

/// Submission errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    #[error("No geocoded rows to upload")]
    NoGeocodedRows,

    #[error("Order service unreachable: {0}")]
    Transport(String),

    #[error("Order service rejected the batch ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Parcel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub l: f64,
    pub w: f64,
    pub h: f64,
}

/// One order in the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub recipient_name: String,
    pub recipient_phone: String,
    pub delivery_address_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tole: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub weight_kg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

/// Bounds applied to parsed weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightPolicy {
    pub floor_kg: f64,
    pub ceiling_kg: f64,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self {
            floor_kg: 0.01,
            ceiling_kg: 1000.0,
        }
    }
}

impl From<&ImportConfig> for WeightPolicy {
    fn from(config: &ImportConfig) -> Self {
        Self {
            floor_kg: config.weight_floor_kg,
            ceiling_kg: config.weight_ceiling_kg,
        }
    }
}

impl WeightPolicy {
    /// Missing, unparseable or non-positive → floor; above ceiling → ceiling
    pub fn coerce(&self, raw: Option<&str>) -> f64 {
        match raw.and_then(parse_number_loose) {
            Some(w) if w > self.ceiling_kg => self.ceiling_kg,
            Some(w) if w > 0.0 => w,
            _ => self.floor_kg,
        }
    }
}

/// Dimensions from either a JSON `{"l","w","h"}` object or free text with
/// three numbers (`"10x20x30"`, `"10 / 20 / 30 cm"`)
pub fn parse_dimensions(raw: &str) -> Option<Dimensions> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return parse_dimension_object(trimmed);
    }

    let nums: Vec<f64> = DIMENSION_SEPARATOR
        .split(trimmed)
        .filter_map(parse_leading_number)
        .collect();
    match nums.as_slice() {
        [l, w, h, ..] => Some(Dimensions { l: *l, w: *w, h: *h }),
        _ => None,
    }
}

fn parse_dimension_object(raw: &str) -> Option<Dimensions> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let field = |name: &str| -> Option<f64> {
        let n = match value.get(name)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => parse_number_loose(s),
            _ => None,
        }?;
        // Zero counts as absent
        (n != 0.0).then_some(n)
    };
    Some(Dimensions {
        l: field("l")?,
        w: field("w")?,
        h: field("h")?,
    })
}

fn text(row: &GeocodeRow, key: CanonicalKey) -> String {
    row.mapped_value(key).unwrap_or_default().to_string()
}

fn non_empty(row: &GeocodeRow, key: CanonicalKey) -> Option<String> {
    row.mapped_value(key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Rows that become order items, in row order
///
/// Item `i` of [`build_submission_payload`] over the same rows comes from
/// the `i`-th row yielded here.
pub fn submittable_rows<'a>(
    rows: impl IntoIterator<Item = &'a GeocodeRow>,
) -> impl Iterator<Item = &'a GeocodeRow> {
    rows.into_iter()
        .filter(|row| row.status == GeocodeStatus::Success && row.coordinates().is_some())
}

/// Items for every resolved row, in row order
///
/// Fails before anything is sent when no row is resolved.
pub fn build_submission_payload<'a>(
    rows: impl IntoIterator<Item = &'a GeocodeRow>,
    weights: &WeightPolicy,
) -> Result<Vec<OrderItem>, SubmissionError> {
    let items: Vec<OrderItem> = submittable_rows(rows)
        .filter_map(|row| {
            let point = row.coordinates()?;
            Some(OrderItem {
                recipient_name: text(row, CanonicalKey::RecipientName),
                recipient_phone: text(row, CanonicalKey::RecipientPhone),
                delivery_address_text: text(row, CanonicalKey::DeliveryAddressText),
                municipality: non_empty(row, CanonicalKey::Municipality),
                ward: non_empty(row, CanonicalKey::Ward),
                tole: non_empty(row, CanonicalKey::Tole),
                landmark: non_empty(row, CanonicalKey::Landmark),
                lat: point.lat,
                lng: point.lng,
                weight_kg: weights.coerce(row.mapped_value(CanonicalKey::ParcelWeight)),
                dimensions: row
                    .mapped_value(CanonicalKey::Dimensions)
                    .and_then(parse_dimensions),
            })
        })
        .collect();

    if items.is_empty() {
        return Err(SubmissionError::NoGeocodedRows);
    }
    Ok(items)
}

/// Per-item failure reported by the order service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub index: usize,
    pub error: String,
}

/// Order service response, passed through verbatim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkUploadResponse {
    #[serde(default)]
    pub created: Vec<serde_json::Value>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
}

/// Order batch creation collaborator
#[async_trait]
pub trait OrderCreator: Send + Sync {
    async fn create_orders(
        &self,
        items: &[OrderItem],
        bearer_token: Option<&str>,
    ) -> Result<BulkUploadResponse, SubmissionError>;
}

/// HTTP client for `POST /orders/bulk`
pub struct HttpOrderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOrderClient {
    pub fn new(config: &OrdersConfig) -> Result<Self, SubmissionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    items: &'a [OrderItem],
}

/// Error text from a JSON error body: `detail`, then `message`
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "message"].iter().find_map(|k| match value.get(*k)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    })
}

#[async_trait]
impl OrderCreator for HttpOrderClient {
    async fn create_orders(
        &self,
        items: &[OrderItem],
        bearer_token: Option<&str>,
    ) -> Result<BulkUploadResponse, SubmissionError> {
        let url = format!("{}/orders/bulk", self.base_url);
        let mut request = self.client.post(&url).json(&BulkRequest { items });
        if let Some(token) = bearer_token.or(self.api_key.as_deref()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message: error_message(&body)
                    .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16())),
            });
        }

        serde_json::from_str(&body).map_err(|e| SubmissionError::Rejected {
            status: status.as_u16(),
            message: format!("Unexpected response body: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRow;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn row(id: usize, status: GeocodeStatus, fields: &[(CanonicalKey, &str)]) -> GeocodeRow {
        let resolved = status == GeocodeStatus::Success;
        GeocodeRow {
            id,
            original: Arc::new(RawRow::new()),
            mapped: fields
                .iter()
                .map(|(k, v)| (*k, v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            lat: resolved.then_some(27.7),
            lng: resolved.then_some(85.3),
            status,
            error: None,
            failure: None,
        }
    }

    #[test]
    fn test_only_resolved_rows_are_submitted() {
        let rows = vec![
            row(0, GeocodeStatus::Success, &[]),
            row(1, GeocodeStatus::Failed, &[]),
            row(2, GeocodeStatus::Success, &[]),
            row(3, GeocodeStatus::Pending, &[]),
            row(4, GeocodeStatus::Success, &[]),
        ];
        let items = build_submission_payload(&rows, &WeightPolicy::default()).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_no_resolved_rows_is_refused() {
        let rows = vec![
            row(0, GeocodeStatus::Failed, &[]),
            row(1, GeocodeStatus::Pending, &[]),
        ];
        assert_eq!(
            build_submission_payload(&rows, &WeightPolicy::default()),
            Err(SubmissionError::NoGeocodedRows)
        );
    }

    #[test]
    fn test_weight_coercion() {
        let policy = WeightPolicy::default();
        assert_eq!(policy.coerce(Some("-5")), 0.01);
        assert_eq!(policy.coerce(Some("50000")), 1000.0);
        assert_eq!(policy.coerce(Some("12.5")), 12.5);
        assert_eq!(policy.coerce(Some("1,000")), 1000.0);
        assert_eq!(policy.coerce(Some("0")), 0.01);
        assert_eq!(policy.coerce(Some("heavy")), 0.01);
        assert_eq!(policy.coerce(Some("2kg")), 2.0);
        assert_eq!(policy.coerce(None), 0.01);
    }

    #[test]
    fn test_dimension_parsing() {
        let d = |l, w, h| Some(Dimensions { l, w, h });
        assert_eq!(parse_dimensions("10x20x30"), d(10.0, 20.0, 30.0));
        assert_eq!(parse_dimensions("10 / 20.5 / 30 cm"), d(10.0, 20.5, 30.0));
        assert_eq!(parse_dimensions("L:1 W:2 H:3 extra 4"), d(1.0, 2.0, 3.0));
        assert_eq!(parse_dimensions(r#"{"l": 1, "w": "2", "h": 3}"#), d(1.0, 2.0, 3.0));
        assert_eq!(parse_dimensions("10x20"), None);
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions(r#"{"l": 1, "w": 0, "h": 3}"#), None);
        assert_eq!(parse_dimensions(r#"{"l": 1, "w": 2}"#), None);
    }

    #[test]
    fn test_item_fields() {
        let rows = vec![row(
            0,
            GeocodeStatus::Success,
            &[
                (CanonicalKey::RecipientName, "Sita"),
                (CanonicalKey::RecipientPhone, "9800000000"),
                (CanonicalKey::Ward, "4"),
                (CanonicalKey::Tole, ""),
                (CanonicalKey::ParcelWeight, "2.5"),
                (CanonicalKey::Dimensions, "10x10x5"),
            ],
        )];
        let items = build_submission_payload(&rows, &WeightPolicy::default()).unwrap();
        let json = serde_json::to_value(&items[0]).unwrap();

        assert_eq!(json["recipient_name"], "Sita");
        assert_eq!(json["delivery_address_text"], "");
        assert_eq!(json["ward"], "4");
        assert!(json.get("tole").is_none());
        assert!(json.get("municipality").is_none());
        assert_eq!(json["weight_kg"], 2.5);
        assert_eq!(json["lat"], 27.7);
        assert_eq!(json["dimensions"]["h"], 5.0);
    }

    #[test]
    fn test_error_message_prefers_detail() {
        assert_eq!(
            error_message(r#"{"detail": "Vendor inactive", "message": "x"}"#),
            Some("Vendor inactive".to_string())
        );
        assert_eq!(
            error_message(r#"{"message": "Bad token"}"#),
            Some("Bad token".to_string())
        );
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn test_response_counts_pass_through() {
        let response: BulkUploadResponse = serde_json::from_str(
            r#"{"created": [{"id": "a"}, {"id": "b"}], "failed": [{"index": 2, "error": "dup"}]}"#,
        )
        .unwrap();
        assert_eq!(response.created.len(), 2);
        assert_eq!(response.failed[0].index, 2);
    }
}
