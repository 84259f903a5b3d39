//! Test Helper Utilities
//!
//! Fake collaborators and controller builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use courier_common::events::EventBus;
use courier_import::db::MemorySessionStorage;
use courier_import::models::Coordinates;
use courier_import::services::geocoder::{Centroid, GeocoderError, PlaceCandidate, PlaceDetail};
use courier_import::services::{
    BulkUploadResponse, ControllerSettings, Geocoder, ImportController, OrderCreator, OrderItem,
    ResumeStore, SessionView, SubmissionError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ORDERS_CSV: &str = "\
Name,Phone,Address,Weight,Ref,COD,Latitude,Longitude
Asha,9800000001,Thamel,1.5,R1,100,,
Bikash,9800000002,Patan,2,R2,200,27.67,85.32
Chandra,9800000003,nowhere,0,R3,0,,
";

/// Column assignments for [`ORDERS_CSV`]
pub const ORDERS_MAPPING: [(&str, &str); 8] = [
    ("recipient_name", "Name"),
    ("recipient_phone", "Phone"),
    ("delivery_address_text", "Address"),
    ("parcel_weight", "Weight"),
    ("reference_id", "Ref"),
    ("cod_amount", "COD"),
    ("lat", "Latitude"),
    ("lng", "Longitude"),
];

pub const THAMEL: Coordinates = Coordinates {
    lat: 27.715,
    lng: 85.312,
};

/// Knows a fixed set of addresses; everything else has no match
pub struct FakeGeocoder {
    places: HashMap<String, Coordinates>,
    delay: Duration,
    searches: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(1))
    }

    /// Every search sleeps `delay` first
    pub fn with_delay(delay: Duration) -> Self {
        let mut places = HashMap::new();
        places.insert("Thamel".to_string(), THAMEL);
        Self {
            places,
            delay,
            searches: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Never answers within any test's patience
    pub fn hanging() -> Self {
        Self::with_delay(Duration::from_secs(3600))
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        let mut queries = self.queries.lock().unwrap().clone();
        queries.sort();
        queries
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>, GeocoderError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        tokio::time::sleep(self.delay).await;

        Ok(self
            .places
            .keys()
            .filter(|name| name.as_str() == query)
            .map(|name| PlaceCandidate {
                place_id: name.clone(),
                name: name.clone(),
                address: name.clone(),
            })
            .collect())
    }

    async fn place_detail(&self, place_id: &str) -> Result<Option<PlaceDetail>, GeocoderError> {
        Ok(self.places.get(place_id).map(|point| PlaceDetail {
            place_id: Some(place_id.to_string()),
            name: place_id.to_string(),
            address: place_id.to_string(),
            centroid: Some(Centroid {
                lat: Some(point.lat),
                lon: Some(point.lng),
            }),
        }))
    }
}

/// Records every batch; answers with a canned result
pub struct FakeOrders {
    pub batches: Mutex<Vec<(Vec<OrderItem>, Option<String>)>>,
    result: Result<BulkUploadResponse, SubmissionError>,
}

impl FakeOrders {
    /// Creates every item
    pub fn accepting() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            result: Ok(BulkUploadResponse::default()),
        }
    }

    pub fn responding(response: BulkUploadResponse) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            result: Ok(response),
        }
    }

    pub fn failing(error: SubmissionError) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            result: Err(error),
        }
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderCreator for FakeOrders {
    async fn create_orders(
        &self,
        items: &[OrderItem],
        bearer_token: Option<&str>,
    ) -> Result<BulkUploadResponse, SubmissionError> {
        self.batches
            .lock()
            .unwrap()
            .push((items.to_vec(), bearer_token.map(str::to_string)));

        match &self.result {
            Ok(response) if response.created.is_empty() && response.failed.is_empty() => {
                Ok(BulkUploadResponse {
                    created: items
                        .iter()
                        .enumerate()
                        .map(|(i, _)| serde_json::json!({ "id": i + 1 }))
                        .collect(),
                    failed: Vec::new(),
                })
            }
            other => other.clone(),
        }
    }
}

/// Everything a controller test needs a handle on
pub struct Harness {
    pub controller: ImportController,
    pub geocoder: Arc<FakeGeocoder>,
    pub orders: Arc<FakeOrders>,
    pub storage: Arc<MemorySessionStorage>,
    pub events: EventBus,
}

pub fn harness(
    geocoder: FakeGeocoder,
    orders: FakeOrders,
    storage: Arc<MemorySessionStorage>,
    settings: ControllerSettings,
) -> Harness {
    let geocoder = Arc::new(geocoder);
    let orders = Arc::new(orders);
    let events = EventBus::new(100);
    let controller = ImportController::new(
        geocoder.clone(),
        orders.clone(),
        ResumeStore::new(storage.clone()),
        events.clone(),
        settings,
    );
    Harness {
        controller,
        geocoder,
        orders,
        storage,
        events,
    }
}

/// Fresh storage, accepting order service, default settings; already resumed
pub async fn ready_harness(geocoder: FakeGeocoder) -> Harness {
    let h = harness(
        geocoder,
        FakeOrders::accepting(),
        Arc::new(MemorySessionStorage::new()),
        ControllerSettings::default(),
    );
    assert!(!h.controller.resume().await);
    h
}

/// Upload [`ORDERS_CSV`] and map every column
pub async fn upload_and_map(controller: &ImportController) {
    controller
        .upload(Some("orders.csv".to_string()), ORDERS_CSV.as_bytes())
        .await
        .unwrap();
    for (key, header) in ORDERS_MAPPING {
        controller.update_mapping(key, header).await.unwrap();
    }
}

/// Poll until no wave is in flight
pub async fn wait_until_idle(controller: &ImportController) -> SessionView {
    for _ in 0..500 {
        let view = controller.view().await;
        if !view.geocode_in_progress {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("geocoding wave did not finish");
}
