//! In-process `RemoteGateway` with call counters and switchable failures.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use burnmap_rs::geo::Coordinate;
use burnmap_rs::models::{Classification, CropType, Polygon, Record, RecordStatus};
use burnmap_rs::{
    GatewayError, Identity, OwnerId, PhotoUploadReport, RecordStore, RemoteGateway, SyncConfig,
    SyncEngine,
};
use tokio::sync::watch;

pub const USER: &str = "user-1";

pub struct FakeGateway {
    pub identity: Mutex<Result<Identity, GatewayError>>,
    pub create_failure: Mutex<Option<GatewayError>>,
    pub polygon_failure: Mutex<Option<GatewayError>>,
    pub failing_photos: Mutex<Vec<usize>>,
    pub fetch_failure: Mutex<Option<GatewayError>>,
    pub remote_records: Mutex<Vec<Record>>,
    pub create_delay: Mutex<Option<Duration>>,
    pub delete_succeeds: AtomicBool,
    /// Local ids passed to `create_record`, in call order.
    pub submitted: Mutex<Vec<String>>,
    pub polygon_calls: AtomicUsize,
    pub photo_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    next_remote_id: AtomicUsize,
}

impl FakeGateway {
    pub fn signed_in(user_id: &str) -> Self {
        Self {
            identity: Mutex::new(Ok(Identity {
                user_id: user_id.to_string(),
                access_token: "token".to_string(),
            })),
            create_failure: Mutex::new(None),
            polygon_failure: Mutex::new(None),
            failing_photos: Mutex::new(Vec::new()),
            fetch_failure: Mutex::new(None),
            remote_records: Mutex::new(Vec::new()),
            create_delay: Mutex::new(None),
            delete_succeeds: AtomicBool::new(true),
            submitted: Mutex::new(Vec::new()),
            polygon_calls: AtomicUsize::new(0),
            photo_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            next_remote_id: AtomicUsize::new(1),
        }
    }

    pub fn signed_out() -> Self {
        let gateway = Self::signed_in(USER);
        *gateway.identity.lock().unwrap() = Err(GatewayError::Unauthenticated);
        gateway
    }

    pub fn fail_creates_with(&self, error: GatewayError) {
        *self.create_failure.lock().unwrap() = Some(error);
    }

    pub fn succeed_creates(&self) {
        *self.create_failure.lock().unwrap() = None;
    }

    pub fn create_calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn create_calls_for(&self, id: &str) -> usize {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|submitted| submitted.as_str() == id)
            .count()
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn current_identity(&self) -> Result<Identity, GatewayError> {
        self.identity.lock().unwrap().clone()
    }

    async fn create_record(
        &self,
        _identity: &Identity,
        record: &Record,
    ) -> Result<String, GatewayError> {
        self.submitted.lock().unwrap().push(record.id.clone());

        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.create_failure.lock().unwrap().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(format!(
                "remote-{}",
                self.next_remote_id.fetch_add(1, Ordering::SeqCst)
            )),
        }
    }

    async fn create_polygons(
        &self,
        _identity: &Identity,
        _remote_id: &str,
        polygons: &[Polygon],
    ) -> Result<usize, GatewayError> {
        self.polygon_calls.fetch_add(1, Ordering::SeqCst);
        match self.polygon_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(polygons.len()),
        }
    }

    async fn upload_photos(
        &self,
        _identity: &Identity,
        _remote_id: &str,
        photos: &[String],
    ) -> PhotoUploadReport {
        self.photo_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_photos.lock().unwrap().clone();
        let mut report = PhotoUploadReport::default();
        for index in 0..photos.len() {
            if failing.contains(&index) {
                report.failed.push(index);
            } else {
                report.uploaded += 1;
            }
        }
        report
    }

    async fn delete_record(&self, _identity: &Identity, remote_id: &str) -> bool {
        self.deleted.lock().unwrap().push(remote_id.to_string());
        self.delete_succeeds.load(Ordering::SeqCst)
    }

    async fn fetch_owned_records(&self, _identity: &Identity) -> Result<Vec<Record>, GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetch_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(self.remote_records.lock().unwrap().clone()),
        }
    }

    async fn fetch_near(
        &self,
        _identity: &Identity,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Record>, GatewayError> {
        Ok(self
            .remote_records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.location.as_ref().map_or(false, |l| {
                    burnmap_rs::geo::haversine_km(center, l.coordinate()) <= radius_km
                })
            })
            .cloned()
            .collect())
    }
}

pub fn owner() -> OwnerId {
    OwnerId::user(USER)
}

pub fn saved_record(crop: CropType) -> Record {
    let mut record = Record::new_draft(crop, "2024-03-01", "09:30");
    record.status = RecordStatus::Saved;
    record
}

pub fn polygon(area: f64, classification: Classification) -> Polygon {
    let mut polygon = Polygon::from_points(
        vec![
            Coordinate::new(14.0, 100.0),
            Coordinate::new(14.0, 100.001),
            Coordinate::new(14.001, 100.001),
        ],
        classification,
        classification.display_color(CropType::Rice),
    )
    .unwrap();
    polygon.area = area;
    polygon
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<RecordStore>,
    pub engine: Arc<SyncEngine>,
    pub online: watch::Sender<bool>,
}

pub fn harness(gateway: FakeGateway, config: SyncConfig) -> Harness {
    let gateway = Arc::new(gateway);
    let store = Arc::new(RecordStore::in_memory().unwrap());
    let (online, online_rx) = watch::channel(true);
    let engine = Arc::new(SyncEngine::new(
        gateway.clone(),
        store.clone(),
        config,
        online_rx,
    ));
    Harness {
        gateway,
        store,
        engine,
        online,
    }
}
