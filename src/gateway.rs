//! The remote backend seen from the sync engine and facade.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::geo::Coordinate;
use crate::models::{Polygon, Record};

/// The signed-in owner plus the bearer token that authorizes their requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub access_token: String,
}

/// Per-photo result of uploading a record's photos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoUploadReport {
    pub uploaded: usize,
    /// Photos already referenced by URL.
    pub skipped: usize,
    /// Indices (into the record's photo list) that failed.
    pub failed: Vec<usize>,
}

impl PhotoUploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Resolves the current session. `Unauthenticated` when nobody is signed in.
    async fn current_identity(&self) -> Result<Identity, GatewayError>;

    /// Creates the record header and returns the server-assigned id.
    async fn create_record(&self, identity: &Identity, record: &Record)
        -> Result<String, GatewayError>;

    /// Writes the polygons for a remote record. Returns how many were written.
    async fn create_polygons(
        &self,
        identity: &Identity,
        remote_id: &str,
        polygons: &[Polygon],
    ) -> Result<usize, GatewayError>;

    /// Uploads each photo and its metadata row, carrying on past individual failures.
    async fn upload_photos(
        &self,
        identity: &Identity,
        remote_id: &str,
        photos: &[String],
    ) -> PhotoUploadReport;

    /// Deletes a remote record and its photo blobs. Returns false on any failure.
    async fn delete_record(&self, identity: &Identity, remote_id: &str) -> bool;

    /// All records owned by `identity`, newest first, with children and signed photo URLs.
    async fn fetch_owned_records(&self, identity: &Identity) -> Result<Vec<Record>, GatewayError>;

    /// Owned records within `radius_km` of `center`.
    async fn fetch_near(
        &self,
        identity: &Identity,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Record>, GatewayError>;
}
