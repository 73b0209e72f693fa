use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::db_client::{error_message, BackendConfig, BurnDbClient};
use crate::error::GatewayError;
use crate::gateway::{Identity, PhotoUploadReport, RemoteGateway};
use crate::geo::Coordinate;
use crate::models::remote::{
    NearbyRecordRow, PhotoInsert, PolygonInsert, RecordInsert, RecordRow, PHOTOS_TABLE,
    POLYGONS_TABLE, RECORDS_TABLE, RECORD_WITH_CHILDREN,
};
use crate::models::{Polygon, Record};
use crate::storage::{decode_photo_payload, is_remote_photo, photo_storage_path, PhotoStorageClient};

/// Session tokens handed out by the auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRow {
    #[serde(deserialize_with = "crate::models::serde_helpers::deserialize_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct StoragePathRow {
    storage_path: String,
}

/// `RemoteGateway` backed by a Supabase project: PostgREST for tables, the storage API for
/// photo blobs and the auth API for the session.
pub struct SupabaseGateway {
    config: BackendConfig,
    db_client: BurnDbClient,
    storage: PhotoStorageClient,
    http_client: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
}

impl std::fmt::Debug for SupabaseGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseGateway")
            .field("supabase_url", &self.config.supabase_url)
            .field("photo_bucket", &self.config.photo_bucket)
            .finish()
    }
}

impl SupabaseGateway {
    pub fn new(config: BackendConfig) -> Result<Self, GatewayError> {
        let storage = PhotoStorageClient::new(&config)?;
        Ok(Self {
            db_client: BurnDbClient::new(config.clone()),
            storage,
            http_client: reqwest::Client::new(),
            session: RwLock::new(None),
            config,
        })
    }

    /// Signs in with email and password and keeps the resulting session.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, GatewayError> {
        let url = format!("{}/token?grant_type=password", self.config.auth_url());
        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Bad credentials come back as 400; treat them as no session.
            if status.as_u16() == 400 {
                tracing::warn!("Sign-in refused: {}", error_message(&body));
                return Err(GatewayError::Unauthenticated);
            }
            return Err(GatewayError::from_status(status.as_u16(), error_message(&body)));
        }

        let token: TokenResponse = response.json().await?;
        let identity = Identity {
            user_id: token.user.id,
            access_token: token.access_token.clone(),
        };
        *self.session.write().await = Some(AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        });

        tracing::info!("Signed in as {}", identity.user_id);
        Ok(identity)
    }

    /// Adopts an existing access token (e.g. one persisted by another client).
    pub async fn set_session(&self, session: AuthSession) {
        *self.session.write().await = Some(session);
    }

    pub async fn sign_out(&self) {
        *self.session.write().await = None;
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(GatewayError::Unauthenticated)
    }

    /// Converts rows to records, resolving every photo path to a signed URL.
    async fn rows_into_records(&self, identity: &Identity, rows: Vec<RecordRow>) -> Vec<Record> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut photo_urls = Vec::with_capacity(row.burn_photos.len());
            for photo in &row.burn_photos {
                match self
                    .storage
                    .create_signed_url(&identity.access_token, &photo.storage_path)
                    .await
                {
                    Ok(url) => photo_urls.push(url),
                    Err(e) => tracing::warn!(
                        "Could not sign photo {} of record {}: {}",
                        photo.storage_path,
                        row.id,
                        e
                    ),
                }
            }
            records.push(row.into_record(photo_urls));
        }
        records
    }

    async fn upload_single_photo(
        &self,
        identity: &Identity,
        remote_id: &str,
        index: usize,
        payload: &str,
    ) -> Result<String, GatewayError> {
        let photo = decode_photo_payload(payload).map_err(|e| GatewayError::rejected(e.to_string()))?;
        let path = photo_storage_path(
            &identity.user_id,
            remote_id,
            index,
            Utc::now().timestamp_millis(),
            &photo.extension,
        );

        self.storage
            .upload(&identity.access_token, &path, &photo)
            .await?;

        let metadata = PhotoInsert {
            record_id: remote_id.to_string(),
            storage_path: path.clone(),
            file_size: photo.bytes.len(),
            mime_type: photo.mime_type.clone(),
        };
        let _: Vec<serde_json::Value> = self
            .db_client
            .insert_bulk(&identity.access_token, PHOTOS_TABLE, &[metadata])
            .await?;

        Ok(path)
    }
}

#[async_trait]
impl RemoteGateway for SupabaseGateway {
    async fn current_identity(&self) -> Result<Identity, GatewayError> {
        let access_token = self.access_token().await?;
        let url = format!("{}/user", self.config.auth_url());
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&access_token)
            .header("apikey", &self.config.anon_key)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(GatewayError::Unauthenticated);
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, error_message(&body)));
        }

        let user: AuthUser = response.json().await?;
        Ok(Identity {
            user_id: user.id,
            access_token,
        })
    }

    async fn create_record(
        &self,
        identity: &Identity,
        record: &Record,
    ) -> Result<String, GatewayError> {
        let insert = RecordInsert::from_record(&identity.user_id, record);
        let created: CreatedRow = self
            .db_client
            .insert_one(&identity.access_token, RECORDS_TABLE, &insert)
            .await?;

        tracing::debug!("Created remote record {} for {}", created.id, record.id);
        Ok(created.id)
    }

    async fn create_polygons(
        &self,
        identity: &Identity,
        remote_id: &str,
        polygons: &[Polygon],
    ) -> Result<usize, GatewayError> {
        if polygons.is_empty() {
            return Ok(0);
        }
        let rows: Vec<PolygonInsert> = polygons
            .iter()
            .map(|p| PolygonInsert::from_polygon(remote_id, p))
            .collect();
        let _: Vec<serde_json::Value> = self
            .db_client
            .insert_bulk(&identity.access_token, POLYGONS_TABLE, &rows)
            .await?;
        Ok(rows.len())
    }

    async fn upload_photos(
        &self,
        identity: &Identity,
        remote_id: &str,
        photos: &[String],
    ) -> PhotoUploadReport {
        let mut report = PhotoUploadReport::default();

        for (index, payload) in photos.iter().enumerate() {
            if is_remote_photo(payload) {
                report.skipped += 1;
                continue;
            }

            match self
                .upload_single_photo(identity, remote_id, index, payload)
                .await
            {
                Ok(path) => {
                    tracing::debug!("Uploaded photo {}/{} to {}", index + 1, photos.len(), path);
                    report.uploaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Photo {} of remote record {} failed: {}", index, remote_id, e);
                    report.failed.push(index);
                }
            }
        }

        report
    }

    async fn delete_record(&self, identity: &Identity, remote_id: &str) -> bool {
        let token = &identity.access_token;

        let photos: Result<Vec<StoragePathRow>, GatewayError> = self
            .db_client
            .query(token, |client| {
                client
                    .from(PHOTOS_TABLE)
                    .select("storage_path")
                    .eq("record_id", remote_id)
            })
            .await;

        match photos {
            Ok(rows) if !rows.is_empty() => {
                let paths: Vec<String> = rows.into_iter().map(|r| r.storage_path).collect();
                match self.storage.remove(token, &paths).await {
                    Ok(()) => tracing::debug!("Deleted {} photos of {}", paths.len(), remote_id),
                    Err(e) => tracing::warn!("Photo blobs of {} not removed: {}", remote_id, e),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not list photos of {}: {}", remote_id, e),
        }

        // Polygon and photo rows cascade with the record.
        match self
            .db_client
            .delete(token, |client| client.from(RECORDS_TABLE).eq("id", remote_id))
            .await
        {
            Ok(()) => {
                tracing::info!("Deleted remote record {}", remote_id);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to delete remote record {}: {}", remote_id, e);
                false
            }
        }
    }

    async fn fetch_owned_records(&self, identity: &Identity) -> Result<Vec<Record>, GatewayError> {
        let rows: Vec<RecordRow> = self
            .db_client
            .query(&identity.access_token, |client| {
                client
                    .from(RECORDS_TABLE)
                    .select(RECORD_WITH_CHILDREN)
                    .eq("user_id", &identity.user_id)
                    .order("created_at.desc")
            })
            .await?;

        tracing::debug!("Fetched {} remote records", rows.len());
        Ok(self.rows_into_records(identity, rows).await)
    }

    async fn fetch_near(
        &self,
        identity: &Identity,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Record>, GatewayError> {
        let params = serde_json::json!({
            "lat": center.lat,
            "lng": center.lng,
            "radius_meters": radius_km * 1000.0,
            "p_user_id": identity.user_id,
        });
        let nearby: Vec<NearbyRecordRow> = self
            .db_client
            .rpc(&identity.access_token, "get_records_near", &params)
            .await?;

        tracing::debug!(
            "Found {} records within {}km of ({}, {})",
            nearby.len(),
            radius_km,
            center.lat,
            center.lng
        );
        if nearby.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = nearby.into_iter().map(|r| r.id).collect();
        let rows: Vec<RecordRow> = self
            .db_client
            .query(&identity.access_token, |client| {
                client
                    .from(RECORDS_TABLE)
                    .select(RECORD_WITH_CHILDREN)
                    .in_("id", &ids)
                    .order("created_at.desc")
            })
            .await?;

        Ok(self.rows_into_records(identity, rows).await)
    }
}
