//! Photo blobs in Supabase storage: data-URL decoding, upload, signed URLs and removal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_client::{error_message, BackendConfig};
use crate::error::GatewayError;

const DEFAULT_PHOTO_MIME: &str = "image/jpeg";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhotoPayloadError {
    #[error("photo is not a base64 data URL")]
    NotDataUrl,

    #[error("photo payload is not valid base64: {0}")]
    InvalidBase64(String),
}

/// A photo payload decoded from a `data:<mime>;base64,<data>` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPhoto {
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Photos already stored remotely are referenced by URL and never re-uploaded.
pub fn is_remote_photo(photo: &str) -> bool {
    photo.starts_with("http")
}

pub fn decode_photo_payload(photo: &str) -> Result<DecodedPhoto, PhotoPayloadError> {
    let rest = photo
        .strip_prefix("data:")
        .ok_or(PhotoPayloadError::NotDataUrl)?;
    let (mime, data) = rest
        .split_once(";base64,")
        .ok_or(PhotoPayloadError::NotDataUrl)?;

    let valid_mime = mime
        .chars()
        .all(|c| c.is_ascii_alphabetic() || matches!(c, '-' | '+' | '/'));
    if !valid_mime || data.is_empty() {
        return Err(PhotoPayloadError::NotDataUrl);
    }

    let mime_type = if mime.is_empty() {
        DEFAULT_PHOTO_MIME.to_string()
    } else {
        mime.to_string()
    };
    let extension = mime_type
        .split('/')
        .nth(1)
        .filter(|ext| !ext.is_empty())
        .unwrap_or("jpg")
        .to_string();
    let bytes =
        base64::decode(data.trim()).map_err(|e| PhotoPayloadError::InvalidBase64(e.to_string()))?;

    Ok(DecodedPhoto {
        mime_type,
        bytes,
        extension,
    })
}

/// Object path for the `index`-th photo of a remote record.
pub fn photo_storage_path(
    owner_id: &str,
    remote_id: &str,
    index: usize,
    timestamp_millis: i64,
    extension: &str,
) -> String {
    format!(
        "{}/{}/photo_{}_{}.{}",
        owner_id, remote_id, index, timestamp_millis, extension
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    expires_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

#[derive(Debug, Clone, Serialize)]
struct RemoveRequest<'a> {
    prefixes: &'a [String],
}

pub struct PhotoStorageClient {
    storage_url: String,
    anon_key: String,
    bucket_name: String,
    signed_url_ttl_secs: u64,
    http_client: reqwest::Client,
}

impl PhotoStorageClient {
    pub fn new(config: &BackendConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::NetworkUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            storage_url: config.storage_url(),
            anon_key: config.anon_key.clone(),
            bucket_name: config.photo_bucket.clone(),
            signed_url_ttl_secs: config.signed_url_ttl_secs,
            http_client,
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Uploads one object. Existing objects are never overwritten.
    pub async fn upload(
        &self,
        token: &str,
        path: &str,
        photo: &DecodedPhoto,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/object/{}/{}", self.storage_url, self.bucket_name, path);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header("apikey", &self.anon_key)
            .header(reqwest::header::CONTENT_TYPE, &photo.mime_type)
            .header("cache-control", "max-age=3600")
            .header("x-upsert", "false")
            .body(photo.bytes.clone())
            .send()
            .await?;

        check_status(response).await?;
        tracing::debug!("Uploaded {} ({} bytes)", path, photo.bytes.len());
        Ok(())
    }

    /// Returns a time-limited read URL for a stored object.
    pub async fn create_signed_url(&self, token: &str, path: &str) -> Result<String, GatewayError> {
        let url = format!(
            "{}/object/sign/{}/{}",
            self.storage_url, self.bucket_name, path
        );
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header("apikey", &self.anon_key)
            .json(&SignRequest {
                expires_in: self.signed_url_ttl_secs,
            })
            .send()
            .await?;

        let signed: SignResponse = check_status(response).await?.json().await?;
        Ok(self.absolute_url(&signed.signed_url))
    }

    /// Removes the given object paths from the bucket.
    pub async fn remove(&self, token: &str, paths: &[String]) -> Result<(), GatewayError> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!("{}/object/{}", self.storage_url, self.bucket_name);
        let response = self
            .http_client
            .delete(&url)
            .bearer_auth(token)
            .header("apikey", &self.anon_key)
            .json(&RemoveRequest { prefixes: paths })
            .send()
            .await?;

        check_status(response).await?;
        tracing::debug!("Removed {} objects from {}", paths.len(), self.bucket_name);
        Ok(())
    }

    fn absolute_url(&self, signed_path: &str) -> String {
        if is_remote_photo(signed_path) {
            signed_path.to_string()
        } else {
            format!(
                "{}/{}",
                self.storage_url,
                signed_path.trim_start_matches('/')
            )
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::from_status(status.as_u16(), error_message(&body)))
}
