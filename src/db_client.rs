use postgrest::Postgrest;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, GatewayError};

pub const DEFAULT_PHOTO_BUCKET: &str = "burn-photos";
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL, without the `/rest/v1` suffix.
    pub supabase_url: String,
    pub anon_key: String,
    pub photo_bucket: String,
    pub signed_url_ttl_secs: u64,
}

impl BackendConfig {
    pub fn new(supabase_url: &str, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            supabase_url: normalize_base_url(supabase_url)?,
            anon_key: anon_key.into(),
            photo_bucket: DEFAULT_PHOTO_BUCKET.to_string(),
            signed_url_ttl_secs: DEFAULT_SIGNED_URL_TTL_SECS,
        })
    }

    /// Creates a backend config from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let url = std::env::var("BURNMAP_SUPABASE_URL")
            .map_err(|_| ConfigError::Missing("BURNMAP_SUPABASE_URL"))?;
        let anon_key = std::env::var("BURNMAP_SUPABASE_ANON_KEY")
            .map_err(|_| ConfigError::Missing("BURNMAP_SUPABASE_ANON_KEY"))?;

        let mut config = Self::new(&url, anon_key)?;

        if let Ok(bucket) = std::env::var("BURNMAP_PHOTO_BUCKET") {
            if !bucket.trim().is_empty() {
                config.photo_bucket = bucket.trim().to_string();
            }
        }
        if let Ok(ttl) = std::env::var("BURNMAP_SIGNED_URL_TTL_SECS") {
            config.signed_url_ttl_secs = ttl.parse().map_err(|e| ConfigError::Invalid {
                name: "BURNMAP_SIGNED_URL_TTL_SECS",
                message: format!("{}", e),
            })?;
        }

        Ok(config)
    }

    /// Gets the PostgREST endpoint URL
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.supabase_url)
    }

    pub fn storage_url(&self) -> String {
        format!("{}/storage/v1", self.supabase_url)
    }
}

/// Validates the project URL and strips a trailing `/rest/v1` or slash.
fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        name: "BURNMAP_SUPABASE_URL",
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            name: "BURNMAP_SUPABASE_URL",
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    let mut base = parsed.as_str().trim_end_matches('/').to_string();
    if let Some(stripped) = base.strip_suffix("/rest/v1") {
        base = stripped.to_string();
    }
    Ok(base)
}

/// Thin PostgREST wrapper. Every call carries the session's bearer token so row-level
/// security sees the owner.
pub struct BurnDbClient {
    config: BackendConfig,
    client: Postgrest,
}

impl std::fmt::Debug for BurnDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurnDbClient")
            .field("rest_url", &self.config.rest_url())
            .finish()
    }
}

impl BurnDbClient {
    pub fn new(config: BackendConfig) -> Self {
        let client = Postgrest::new(config.rest_url()).insert_header("apikey", &config.anon_key);
        Self { config, client }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Executes a query and returns the rows
    pub async fn query<T>(
        &self,
        token: &str,
        query_builder: impl FnOnce(&Postgrest) -> postgrest::Builder,
    ) -> Result<Vec<T>, GatewayError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = self.send(query_builder(&self.client).auth(token)).await?;
        parse_rows(&body)
    }

    /// Calls a stored procedure
    pub async fn rpc<T>(
        &self,
        token: &str,
        function: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<T>, GatewayError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let builder = self.client.rpc(function, params.to_string()).auth(token);
        let body = self.send(builder).await?;
        parse_rows(&body)
    }

    /// Inserts one row and returns the stored representation
    pub async fn insert_one<I, T>(&self, token: &str, table: &str, data: &I) -> Result<T, GatewayError>
    where
        I: Serialize,
        T: for<'de> Deserialize<'de>,
    {
        let rows: Vec<T> = self.insert_bulk(token, table, std::slice::from_ref(data)).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::rejected(format!("insert into {} returned no rows", table)))
    }

    /// Inserts multiple rows in a single request
    pub async fn insert_bulk<I, T>(
        &self,
        token: &str,
        table: &str,
        data: &[I],
    ) -> Result<Vec<T>, GatewayError>
    where
        I: Serialize,
        T: for<'de> Deserialize<'de>,
    {
        let json_data = serde_json::to_string(data)
            .map_err(|e| GatewayError::rejected(format!("failed to encode {} rows: {}", table, e)))?;
        let builder = self.client.from(table).auth(token).insert(json_data);
        let body = self.send(builder).await?;
        parse_rows(&body)
    }

    /// Deletes rows matched by the filter
    pub async fn delete(
        &self,
        token: &str,
        filter_builder: impl FnOnce(&Postgrest) -> postgrest::Builder,
    ) -> Result<(), GatewayError> {
        let builder = filter_builder(&self.client).auth(token).delete();
        self.send(builder).await.map(|_| ())
    }

    async fn send(&self, builder: postgrest::Builder) -> Result<String, GatewayError> {
        let response = builder
            .execute()
            .await
            .map_err(|e| GatewayError::NetworkUnavailable(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::NetworkUnavailable(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(GatewayError::from_status(status, error_message(&body)));
        }
        Ok(body)
    }
}

fn parse_rows<T>(body: &str) -> Result<Vec<T>, GatewayError>
where
    T: for<'de> Deserialize<'de>,
{
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<T>>(body).map_err(|e| {
        GatewayError::rejected(format!("database returned unexpected format: {} - {}", e, body))
    })
}

/// Pulls `message` / `error` out of a PostgREST error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("message")
            .or_else(|| value.get("error_description"))
            .or_else(|| value.get("error"))
            .or_else(|| value.get("msg"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}
