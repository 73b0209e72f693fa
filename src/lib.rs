//! Offline-first burn-plot records: polygon area, a per-owner local store, and best-effort
//! sync of finalized records to a Supabase backend.

pub mod client;
pub mod db_client;
pub mod drawing;
pub mod error;
pub mod export;
pub mod gateway;
pub mod geo;
pub mod models;
pub mod service;
pub mod storage;
pub mod store;
pub mod sync;
pub mod ui;

pub use client::SupabaseGateway;
pub use db_client::BackendConfig;
pub use error::{ConfigError, GatewayError, GatewayErrorKind, StoreError, SyncError};
pub use gateway::{Identity, PhotoUploadReport, RemoteGateway};
pub use service::RecordService;
pub use store::{OwnerId, RecordStore};
pub use sync::{PassStatus, SyncConfig, SyncEngine, SyncOutcome, SyncTrigger};
