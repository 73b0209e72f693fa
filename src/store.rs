//! Durable per-owner record store on top of `native_db`.
//!
//! Each owner's records live in one entry keyed `burn_area_records:<owner>`, holding the
//! JSON-encoded list newest-first. Every mutation reads, edits and writes that entry inside a
//! single read-write transaction, so concurrent mutations never interleave.

use std::path::Path;

use chrono::Utc;
use native_db::{native_db, Builder, Database, Models, ToKey};
use native_model::{native_model, Model};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::geo;
use crate::models::{Classification, CropType, Record, RecordStatus};

/// Key prefix shared by every namespace; also the legacy single-user key.
pub const STORAGE_KEY_BASE: &str = "burn_area_records";

/// Seed records shipped by early builds.
pub const LEGACY_SAMPLE_IDS: [&str; 3] = ["sample-rice-1", "sample-sugarcane-1", "sample-rice-draft"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct RecordCollectionEntry {
    #[primary_key]
    pub key: String,
    pub payload: String,
    pub updated_at: String,
}

static MODELS: OnceCell<Models> = OnceCell::new();

/// Table definitions shared by every database this process opens.
fn models() -> Result<&'static Models, StoreError> {
    MODELS.get_or_try_init(|| {
        let mut models = Models::new();
        models.define::<RecordCollectionEntry>()?;
        Ok::<_, StoreError>(models)
    })
}

/// Identity a local namespace belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerId {
    User(String),
    Guest,
}

impl OwnerId {
    pub fn user(id: impl Into<String>) -> Self {
        OwnerId::User(id.into())
    }

    pub fn storage_key(&self) -> String {
        match self {
            OwnerId::User(id) => format!("{}:{}", STORAGE_KEY_BASE, id),
            OwnerId::Guest => format!("{}:guest", STORAGE_KEY_BASE),
        }
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerId::User(id) => write!(f, "{}", id),
            OwnerId::Guest => write!(f, "guest"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CropTally {
    pub count: usize,
    pub area_rai: f64,
}

/// Aggregates recomputed from the stored records on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordStats {
    pub total: usize,
    pub rice: CropTally,
    pub sugarcane: CropTally,
    pub total_area_rai: f64,
    pub burn_area_rai: f64,
    pub non_burn_area_rai: f64,
}

impl RecordStats {
    pub fn from_records(records: &[Record]) -> Self {
        let mut stats = RecordStats {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            let area_rai = geo::sq_meters_to_rai(record.total_area_sq_meters());
            let tally = match record.crop_type() {
                CropType::Rice => &mut stats.rice,
                CropType::Sugarcane => &mut stats.sugarcane,
            };
            tally.count += 1;
            tally.area_rai += area_rai;
            stats.total_area_rai += area_rai;
            stats.burn_area_rai +=
                geo::sq_meters_to_rai(record.area_sq_meters_by(Classification::Burn));
            stats.non_burn_area_rai +=
                geo::sq_meters_to_rai(record.area_sq_meters_by(Classification::NonBurn));
        }
        stats
    }

    pub fn for_crop(&self, crop: CropType) -> CropTally {
        match crop {
            CropType::Rice => self.rice,
            CropType::Sugarcane => self.sugarcane,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalSyncStatus {
    pub total: usize,
    pub synced: usize,
    pub unsynced: usize,
}

pub struct RecordStore {
    database: Database<'static>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let models = models()?;
        let database = if path.exists() {
            Builder::new().open(models, path)?
        } else {
            Builder::new().create(models, path)?
        };
        Ok(Self { database })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let database = Builder::new().create_in_memory(models()?)?;
        Ok(Self { database })
    }

    // ===== READS =====

    /// All records for `owner`, newest first. Database failures surface; a corrupt
    /// payload is logged and reads as empty.
    pub fn try_get_all(&self, owner: &OwnerId) -> Result<Vec<Record>, StoreError> {
        let key = owner.storage_key();
        let entry = match self.read_entry(&key)? {
            Some(entry) => Some(entry),
            None => self.migrate_legacy(&key)?,
        };
        Ok(match entry {
            Some(entry) => decode_or_empty(&key, &entry.payload),
            None => Vec::new(),
        })
    }

    /// Never fails; errors are logged and yield an empty list.
    pub fn get_all(&self, owner: &OwnerId) -> Vec<Record> {
        self.try_get_all(owner).unwrap_or_else(|e| {
            tracing::error!("Error reading records for {}: {}", owner, e);
            Vec::new()
        })
    }

    pub fn get(&self, owner: &OwnerId, id: &str) -> Option<Record> {
        self.get_all(owner).into_iter().find(|r| r.id == id)
    }

    pub fn get_by_type(&self, owner: &OwnerId, crop: CropType) -> Vec<Record> {
        self.get_all(owner)
            .into_iter()
            .filter(|r| r.crop_type() == crop)
            .collect()
    }

    pub fn stats(&self, owner: &OwnerId) -> RecordStats {
        RecordStats::from_records(&self.get_all(owner))
    }

    pub fn sync_status(&self, owner: &OwnerId) -> LocalSyncStatus {
        let records = self.get_all(owner);
        let synced = records.iter().filter(|r| r.is_synced()).count();
        LocalSyncStatus {
            total: records.len(),
            synced,
            unsynced: records.len() - synced,
        }
    }

    // ===== MUTATIONS =====

    /// Replaces the record with the same id in place, or inserts it at the front.
    pub fn upsert(&self, owner: &OwnerId, record: Record) -> bool {
        self.mutate(owner, "upsert", |records| {
            match records.iter().position(|r| r.id == record.id) {
                Some(index) => records[index] = record,
                None => records.insert(0, record),
            }
            true
        })
    }

    /// Removes by id. Absent ids are a no-op returning `false`.
    pub fn delete(&self, owner: &OwnerId, id: &str) -> bool {
        self.mutate(owner, "delete", |records| {
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        })
    }

    /// Moves a Draft to Saved. Saved records are left untouched, as are absent ids.
    pub fn set_status(&self, owner: &OwnerId, id: &str, status: RecordStatus) -> bool {
        self.mutate(owner, "set_status", |records| {
            records
                .iter_mut()
                .find(|r| r.id == id)
                .map(|r| r.apply_status(status))
                .unwrap_or(false)
        })
    }

    /// Sets `synced` and `remote_id` together. Refused unless the stored record is
    /// Saved and not yet synced.
    pub fn mark_synced(&self, owner: &OwnerId, id: &str, remote_id: &str) -> bool {
        self.mutate(owner, "mark_synced", |records| {
            records
                .iter_mut()
                .find(|r| r.id == id)
                .map(|r| r.mark_synced(remote_id.to_string()))
                .unwrap_or(false)
        })
    }

    /// Drops the seed records older builds wrote into the store.
    pub fn purge_legacy_samples(&self, owner: &OwnerId) -> bool {
        self.mutate(owner, "purge_legacy_samples", |records| {
            let before = records.len();
            records.retain(|r| !LEGACY_SAMPLE_IDS.contains(&r.id.as_str()));
            let purged = before - records.len();
            if purged > 0 {
                tracing::info!("Purged {} legacy sample records", purged);
            }
            purged > 0
        })
    }

    /// Removes every namespace, including the legacy key.
    pub fn clear_all(&self) -> bool {
        match self.try_clear_all() {
            Ok(removed) => {
                tracing::info!("Cleared {} local record namespaces", removed);
                true
            }
            Err(e) => {
                tracing::error!("Error clearing local records: {}", e);
                false
            }
        }
    }

    // ===== INTERNALS =====

    fn read_entry(&self, key: &str) -> Result<Option<RecordCollectionEntry>, StoreError> {
        let r = self.database.r_transaction()?;
        Ok(r.get().primary::<RecordCollectionEntry>(key.to_string())?)
    }

    /// Moves the un-namespaced legacy entry under `key`, once.
    fn migrate_legacy(&self, key: &str) -> Result<Option<RecordCollectionEntry>, StoreError> {
        let rw = self.database.rw_transaction()?;
        if let Some(current) = rw.get().primary::<RecordCollectionEntry>(key.to_string())? {
            return Ok(Some(current));
        }
        let Some(legacy) = rw
            .get()
            .primary::<RecordCollectionEntry>(STORAGE_KEY_BASE.to_string())?
        else {
            return Ok(None);
        };

        let migrated = RecordCollectionEntry {
            key: key.to_string(),
            payload: legacy.payload.clone(),
            updated_at: Utc::now().to_rfc3339(),
        };
        rw.insert(migrated.clone())?;
        rw.remove(legacy)?;
        rw.commit()?;
        tracing::info!("Migrated legacy local records to '{}'", key);
        Ok(Some(migrated))
    }

    /// Read-modify-write of one owner's list inside a single transaction. `edit` returns
    /// whether anything changed; unchanged lists are not rewritten.
    fn try_mutate<F>(&self, owner: &OwnerId, edit: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Vec<Record>) -> bool,
    {
        let key = owner.storage_key();
        self.migrate_legacy(&key)?;

        let rw = self.database.rw_transaction()?;
        let mut records = match rw.get().primary::<RecordCollectionEntry>(key.clone())? {
            Some(entry) => decode_or_empty(&key, &entry.payload),
            None => Vec::new(),
        };

        if !edit(&mut records) {
            return Ok(false);
        }

        let payload = serde_json::to_string(&records)
            .map_err(|e| StoreError::Database(format!("failed to encode records: {}", e)))?;
        rw.upsert(RecordCollectionEntry {
            key,
            payload,
            updated_at: Utc::now().to_rfc3339(),
        })?;
        rw.commit()?;
        Ok(true)
    }

    fn mutate<F>(&self, owner: &OwnerId, operation: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<Record>) -> bool,
    {
        self.try_mutate(owner, edit).unwrap_or_else(|e| {
            tracing::error!("Error during {} for {}: {}", operation, owner, e);
            false
        })
    }

    fn try_clear_all(&self) -> Result<usize, StoreError> {
        let rw = self.database.rw_transaction()?;
        let mut entries = Vec::new();
        for entry in rw.scan().primary::<RecordCollectionEntry>()?.all()? {
            let entry = entry?;
            if entry.key.starts_with(STORAGE_KEY_BASE) {
                entries.push(entry);
            }
        }
        let removed = entries.len();
        for entry in entries {
            rw.remove(entry)?;
        }
        rw.commit()?;
        Ok(removed)
    }

    /// Writes a raw payload under `key`. Lets tests and tooling seed legacy or corrupt data.
    pub fn write_raw(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        let rw = self.database.rw_transaction()?;
        rw.upsert(RecordCollectionEntry {
            key: key.to_string(),
            payload: payload.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        })?;
        rw.commit()?;
        Ok(())
    }

    pub fn read_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_entry(key)?.map(|entry| entry.payload))
    }
}

fn decode_or_empty(key: &str, payload: &str) -> Vec<Record> {
    match serde_json::from_str::<Vec<Record>>(payload) {
        Ok(records) => records,
        Err(e) => {
            let error = StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            };
            tracing::error!("Error reading from storage, treating as empty: {}", error);
            Vec::new()
        }
    }
}
