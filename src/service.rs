//! Read/write API used by screens: local store first, remote when available.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{GatewayError, SyncError};
use crate::gateway::{Identity, RemoteGateway};
use crate::geo::Coordinate;
use crate::models::{Record, RecordStatus};
use crate::store::{LocalSyncStatus, OwnerId, RecordStats, RecordStore};
use crate::sync::{SubmitOutcome, SyncEngine, SyncOutcome, SyncTrigger};

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// The record as it now sits in the local store.
    pub record: Record,
    pub stored: bool,
    /// Set when the inline submission wrote the record remotely.
    pub remote_id: Option<String>,
}

pub struct RecordService {
    store: Arc<RecordStore>,
    gateway: Arc<dyn RemoteGateway>,
    engine: Arc<SyncEngine>,
}

impl RecordService {
    pub fn new(
        store: Arc<RecordStore>,
        gateway: Arc<dyn RemoteGateway>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        Self {
            store,
            gateway,
            engine,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Remote records plus everything local the remote does not know about.
    /// Falls back to the local set when the remote cannot be read.
    pub async fn get_all_records(&self, owner: &OwnerId) -> Vec<Record> {
        let local = self.store.get_all(owner);

        let Some(identity) = self.identity_for(owner).await else {
            return local;
        };

        match self.gateway.fetch_owned_records(&identity).await {
            Ok(remote) => merge_views(local, remote),
            Err(e) => {
                tracing::warn!(
                    "Remote records unavailable ({:?}), showing local records: {}",
                    e.kind(),
                    e
                );
                local
            }
        }
    }

    /// Writes the record locally, then submits it inline when it is Saved.
    pub async fn save_record(&self, owner: &OwnerId, record: Record) -> SaveOutcome {
        let record = match self.store.get(owner, &record.id) {
            Some(existing) => preserve_lifecycle(&existing, record),
            None => record,
        };

        let stored = self.store.upsert(owner, record.clone());
        if !stored || !record.is_sync_eligible() {
            return SaveOutcome {
                record,
                stored,
                remote_id: None,
            };
        }

        let Some(identity) = self.identity_for(owner).await else {
            return SaveOutcome {
                record,
                stored,
                remote_id: None,
            };
        };

        let remote_id = match self.engine.submit_record(&identity, owner, &record).await {
            SubmitOutcome::Synced { remote_id, .. } => Some(remote_id),
            SubmitOutcome::Failed(e) => {
                tracing::info!(
                    "Inline sync of {} failed, leaving it for the next pass: {}",
                    record.id,
                    e
                );
                None
            }
            SubmitOutcome::InFlight | SubmitOutcome::NotEligible => None,
        };

        let record = self.store.get(owner, &record.id).unwrap_or(record);
        SaveOutcome {
            record,
            stored,
            remote_id,
        }
    }

    /// Deletes locally, trying the remote copy first when the record was synced.
    pub async fn delete_record(&self, owner: &OwnerId, id: &str) -> bool {
        if let Some(remote_id) = self
            .store
            .get(owner, id)
            .filter(|r| r.sync.synced)
            .and_then(|r| r.sync.remote_id)
        {
            let deleted = match self.identity_for(owner).await {
                Some(identity) => self.gateway.delete_record(&identity, &remote_id).await,
                None => false,
            };
            if !deleted {
                tracing::warn!(
                    "Remote copy {} of record {} not deleted; deleting locally anyway",
                    remote_id,
                    id
                );
            }
        }

        self.store.delete(owner, id)
    }

    pub fn set_status(&self, owner: &OwnerId, id: &str, status: RecordStatus) -> bool {
        self.store.set_status(owner, id, status)
    }

    pub fn get_record(&self, owner: &OwnerId, id: &str) -> Option<Record> {
        self.store.get(owner, id)
    }

    pub fn stats(&self, owner: &OwnerId) -> RecordStats {
        self.store.stats(owner)
    }

    pub fn sync_status(&self, owner: &OwnerId) -> LocalSyncStatus {
        self.engine.sync_status(owner)
    }

    pub async fn fetch_near(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Record>, GatewayError> {
        let identity = self.gateway.current_identity().await?;
        self.gateway.fetch_near(&identity, center, radius_km).await
    }

    /// Runs a manual pass right away.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        self.engine.sync_pass(SyncTrigger::Manual).await
    }

    /// Resolves the session, only if it belongs to `owner`.
    async fn identity_for(&self, owner: &OwnerId) -> Option<Identity> {
        let OwnerId::User(user_id) = owner else {
            return None;
        };
        match self.gateway.current_identity().await {
            Ok(identity) if &identity.user_id == user_id => Some(identity),
            Ok(identity) => {
                tracing::warn!(
                    "Session belongs to {}, not {}; staying local",
                    identity.user_id,
                    user_id
                );
                None
            }
            Err(e) => {
                tracing::debug!("No usable session for {}: {}", owner, e);
                None
            }
        }
    }
}

/// Keeps the fields an edit may not change: creation time, Saved status and sync state.
fn preserve_lifecycle(existing: &Record, mut incoming: Record) -> Record {
    incoming.created_at = existing.created_at;
    if existing.status == RecordStatus::Saved {
        incoming.status = RecordStatus::Saved;
    }
    if existing.sync.synced {
        incoming.sync = existing.sync.clone();
    }
    incoming
}

/// Local-only records first in store order, then remote records. Remote wins on shared ids.
pub fn merge_views(local: Vec<Record>, remote: Vec<Record>) -> Vec<Record> {
    let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id.as_str()).collect();
    let remote_server_ids: HashSet<&str> = remote
        .iter()
        .filter_map(|r| r.sync.remote_id.as_deref())
        .collect();

    let mut merged: Vec<Record> = local
        .into_iter()
        .filter(|r| {
            let known_remotely = remote_ids.contains(r.id.as_str())
                || r
                    .sync
                    .remote_id
                    .as_deref()
                    .map_or(false, |id| remote_server_ids.contains(id));
            !known_remotely
        })
        .collect();
    merged.extend(remote);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CropType;

    fn saved(id: &str, remote_id: Option<&str>) -> Record {
        let mut record = Record::new_draft(CropType::Rice, "2024-01-01", "08:00");
        record.id = id.to_string();
        record.status = RecordStatus::Saved;
        if let Some(remote_id) = remote_id {
            record.sync.synced = true;
            record.sync.remote_id = Some(remote_id.to_string());
        }
        record
    }

    #[test]
    fn test_merge_prefers_remote_copy() {
        let draft = Record::new_draft(CropType::Sugarcane, "2024-01-02", "09:00");
        let mut local_synced = saved("a", Some("r-a"));
        local_synced.remarks = Some("stale".into());
        let unsynced = saved("b", None);
        let orphan = saved("c", Some("r-c"));

        let mut remote_a = saved("a", Some("r-a"));
        remote_a.remarks = Some("fresh".into());
        let remote_d = saved("d", Some("r-d"));

        let merged = merge_views(
            vec![draft.clone(), local_synced, unsynced, orphan],
            vec![remote_a, remote_d],
        );
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![draft.id.as_str(), "b", "c", "a", "d"]);
        assert_eq!(merged[3].remarks.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_preserve_lifecycle() {
        let existing = saved("a", Some("r-a"));
        let mut edit = existing.clone();
        edit.status = RecordStatus::Draft;
        edit.sync.synced = false;
        edit.sync.remote_id = None;
        edit.created_at = chrono::Utc::now() + chrono::Duration::days(1);
        edit.remarks = Some("edited".into());

        let kept = preserve_lifecycle(&existing, edit);
        assert_eq!(kept.status, RecordStatus::Saved);
        assert!(kept.sync.synced);
        assert_eq!(kept.sync.remote_id.as_deref(), Some("r-a"));
        assert_eq!(kept.created_at, existing.created_at);
        assert_eq!(kept.remarks.as_deref(), Some("edited"));
    }
}
