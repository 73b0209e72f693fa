//! Pushes Saved-but-unsynced records to the remote backend.
//!
//! A pass walks the owner's local records in store order and submits each eligible one
//! once: record header, then polygons, then photos. Only the header decides success;
//! children that fail are logged and counted as partial. Passes never overlap, and a
//! record is never in flight twice, whether submitted by a pass or by an inline save.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

use crate::error::{ConfigError, GatewayError, GatewayErrorKind, SyncError};
use crate::gateway::{Identity, RemoteGateway};
use crate::models::Record;
use crate::store::{LocalSyncStatus, OwnerId, RecordStore};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_REJECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub interval: Duration,
    /// Consecutive backend rejections after which scheduled passes stop retrying a record.
    pub max_rejections: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            max_rejections: DEFAULT_MAX_REJECTIONS,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(secs) = std::env::var("BURNMAP_SYNC_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::Invalid {
                name: "BURNMAP_SYNC_INTERVAL_SECS",
                message: format!("{}", e),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    name: "BURNMAP_SYNC_INTERVAL_SECS",
                    message: "interval must be positive".to_string(),
                });
            }
            config.interval = Duration::from_secs(secs);
        }
        if let Ok(max) = std::env::var("BURNMAP_MAX_REJECTIONS") {
            config.max_rejections = max.parse().map_err(|e| ConfigError::Invalid {
                name: "BURNMAP_MAX_REJECTIONS",
                message: format!("{}", e),
            })?;
        }

        Ok(config)
    }
}

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Reconnected,
    Interval,
    Manual,
}

impl SyncTrigger {
    /// Manual passes retry records that scheduled passes have given up on.
    fn honors_rejection_limit(&self) -> bool {
        !matches!(self, SyncTrigger::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    Completed,
    /// Another pass held the guard; nothing was submitted.
    AlreadyRunning,
    Unauthenticated,
    /// The backend could not be reached to resolve the session.
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success_count: usize,
    pub failed_count: usize,
    /// Records synced whose polygons or photos did not all make it.
    pub partial_count: usize,
    /// Records held back by the rejection limit or already in flight.
    pub skipped_count: usize,
    pub status: PassStatus,
}

impl SyncOutcome {
    fn empty(status: PassStatus) -> Self {
        Self {
            success_count: 0,
            failed_count: 0,
            partial_count: 0,
            skipped_count: 0,
            status,
        }
    }
}

/// Result of submitting one record.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Synced { remote_id: String, partial: bool },
    Failed(GatewayError),
    /// Someone else is already submitting this record.
    InFlight,
    /// Draft or already synced.
    NotEligible,
}

/// Releases a record claim when dropped.
struct InFlightClaim<'a> {
    claims: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        lock(self.claims).remove(&self.key);
    }
}

/// Clears the pass flag when dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SyncEngine {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<RecordStore>,
    config: SyncConfig,
    connectivity: watch::Receiver<bool>,
    pass_in_progress: AtomicBool,
    in_flight: Mutex<HashSet<String>>,
    rejections: Mutex<HashMap<String, u32>>,
    sync_requested: Notify,
}

impl SyncEngine {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<RecordStore>,
        config: SyncConfig,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            connectivity,
            pass_in_progress: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            rejections: Mutex::new(HashMap::new()),
            sync_requested: Notify::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    pub fn is_syncing(&self) -> bool {
        self.pass_in_progress.load(Ordering::Acquire)
    }

    pub fn sync_status(&self, owner: &OwnerId) -> LocalSyncStatus {
        self.store.sync_status(owner)
    }

    /// Consecutive rejections recorded for a record.
    pub fn rejection_count(&self, owner: &OwnerId, id: &str) -> u32 {
        lock(&self.rejections)
            .get(&claim_key(owner, id))
            .copied()
            .unwrap_or(0)
    }

    /// Asks the running loop for a manual pass. Returns false when offline.
    pub fn force_sync_now(&self) -> bool {
        if !self.is_online() {
            tracing::info!("Sync requested while offline, ignoring");
            return false;
        }
        self.sync_requested.notify_one();
        true
    }

    /// Runs one pass over the current owner's records.
    pub async fn sync_pass(&self, trigger: SyncTrigger) -> Result<SyncOutcome, SyncError> {
        if self
            .pass_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync pass ({:?}) skipped, another pass is running", trigger);
            return Ok(SyncOutcome::empty(PassStatus::AlreadyRunning));
        }
        let _guard = PassGuard(&self.pass_in_progress);

        let identity = match self.gateway.current_identity().await {
            Ok(identity) => identity,
            Err(GatewayError::Unauthenticated) => {
                tracing::info!("Sync pass ({:?}) skipped, no active session", trigger);
                return Ok(SyncOutcome::empty(PassStatus::Unauthenticated));
            }
            Err(e) => {
                tracing::warn!("Sync pass ({:?}) could not resolve session: {}", trigger, e);
                return Ok(SyncOutcome::empty(PassStatus::Offline));
            }
        };
        let owner = OwnerId::user(identity.user_id.clone());

        let records = self.store.try_get_all(&owner)?;
        let eligible: Vec<Record> = records
            .into_iter()
            .filter(Record::is_sync_eligible)
            .collect();

        let mut outcome = SyncOutcome::empty(PassStatus::Completed);
        if eligible.is_empty() {
            tracing::debug!("No records to sync for {}", owner);
            return Ok(outcome);
        }

        tracing::info!(
            "Sync pass ({:?}) started: {} records for {}",
            trigger,
            eligible.len(),
            owner
        );

        for record in &eligible {
            if trigger.honors_rejection_limit() && self.is_held_back(&owner, &record.id) {
                tracing::info!(
                    "Record {} held back after {} rejections; waiting for a manual sync",
                    record.id,
                    self.rejection_count(&owner, &record.id)
                );
                outcome.skipped_count += 1;
                continue;
            }

            match self.submit_record(&identity, &owner, record).await {
                SubmitOutcome::Synced { partial, .. } => {
                    outcome.success_count += 1;
                    if partial {
                        outcome.partial_count += 1;
                    }
                }
                SubmitOutcome::Failed(_) => outcome.failed_count += 1,
                SubmitOutcome::InFlight | SubmitOutcome::NotEligible => outcome.skipped_count += 1,
            }
        }

        tracing::info!(
            "Sync pass ({:?}) finished: {} synced ({} partial), {} failed, {} skipped",
            trigger,
            outcome.success_count,
            outcome.partial_count,
            outcome.failed_count,
            outcome.skipped_count
        );
        Ok(outcome)
    }

    /// Submits one record. The local copy changes only once the header is written.
    pub async fn submit_record(
        &self,
        identity: &Identity,
        owner: &OwnerId,
        record: &Record,
    ) -> SubmitOutcome {
        if !record.is_sync_eligible() {
            return SubmitOutcome::NotEligible;
        }
        let Some(_claim) = self.claim(owner, &record.id) else {
            tracing::debug!("Record {} is already being submitted", record.id);
            return SubmitOutcome::InFlight;
        };
        // The caller's copy may predate a submission that finished before the claim was taken.
        let record = match self.store.get(owner, &record.id) {
            Some(current) if current.is_sync_eligible() => current,
            _ => {
                tracing::debug!("Record {} no longer needs syncing", record.id);
                return SubmitOutcome::NotEligible;
            }
        };
        let record = &record;

        let remote_id = match self.gateway.create_record(identity, record).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                self.note_failure(owner, &record.id, &e);
                tracing::warn!(
                    "Failed to sync record {} ({:?}): {}",
                    record.id,
                    e.kind(),
                    e
                );
                return SubmitOutcome::Failed(e);
            }
        };

        let mut partial = false;
        if let Err(e) = self
            .gateway
            .create_polygons(identity, &remote_id, &record.polygons)
            .await
        {
            partial = true;
            tracing::warn!(
                "Polygons of record {} ({} on remote) not written ({:?}): {}",
                record.id,
                remote_id,
                e.kind(),
                e
            );
        }

        if !record.photos.is_empty() {
            let report = self
                .gateway
                .upload_photos(identity, &remote_id, &record.photos)
                .await;
            if !report.is_complete() {
                partial = true;
                tracing::warn!(
                    "Record {} synced without photos at indices {:?}",
                    record.id,
                    report.failed
                );
            }
        }

        lock(&self.rejections).remove(&claim_key(owner, &record.id));
        if !self.store.mark_synced(owner, &record.id, &remote_id) {
            tracing::warn!(
                "Record {} written remotely as {} but no longer eligible locally",
                record.id,
                remote_id
            );
        } else {
            tracing::debug!("Synced record {} as {}", record.id, remote_id);
        }

        SubmitOutcome::Synced { remote_id, partial }
    }

    /// Drives passes from the connectivity channel, the interval timer and manual requests.
    /// Returns when the connectivity sender is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut connectivity = self.connectivity.clone();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup is handled below.
        ticker.tick().await;

        let mut online = *connectivity.borrow_and_update();
        if online {
            self.run_pass(SyncTrigger::Startup).await;
        }

        loop {
            let trigger = tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        tracing::info!("Connectivity source closed, stopping sync loop");
                        break;
                    }
                    let now_online = *connectivity.borrow_and_update();
                    let reconnected = now_online && !online;
                    online = now_online;
                    if !reconnected {
                        continue;
                    }
                    SyncTrigger::Reconnected
                }
                _ = ticker.tick() => {
                    if !online {
                        continue;
                    }
                    SyncTrigger::Interval
                }
                _ = self.sync_requested.notified() => SyncTrigger::Manual,
            };

            self.run_pass(trigger).await;
        }
    }

    async fn run_pass(&self, trigger: SyncTrigger) {
        if let Err(e) = self.sync_pass(trigger).await {
            tracing::error!("Sync pass ({:?}) aborted: {}", trigger, e);
        }
    }

    fn claim(&self, owner: &OwnerId, id: &str) -> Option<InFlightClaim<'_>> {
        let key = claim_key(owner, id);
        if !lock(&self.in_flight).insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            claims: &self.in_flight,
            key,
        })
    }

    fn note_failure(&self, owner: &OwnerId, id: &str, error: &GatewayError) {
        let key = claim_key(owner, id);
        let mut rejections = lock(&self.rejections);
        if error.kind() == GatewayErrorKind::BackendRejected {
            *rejections.entry(key).or_insert(0) += 1;
        } else {
            rejections.remove(&key);
        }
    }

    fn is_held_back(&self, owner: &OwnerId, id: &str) -> bool {
        self.config.max_rejections > 0
            && self.rejection_count(owner, id) >= self.config.max_rejections
    }
}

fn claim_key(owner: &OwnerId, id: &str) -> String {
    format!("{}/{}", owner, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.max_rejections, 5);
    }

    #[test]
    fn test_manual_trigger_ignores_rejection_limit() {
        assert!(SyncTrigger::Interval.honors_rejection_limit());
        assert!(SyncTrigger::Reconnected.honors_rejection_limit());
        assert!(SyncTrigger::Startup.honors_rejection_limit());
        assert!(!SyncTrigger::Manual.honors_rejection_limit());
    }

    #[test]
    fn test_pass_guard_releases_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = PassGuard(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
