//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::provider::{
    ProviderFactory, ProviderFuture, Snapshot, SnapshotRequest, SnapshotState, Volume,
    VolumeProvider, VolumeState,
};

/// Base timestamp (seconds since the epoch) for fixtures built by this module.
pub const FIXTURE_EPOCH_SECS: i64 = 1_700_000_000;

/// Seconds added to [`FIXTURE_EPOCH_SECS`] for snapshots created through the
/// fake provider, so they are newer than any seeded snapshot.
const CREATED_SNAPSHOT_OFFSET_SECS: i64 = 1_000_000;

/// Returns the fixture timestamp `offset_secs` after [`FIXTURE_EPOCH_SECS`].
#[must_use]
pub fn timestamp(offset_secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXTURE_EPOCH_SECS + offset_secs, 0).unwrap_or_default()
}

/// Builds an unattached volume fixture.
#[must_use]
pub fn volume(id: &str, availability_zone: &str, size_gib: u32) -> Volume {
    Volume {
        id: id.to_owned(),
        size_gib,
        availability_zone: availability_zone.to_owned(),
        create_time: timestamp(0),
        state: VolumeState::Available,
    }
}

/// Builds a completed snapshot fixture started `offset_secs` after the
/// fixture epoch.
#[must_use]
pub fn snapshot(id: &str, volume_id: &str, offset_secs: i64) -> Snapshot {
    Snapshot {
        id: id.to_owned(),
        volume_id: volume_id.to_owned(),
        start_time: timestamp(offset_secs),
        description: String::new(),
        state: SnapshotState::Completed,
    }
}

/// Provider operations the fake cloud can be told to fail.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum FakeOperation {
    /// Building a regional client.
    Connect,
    /// Listing unattached volumes.
    ListVolumes,
    /// Listing snapshots of a volume.
    ListSnapshots,
    /// Creating a snapshot.
    CreateSnapshot,
    /// Deleting a volume.
    DeleteVolume,
    /// Deleting a snapshot.
    DeleteSnapshot,
    /// Resolving the account alias.
    AccountAlias,
}

impl fmt::Display for FakeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::ListVolumes => "list volumes",
            Self::ListSnapshots => "list snapshots",
            Self::CreateSnapshot => "create snapshot",
            Self::DeleteVolume => "delete volume",
            Self::DeleteSnapshot => "delete snapshot",
            Self::AccountAlias => "account alias",
        };
        f.write_str(name)
    }
}

/// Error returned by the fake cloud for scripted failures.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("simulated {operation} failure in {region}")]
pub struct FakeProviderError {
    /// Region the failing call targeted (`global` for account calls).
    pub region: String,
    /// Operation that failed.
    pub operation: FakeOperation,
}

/// A call observed by the fake cloud.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// A regional client was built.
    Connect {
        /// Target region.
        region: String,
    },
    /// Unattached volumes were listed.
    ListVolumes {
        /// Target region.
        region: String,
    },
    /// Snapshots of a volume were listed.
    ListSnapshots {
        /// Target region.
        region: String,
        /// Parent volume.
        volume_id: String,
    },
    /// A snapshot was requested.
    CreateSnapshot {
        /// Target region.
        region: String,
        /// Full request, including tags.
        request: SnapshotRequest,
    },
    /// A volume was deleted.
    DeleteVolume {
        /// Target region.
        region: String,
        /// Deleted volume.
        volume_id: String,
    },
    /// A snapshot was deleted.
    DeleteSnapshot {
        /// Target region.
        region: String,
        /// Deleted snapshot.
        snapshot_id: String,
    },
}

impl ProviderCall {
    /// Returns true for calls that change provider state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateSnapshot { .. } | Self::DeleteVolume { .. } | Self::DeleteSnapshot { .. }
        )
    }
}

#[derive(Debug, Default)]
struct RegionState {
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
}

#[derive(Debug, Default)]
struct CloudState {
    regions: BTreeMap<String, RegionState>,
    calls: Vec<ProviderCall>,
    failures: BTreeSet<(String, FakeOperation)>,
    account_alias: Option<String>,
    fail_account_alias: bool,
    ignore_state_filter: bool,
    publish_created: bool,
    pending_polls: u32,
    fail_created: bool,
    created: i64,
    pending: BTreeMap<String, u32>,
}

/// In-memory cloud used as a [`ProviderFactory`] in tests.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the code under test owns another. Snapshots created through the fake are
/// recorded but left out of listings unless [`FakeCloud::publish_created_snapshots`]
/// is called, like a provider whose listing lags behind creation.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a volume into `region`.
    pub fn add_volume(&self, region: &str, volume: Volume) {
        self.lock()
            .regions
            .entry(region.to_owned())
            .or_default()
            .volumes
            .push(volume);
    }

    /// Seeds a snapshot into `region`.
    pub fn add_snapshot(&self, region: &str, snapshot: Snapshot) {
        self.lock()
            .regions
            .entry(region.to_owned())
            .or_default()
            .snapshots
            .push(snapshot);
    }

    /// Sets the account alias returned by the factory.
    pub fn set_account_alias(&self, alias: Option<&str>) {
        self.lock().account_alias = alias.map(str::to_owned);
    }

    /// Makes account alias resolution fail.
    pub fn fail_account_alias(&self) {
        self.lock().fail_account_alias = true;
    }

    /// Makes every `operation` call in `region` fail.
    pub fn fail_on(&self, region: &str, operation: FakeOperation) {
        self.lock().failures.insert((region.to_owned(), operation));
    }

    /// Returns every volume in the region, attached or not, from volume
    /// listings. Used to exercise client-side filtering.
    pub fn ignore_state_filter(&self) {
        self.lock().ignore_state_filter = true;
    }

    /// Makes snapshots created through the fake visible to listings.
    pub fn publish_created_snapshots(&self) {
        self.lock().publish_created = true;
    }

    /// Created snapshots stay `pending` until they have been listed `polls`
    /// times. Zero creates them `completed`; `u32::MAX` never completes them.
    pub fn set_pending_polls(&self, polls: u32) {
        self.lock().pending_polls = polls;
    }

    /// Created snapshots report the `error` state.
    pub fn fail_created_snapshots(&self) {
        self.lock().fail_created = true;
    }

    /// Returns every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns the calls that changed provider state.
    #[must_use]
    pub fn mutation_calls(&self) -> Vec<ProviderCall> {
        self.calls()
            .into_iter()
            .filter(ProviderCall::is_mutation)
            .collect()
    }

    /// Returns the identifiers of the volumes still present in `region`.
    #[must_use]
    pub fn volume_ids(&self, region: &str) -> Vec<String> {
        self.lock()
            .regions
            .get(region)
            .map(|state| state.volumes.iter().map(|vol| vol.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the identifiers of the snapshots still present in `region`.
    #[must_use]
    pub fn snapshot_ids(&self, region: &str) -> Vec<String> {
        self.lock()
            .regions
            .get(region)
            .map(|state| state.snapshots.iter().map(|snap| snap.id.clone()).collect())
            .unwrap_or_default()
    }

    fn check(&self, region: &str, operation: FakeOperation) -> Result<(), FakeProviderError> {
        if self
            .lock()
            .failures
            .contains(&(region.to_owned(), operation))
        {
            return Err(FakeProviderError {
                region: region.to_owned(),
                operation,
            });
        }
        Ok(())
    }

    fn record(&self, call: ProviderCall) {
        self.lock().calls.push(call);
    }
}

impl ProviderFactory for FakeCloud {
    type Provider = FakeProvider;

    fn connect<'a>(
        &'a self,
        region: &'a str,
    ) -> ProviderFuture<'a, Self::Provider, FakeProviderError> {
        Box::pin(async move {
            self.record(ProviderCall::Connect {
                region: region.to_owned(),
            });
            self.check(region, FakeOperation::Connect)?;
            Ok(FakeProvider {
                region: region.to_owned(),
                cloud: self.clone(),
            })
        })
    }

    fn account_alias(&self) -> ProviderFuture<'_, Option<String>, FakeProviderError> {
        Box::pin(async move {
            let state = self.lock();
            if state.fail_account_alias {
                return Err(FakeProviderError {
                    region: String::from("global"),
                    operation: FakeOperation::AccountAlias,
                });
            }
            Ok(state.account_alias.clone())
        })
    }
}

/// Region-scoped view of a [`FakeCloud`].
#[derive(Clone, Debug)]
pub struct FakeProvider {
    region: String,
    cloud: FakeCloud,
}

impl FakeProvider {
    fn list_snapshots_now(&self, volume_id: &str) -> Vec<Snapshot> {
        let mut state = self.cloud.lock();
        let CloudState {
            regions, pending, ..
        } = &mut *state;
        let Some(region) = regions.get_mut(&self.region) else {
            return Vec::new();
        };
        region
            .snapshots
            .iter_mut()
            .filter(|snap| snap.volume_id == volume_id)
            .map(|snap| {
                if let Some(remaining) = pending.get_mut(&snap.id) {
                    if *remaining == 0 {
                        snap.state = SnapshotState::Completed;
                        pending.remove(&snap.id);
                    } else {
                        *remaining = remaining.saturating_sub(1);
                    }
                }
                snap.clone()
            })
            .collect()
    }

    fn create_snapshot_now(&self, request: &SnapshotRequest) -> Snapshot {
        let mut state = self.cloud.lock();
        state.created += 1;
        let id = format!("snap-created-{}", state.created);
        let pending_polls = state.pending_polls;
        let snapshot = Snapshot {
            id: id.clone(),
            volume_id: request.volume_id.clone(),
            start_time: timestamp(CREATED_SNAPSHOT_OFFSET_SECS + state.created),
            description: request.description.clone(),
            state: if state.fail_created {
                SnapshotState::Error
            } else if pending_polls == 0 {
                SnapshotState::Completed
            } else {
                SnapshotState::Pending
            },
        };
        if pending_polls > 0 && pending_polls != u32::MAX && !state.fail_created {
            state.pending.insert(id, pending_polls - 1);
        }
        if state.publish_created {
            state
                .regions
                .entry(self.region.clone())
                .or_default()
                .snapshots
                .push(snapshot.clone());
        }
        snapshot
    }
}

impl VolumeProvider for FakeProvider {
    type Error = FakeProviderError;

    fn region(&self) -> &str {
        &self.region
    }

    fn list_unattached_volumes(&self) -> ProviderFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            self.cloud.record(ProviderCall::ListVolumes {
                region: self.region.clone(),
            });
            self.cloud.check(&self.region, FakeOperation::ListVolumes)?;
            let state = self.cloud.lock();
            let ignore_filter = state.ignore_state_filter;
            Ok(state
                .regions
                .get(&self.region)
                .map(|region| {
                    region
                        .volumes
                        .iter()
                        .filter(|vol| ignore_filter || vol.is_unattached())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Snapshot>, Self::Error> {
        Box::pin(async move {
            self.cloud.record(ProviderCall::ListSnapshots {
                region: self.region.clone(),
                volume_id: volume_id.to_owned(),
            });
            self.cloud.check(&self.region, FakeOperation::ListSnapshots)?;
            Ok(self.list_snapshots_now(volume_id))
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> ProviderFuture<'a, Snapshot, Self::Error> {
        Box::pin(async move {
            self.cloud.record(ProviderCall::CreateSnapshot {
                region: self.region.clone(),
                request: request.clone(),
            });
            self.cloud.check(&self.region, FakeOperation::CreateSnapshot)?;
            Ok(self.create_snapshot_now(request))
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.cloud.record(ProviderCall::DeleteVolume {
                region: self.region.clone(),
                volume_id: volume_id.to_owned(),
            });
            self.cloud.check(&self.region, FakeOperation::DeleteVolume)?;
            if let Some(region) = self.cloud.lock().regions.get_mut(&self.region) {
                region.volumes.retain(|vol| vol.id != volume_id);
            }
            Ok(())
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.cloud.record(ProviderCall::DeleteSnapshot {
                region: self.region.clone(),
                snapshot_id: snapshot_id.to_owned(),
            });
            self.cloud.check(&self.region, FakeOperation::DeleteSnapshot)?;
            if let Some(region) = self.cloud.lock().regions.get_mut(&self.region) {
                region.snapshots.retain(|snap| snap.id != snapshot_id);
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// `None` values remove the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
