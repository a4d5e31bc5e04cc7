//! Per-region cleanup state machine.
//!
//! A region is processed in a fixed order: discover the unattached volumes
//! once, snapshot each of them, delete each of them, then prune each
//! volume's snapshots down to the newest one. The volume set discovered in
//! the first step is reused by every later phase. In dry-run mode every
//! create/delete call is replaced by a line on the action log prefixed with
//! `Dry run - `; read-only calls still happen.

use std::fmt;
use std::io::{self, Write};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{RunMode, SnapshotWait};
use crate::discovery::{discover_unattached, plan_pruning};
use crate::provider::{Snapshot, SnapshotRequest, Volume, VolumeProvider};

mod wait;

/// Step of the per-region workflow, used to label failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Building the regional provider client.
    Connect,
    /// Listing unattached volumes.
    Discover,
    /// Creating protective snapshots.
    Snapshot,
    /// Waiting for new snapshots to complete.
    Wait,
    /// Deleting unattached volumes.
    DeleteVolume,
    /// Deleting all but the newest snapshot of each volume.
    Prune,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Discover => "discovery",
            Self::Snapshot => "snapshot",
            Self::Wait => "snapshot wait",
            Self::DeleteVolume => "volume deletion",
            Self::Prune => "snapshot pruning",
        };
        f.write_str(name)
    }
}

/// Errors raised while cleaning up a region.
#[derive(Debug, Error)]
pub enum CleanupError<E>
where
    E: std::error::Error + 'static,
{
    /// A provider call failed.
    #[error("{phase} failed in {region}: {source}")]
    Provider {
        /// Phase in which the call was made.
        phase: Phase,
        /// Region being processed.
        region: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// A new snapshot did not complete before the wait timeout.
    #[error("snapshot {snapshot_id} of {volume_id} did not complete in time in {region}")]
    SnapshotTimeout {
        /// Snapshot being waited on.
        snapshot_id: String,
        /// Volume the snapshot protects.
        volume_id: String,
        /// Region being processed.
        region: String,
    },
    /// A new snapshot reported the `error` state.
    #[error("snapshot {snapshot_id} of {volume_id} failed in {region}")]
    SnapshotFailed {
        /// Failed snapshot.
        snapshot_id: String,
        /// Volume the snapshot protects.
        volume_id: String,
        /// Region being processed.
        region: String,
    },
    /// The action log could not be written.
    #[error("failed to write action log: {0}")]
    Log(#[from] io::Error),
}

impl<E: std::error::Error + 'static> CleanupError<E> {
    pub(crate) fn provider(phase: Phase, region: &str, source: E) -> Self {
        Self::Provider {
            phase,
            region: region.to_owned(),
            source,
        }
    }

    /// Phase in which the failure happened, when it is tied to one.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Provider { phase, .. } => Some(*phase),
            Self::SnapshotTimeout { .. } | Self::SnapshotFailed { .. } => Some(Phase::Wait),
            Self::Log(_) => None,
        }
    }
}

/// Outcome of cleaning up one region. In dry-run mode the counts describe
/// what would have been done.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RegionSummary {
    /// Region processed.
    pub region: String,
    /// Unattached volumes discovered.
    pub volumes_found: usize,
    /// Snapshots created (or announced).
    pub snapshots_created: usize,
    /// Volumes deleted (or announced).
    pub volumes_deleted: usize,
    /// Old snapshots deleted (or announced) by pruning.
    pub snapshots_pruned: usize,
}

/// Runs the cleanup workflow for one region at a time, writing one line per
/// planned or executed mutation to `out`.
#[derive(Debug)]
pub struct CleanupOrchestrator<W: Write> {
    mode: RunMode,
    snapshot_wait: Option<SnapshotWait>,
    out: W,
}

impl<W: Write> CleanupOrchestrator<W> {
    /// Creates an orchestrator that writes its action log to `out`.
    #[must_use]
    pub const fn new(mode: RunMode, out: W) -> Self {
        Self {
            mode,
            snapshot_wait: None,
            out,
        }
    }

    /// Waits for each new snapshot to complete before volumes are deleted.
    /// Only meaningful in live mode.
    #[must_use]
    pub const fn with_snapshot_wait(mut self, wait: Option<SnapshotWait>) -> Self {
        self.snapshot_wait = wait;
        self
    }

    /// Returns the action log sink.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Processes one region from discovery to pruning.
    ///
    /// The discovered volume set is frozen for the remainder of the region.
    /// An empty set makes every later phase a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError`] when a provider call fails, a snapshot wait
    /// does not succeed, or the action log cannot be written. The region may
    /// be partially processed at that point.
    pub async fn process_region<P: VolumeProvider>(
        &mut self,
        provider: &P,
    ) -> Result<RegionSummary, CleanupError<P::Error>> {
        let region = provider.region();
        let volumes = discover_unattached(provider)
            .await
            .map_err(|err| CleanupError::provider(Phase::Discover, region, err))?;
        info!(
            region,
            volumes = volumes.len(),
            dry_run = self.mode.is_dry_run(),
            "starting region cleanup"
        );

        let created = self.snapshot_phase(provider, &volumes).await?;
        if let Some(wait) = self.snapshot_wait {
            for snapshot in &created {
                self.wait_for_completion(provider, snapshot, wait).await?;
            }
        }
        let volumes_deleted = self.delete_phase(provider, &volumes).await?;
        let snapshots_pruned = self.prune_phase(provider, &volumes).await?;

        Ok(RegionSummary {
            region: region.to_owned(),
            volumes_found: volumes.len(),
            snapshots_created: if self.mode.is_dry_run() {
                volumes.len()
            } else {
                created.len()
            },
            volumes_deleted,
            snapshots_pruned,
        })
    }

    /// Snapshots every volume. Returns the snapshots created; always empty in
    /// dry-run mode.
    async fn snapshot_phase<P: VolumeProvider>(
        &mut self,
        provider: &P,
        volumes: &[Volume],
    ) -> Result<Vec<Snapshot>, CleanupError<P::Error>> {
        let region = provider.region();
        let mut created = Vec::new();
        for volume in volumes {
            self.announce(format_args!("Creating snapshot of {} - {region}", volume.id))?;
            if self.mode.is_dry_run() {
                continue;
            }
            let request = SnapshotRequest::for_unattached(&volume.id);
            let snapshot = provider
                .create_snapshot(&request)
                .await
                .map_err(|err| CleanupError::provider(Phase::Snapshot, region, err))?;
            info!(region, volume = %volume.id, snapshot = %snapshot.id, "snapshot started");
            created.push(snapshot);
        }
        Ok(created)
    }

    async fn delete_phase<P: VolumeProvider>(
        &mut self,
        provider: &P,
        volumes: &[Volume],
    ) -> Result<usize, CleanupError<P::Error>> {
        let region = provider.region();
        for volume in volumes {
            self.announce(format_args!("Deleting {} - {region}", volume.id))?;
            if self.mode.is_dry_run() {
                continue;
            }
            provider
                .delete_volume(&volume.id)
                .await
                .map_err(|err| CleanupError::provider(Phase::DeleteVolume, region, err))?;
        }
        Ok(volumes.len())
    }

    async fn prune_phase<P: VolumeProvider>(
        &mut self,
        provider: &P,
        volumes: &[Volume],
    ) -> Result<usize, CleanupError<P::Error>> {
        let region = provider.region();
        let mut pruned = 0;
        for volume in volumes {
            let plan = plan_pruning(provider, &volume.id)
                .await
                .map_err(|err| CleanupError::provider(Phase::Prune, region, err))?;
            pruned += plan.delete.len();

            if self.mode.is_dry_run() {
                // One line per volume, listing what would go.
                let doomed = plan.delete_ids().join(", ");
                if doomed.is_empty() {
                    self.announce(format_args!(
                        "Deleting snapshots of {} - {region}",
                        volume.id
                    ))?;
                } else {
                    self.announce(format_args!(
                        "Deleting snapshots of {} - {region}: {doomed}",
                        volume.id
                    ))?;
                }
                continue;
            }

            self.announce(format_args!("Deleting snapshots of {} - {region}", volume.id))?;
            for snapshot in &plan.delete {
                self.announce(format_args!("Deleting snapshot {} - {region}", snapshot.id))?;
                provider
                    .delete_snapshot(&snapshot.id)
                    .await
                    .map_err(|err| CleanupError::provider(Phase::Prune, region, err))?;
            }
        }
        Ok(pruned)
    }

    fn announce(&mut self, line: fmt::Arguments<'_>) -> io::Result<()> {
        writeln!(self.out, "{}{line}", self.mode.log_prefix())
    }
}
