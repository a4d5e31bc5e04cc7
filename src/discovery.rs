//! Discovery of unattached volumes and snapshot ordering.

use tracing::{debug, warn};

use crate::provider::{Snapshot, Volume, VolumeProvider};

/// Lists the unattached volumes of the provider's region.
///
/// Providers are expected to filter server-side; anything that is not in the
/// `available` state is dropped here as well, so a provider that ignores the
/// filter cannot widen the set of volumes the janitor acts on.
///
/// # Errors
///
/// Returns the provider error unchanged.
pub async fn discover_unattached<P: VolumeProvider>(provider: &P) -> Result<Vec<Volume>, P::Error> {
    let listed = provider.list_unattached_volumes().await?;
    let total = listed.len();
    let volumes: Vec<Volume> = listed.into_iter().filter(Volume::is_unattached).collect();
    if volumes.len() != total {
        warn!(
            region = provider.region(),
            dropped = total - volumes.len(),
            "provider returned attached volumes for an unattached query"
        );
    }
    debug!(region = provider.region(), count = volumes.len(), "discovered unattached volumes");
    Ok(volumes)
}

/// Sorts snapshots by start time, newest first.
///
/// The sort is stable: snapshots sharing a start time keep the order the
/// provider returned them in, which makes the "newest" choice among equal
/// timestamps depend on provider ordering.
#[must_use]
pub fn newest_first(mut snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
    snapshots.sort_by(|left, right| right.start_time.cmp(&left.start_time));
    snapshots
}

/// Which snapshots of a volume survive pruning and which go.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PrunePlan {
    /// Newest snapshot, retained.
    pub keep: Option<Snapshot>,
    /// Every other snapshot, newest first.
    pub delete: Vec<Snapshot>,
}

impl PrunePlan {
    /// Plans the pruning of one volume's snapshots.
    #[must_use]
    pub fn from_snapshots(snapshots: Vec<Snapshot>) -> Self {
        let mut ordered = newest_first(snapshots).into_iter();
        let keep = ordered.next();
        Self {
            keep,
            delete: ordered.collect(),
        }
    }

    /// Identifiers of the snapshots slated for deletion.
    #[must_use]
    pub fn delete_ids(&self) -> Vec<&str> {
        self.delete.iter().map(|snapshot| snapshot.id.as_str()).collect()
    }
}

/// Lists a volume's snapshots and plans their pruning.
///
/// # Errors
///
/// Returns the provider error unchanged.
pub async fn plan_pruning<P: VolumeProvider>(
    provider: &P,
    volume_id: &str,
) -> Result<PrunePlan, P::Error> {
    let snapshots = provider.list_snapshots(volume_id).await?;
    Ok(PrunePlan::from_snapshots(snapshots))
}
