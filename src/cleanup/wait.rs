//! Optional wait for new snapshots to complete before volumes are deleted.

use std::io::Write;
use std::time::Instant;

use tokio::time::sleep;
use tracing::debug;

use crate::config::SnapshotWait;
use crate::provider::{Snapshot, SnapshotState, VolumeProvider};

use super::{CleanupError, CleanupOrchestrator, Phase};

impl<W: Write> CleanupOrchestrator<W> {
    /// Polls the volume's snapshots until `snapshot` reports `completed`.
    pub(super) async fn wait_for_completion<P: VolumeProvider>(
        &self,
        provider: &P,
        snapshot: &Snapshot,
        wait: SnapshotWait,
    ) -> Result<(), CleanupError<P::Error>> {
        if snapshot.state == SnapshotState::Completed {
            return Ok(());
        }

        let region = provider.region();
        let started = Instant::now();
        while started.elapsed() <= wait.timeout {
            let listed = provider
                .list_snapshots(&snapshot.volume_id)
                .await
                .map_err(|err| CleanupError::provider(Phase::Wait, region, err))?;
            let state = listed
                .into_iter()
                .find(|candidate| candidate.id == snapshot.id)
                .map(|found| found.state);

            match state {
                Some(SnapshotState::Completed) => return Ok(()),
                Some(SnapshotState::Error) => {
                    return Err(CleanupError::SnapshotFailed {
                        snapshot_id: snapshot.id.clone(),
                        volume_id: snapshot.volume_id.clone(),
                        region: region.to_owned(),
                    });
                }
                other => {
                    debug!(region, snapshot = %snapshot.id, state = ?other, "snapshot not complete yet");
                }
            }
            sleep(wait.poll_interval).await;
        }

        Err(CleanupError::SnapshotTimeout {
            snapshot_id: snapshot.id.clone(),
            volume_id: snapshot.volume_id.clone(),
            region: region.to_owned(),
        })
    }
}
