//! Conversions from EC2 SDK shapes into provider types.

use aws_sdk_ec2::operation::create_snapshot::CreateSnapshotOutput;
use aws_sdk_ec2::primitives::DateTime as SdkDateTime;
use aws_sdk_ec2::types;
use chrono::{DateTime, Utc};

use super::AwsProviderError;
use crate::provider::{Snapshot, SnapshotState, Volume, VolumeState};

const DESCRIBE_VOLUMES: &str = "DescribeVolumes";

/// Snapshot fields shared by `DescribeSnapshots` items and the
/// `CreateSnapshot` response.
pub(super) struct SnapshotFields<'a> {
    id: Option<&'a str>,
    volume_id: Option<&'a str>,
    start_time: Option<&'a SdkDateTime>,
    description: Option<&'a str>,
    state: Option<&'a types::SnapshotState>,
}

impl<'a> From<&'a types::Snapshot> for SnapshotFields<'a> {
    fn from(snapshot: &'a types::Snapshot) -> Self {
        Self {
            id: snapshot.snapshot_id(),
            volume_id: snapshot.volume_id(),
            start_time: snapshot.start_time(),
            description: snapshot.description(),
            state: snapshot.state(),
        }
    }
}

impl<'a> From<&'a CreateSnapshotOutput> for SnapshotFields<'a> {
    fn from(output: &'a CreateSnapshotOutput) -> Self {
        Self {
            id: output.snapshot_id(),
            volume_id: output.volume_id(),
            start_time: output.start_time(),
            description: output.description(),
            state: output.state(),
        }
    }
}

fn invalid(operation: &'static str, region: &str, detail: String) -> AwsProviderError {
    AwsProviderError::InvalidResponse {
        operation,
        region: region.to_owned(),
        detail,
    }
}

fn to_utc(timestamp: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

/// Converts a `DescribeVolumes` item.
pub(super) fn volume_from_sdk(
    region: &str,
    volume: &types::Volume,
) -> Result<Volume, AwsProviderError> {
    let id = volume
        .volume_id()
        .ok_or_else(|| invalid(DESCRIBE_VOLUMES, region, String::from("volume without id")))?;
    let size_gib = volume
        .size()
        .and_then(|size| u32::try_from(size).ok())
        .ok_or_else(|| invalid(DESCRIBE_VOLUMES, region, format!("{id} has no usable size")))?;
    let create_time = volume
        .create_time()
        .and_then(to_utc)
        .ok_or_else(|| invalid(DESCRIBE_VOLUMES, region, format!("{id} has no create time")))?;
    // A missing state never counts as available.
    let state = volume.state().map_or_else(
        || VolumeState::Other(String::from("unknown")),
        |state| VolumeState::from_provider(state.as_str()),
    );

    Ok(Volume {
        id: id.to_owned(),
        size_gib,
        availability_zone: volume.availability_zone().unwrap_or_default().to_owned(),
        create_time,
        state,
    })
}

/// Converts snapshot fields; `volume_id` stands in when the response omits
/// the parent volume.
pub(super) fn snapshot_from_sdk(
    operation: &'static str,
    region: &str,
    volume_id: &str,
    fields: SnapshotFields<'_>,
) -> Result<Snapshot, AwsProviderError> {
    let id = fields
        .id
        .ok_or_else(|| invalid(operation, region, String::from("snapshot without id")))?;
    let start_time = fields
        .start_time
        .and_then(to_utc)
        .ok_or_else(|| invalid(operation, region, format!("{id} has no start time")))?;
    let state = fields.state.map_or_else(
        || SnapshotState::Other(String::from("unknown")),
        |state| SnapshotState::from_provider(state.as_str()),
    );

    Ok(Snapshot {
        id: id.to_owned(),
        volume_id: fields.volume_id.unwrap_or(volume_id).to_owned(),
        start_time,
        description: fields.description.unwrap_or_default().to_owned(),
        state,
    })
}
