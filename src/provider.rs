//! Provider abstraction over a cloud block-storage API.
//!
//! A [`VolumeProvider`] is bound to a single region; a [`ProviderFactory`]
//! hands out one provider per region so no client is shared between regions.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Description attached to every snapshot created by the janitor.
pub const SNAPSHOT_DESCRIPTION: &str = "Created by ebs-janitor";

/// Tag key used to label snapshots created by the janitor.
pub const SNAPSHOT_TAG_KEY: &str = "Description";

/// Prefix of the tag value; the source volume identifier is appended.
pub const SNAPSHOT_TAG_PREFIX: &str = "Unattached Volume Snapshot of ";

/// Attachment state reported for a volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum VolumeState {
    /// Not attached to any instance.
    Available,
    /// Attached to an instance.
    InUse,
    /// Any other provider state (`creating`, `deleting`, `error`, ...).
    Other(String),
}

impl VolumeState {
    /// Maps a provider state string onto a [`VolumeState`].
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "available" => Self::Available,
            "in-use" => Self::InUse,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A block-storage volume as observed at query time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Provider identifier, unique within the account.
    pub id: String,
    /// Size in GiB.
    pub size_gib: u32,
    /// Availability zone hosting the volume.
    pub availability_zone: String,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Attachment state.
    pub state: VolumeState,
}

impl Volume {
    /// Returns true when the volume is not attached to any instance.
    #[must_use]
    pub fn is_unattached(&self) -> bool {
        self.state == VolumeState::Available
    }
}

/// Progress state reported for a snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum SnapshotState {
    /// Snapshot data is still being copied.
    Pending,
    /// Snapshot is complete and usable.
    Completed,
    /// Snapshot creation failed.
    Error,
    /// Any other provider state.
    Other(String),
}

impl SnapshotState {
    /// Maps a provider state string onto a [`SnapshotState`].
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A point-in-time snapshot of a volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Snapshot {
    /// Provider identifier.
    pub id: String,
    /// Identifier of the volume the snapshot was taken from.
    pub volume_id: String,
    /// Time at which the snapshot was started.
    pub start_time: DateTime<Utc>,
    /// Free-form description.
    pub description: String,
    /// Progress state.
    pub state: SnapshotState,
}

/// Parameters for creating a snapshot of an unattached volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRequest {
    /// Volume to snapshot.
    pub volume_id: String,
    /// Description stored on the snapshot.
    pub description: String,
    /// Tags applied to the snapshot at creation time.
    pub tags: Vec<(String, String)>,
}

impl SnapshotRequest {
    /// Builds the request used before deleting an unattached volume.
    #[must_use]
    pub fn for_unattached(volume_id: &str) -> Self {
        Self {
            volume_id: volume_id.to_owned(),
            description: SNAPSHOT_DESCRIPTION.to_owned(),
            tags: vec![(
                SNAPSHOT_TAG_KEY.to_owned(),
                format!("{SNAPSHOT_TAG_PREFIX}{volume_id}"),
            )],
        }
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations the janitor needs from a region-scoped block-storage API.
pub trait VolumeProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Region this provider is bound to.
    fn region(&self) -> &str;

    /// Lists volumes in the `available` state. Returns an empty list when
    /// none exist.
    fn list_unattached_volumes(&self) -> ProviderFuture<'_, Vec<Volume>, Self::Error>;

    /// Lists every snapshot whose parent is `volume_id`.
    fn list_snapshots<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Snapshot>, Self::Error>;

    /// Starts a snapshot. Completion is asynchronous on the provider side.
    fn create_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> ProviderFuture<'a, Snapshot, Self::Error>;

    /// Irreversibly destroys a volume.
    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Irreversibly destroys a snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str)
    -> ProviderFuture<'a, (), Self::Error>;
}

/// Builds region-scoped providers and answers account-level questions.
pub trait ProviderFactory {
    /// Provider handed out for each region.
    type Provider: VolumeProvider;

    /// Connects a fresh provider client for `region`.
    fn connect<'a>(
        &'a self,
        region: &'a str,
    ) -> ProviderFuture<'a, Self::Provider, <Self::Provider as VolumeProvider>::Error>;

    /// Resolves the human-friendly account alias, if one is configured.
    fn account_alias(
        &self,
    ) -> ProviderFuture<'_, Option<String>, <Self::Provider as VolumeProvider>::Error>;
}

/// Shorthand for the error type of a factory's providers.
pub type FactoryError<F> = <<F as ProviderFactory>::Provider as VolumeProvider>::Error;

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::InUse => f.write_str("in-use"),
            Self::Other(value) => f.write_str(value),
        }
    }
}
