//! Cleanup of unattached block-storage volumes.
//!
//! The crate inventories AWS EBS volumes that are not attached to any
//! instance, writes a CSV audit of them, and then, region by region,
//! snapshots each volume, deletes it, and prunes its snapshots down to the
//! newest one. A dry-run mode replaces every mutation with a log line.
//!
//! Provider access goes through the [`VolumeProvider`] and
//! [`ProviderFactory`] traits; [`AwsProviderFactory`] is the production
//! implementation and [`test_support::FakeCloud`] an in-memory one.

pub mod audit;
pub mod aws;
pub mod cleanup;
pub mod config;
pub mod discovery;
pub mod janitor;
pub mod provider;
pub mod test_support;

pub use audit::{AuditError, AuditExporter, AuditSummary, UNKNOWN_ACCOUNT_ALIAS, audit_file_name};
pub use aws::{AwsProviderError, AwsProviderFactory, Ec2Provider};
pub use cleanup::{CleanupError, CleanupOrchestrator, Phase, RegionSummary};
pub use config::{
    ConfigError, DEFAULT_REGIONS, DRY_RUN_ENV, FailurePolicy, JanitorSettings, MAX_SNAPSHOT_WAIT_SECS, RunConfig, RunMode,
    SnapshotWait,
};
pub use discovery::{PrunePlan, discover_unattached, newest_first, plan_pruning};
pub use janitor::{Janitor, RegionOutcome, RunReport, SweepError};
pub use provider::{
    FactoryError, ProviderFactory, ProviderFuture, Snapshot, SnapshotRequest, SnapshotState,
    Volume, VolumeProvider, VolumeState,
};
