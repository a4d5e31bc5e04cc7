//! Command-line interface definitions for the `ebs-janitor` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must not depend on the library crate.

use clap::Parser;

/// Top-level CLI for the `ebs-janitor` binary.
///
/// Flags override the layered settings read from `ebs-janitor.toml` and
/// `EBS_JANITOR_*` environment variables.
#[derive(Debug, Parser)]
#[command(
    name = "ebs-janitor",
    about = "Snapshot, delete, and prune unattached EBS volumes across regions"
)]
pub(crate) struct Cli {
    /// Announce every snapshot and deletion without performing it (`true`
    /// or `false`). Required; there is no default.
    #[arg(long, env = "DRY_RUN", value_name = "BOOL")]
    pub(crate) dry_run: Option<String>,
    /// Comma-separated regions to process, in order.
    #[arg(long, value_name = "LIST")]
    pub(crate) regions: Option<String>,
    /// Directory receiving the audit CSV file.
    #[arg(long, value_name = "DIR")]
    pub(crate) output_dir: Option<String>,
    /// Skip the audit CSV export.
    #[arg(long)]
    pub(crate) no_audit: bool,
    /// Stop at the first region failure instead of moving on.
    #[arg(long)]
    pub(crate) fail_fast: bool,
    /// Wait for new snapshots to complete before deleting volumes.
    #[arg(long)]
    pub(crate) wait_for_snapshots: bool,
    /// Print the run report as JSON after the action log.
    #[arg(long)]
    pub(crate) summary_json: bool,
}
