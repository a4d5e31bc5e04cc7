//! Configuration loading via `ortho-config` and the immutable run
//! configuration derived from it.

use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable carrying the dry-run flag.
pub const DRY_RUN_ENV: &str = "DRY_RUN";

/// Regions processed when nothing else is configured.
pub const DEFAULT_REGIONS: &str = "us-east-1,us-east-2";

/// Longest accepted wait for a single snapshot, in seconds (one day).
pub const MAX_SNAPSHOT_WAIT_SECS: u64 = 86_400;

/// Region used for account-level calls when no region is configured.
pub const FALLBACK_HOME_REGION: &str = "us-east-1";

/// Layered janitor settings derived from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "EBS_JANITOR",
    discovery(
        app_name = "ebs-janitor",
        env_var = "EBS_JANITOR_CONFIG_PATH",
        config_file_name = "ebs-janitor.toml",
        dotfile_name = ".ebs-janitor.toml",
        project_file_name = "ebs-janitor.toml"
    )
)]
pub struct JanitorSettings {
    /// Comma-separated list of regions, processed in the order given.
    #[ortho_config(default = DEFAULT_REGIONS.to_owned())]
    pub regions: String,
    /// Whether the CSV audit file is written before cleanup starts.
    #[ortho_config(default = true)]
    pub export_audit: bool,
    /// Directory receiving the audit file.
    #[ortho_config(default = ".".to_owned())]
    pub output_dir: String,
    /// Abort the whole run on the first region failure instead of moving on
    /// to the next region.
    #[ortho_config(default = false)]
    pub fail_fast: bool,
    /// Wait for new snapshots to complete before deleting their volumes.
    #[ortho_config(default = false)]
    pub wait_for_snapshots: bool,
    /// Seconds between snapshot state polls when waiting.
    #[ortho_config(default = 15)]
    pub snapshot_poll_interval_secs: u64,
    /// Upper bound, in seconds, on the wait for a single snapshot.
    #[ortho_config(default = 900)]
    pub snapshot_wait_timeout_secs: u64,
    /// Custom EC2/IAM endpoint, for example a LocalStack URL.
    pub endpoint_url: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn message(&self, problem: &str) -> String {
        format!(
            "{} {problem}: set {} or add {} to ebs-janitor.toml",
            self.description, self.env_var, self.toml_key
        )
    }

    fn error(&self, problem: &str) -> ConfigError {
        ConfigError::InvalidField(self.message(problem))
    }
}

const REGIONS_FIELD: FieldMetadata =
    FieldMetadata::new("region list", "EBS_JANITOR_REGIONS", "regions");
const OUTPUT_DIR_FIELD: FieldMetadata =
    FieldMetadata::new("audit output directory", "EBS_JANITOR_OUTPUT_DIR", "output_dir");
const POLL_INTERVAL_FIELD: FieldMetadata = FieldMetadata::new(
    "snapshot poll interval",
    "EBS_JANITOR_SNAPSHOT_POLL_INTERVAL_SECS",
    "snapshot_poll_interval_secs",
);
const WAIT_TIMEOUT_FIELD: FieldMetadata = FieldMetadata::new(
    "snapshot wait timeout",
    "EBS_JANITOR_SNAPSHOT_WAIT_TIMEOUT_SECS",
    "snapshot_wait_timeout_secs",
);
const ENDPOINT_FIELD: FieldMetadata =
    FieldMetadata::new("endpoint URL", "EBS_JANITOR_ENDPOINT_URL", "endpoint_url");

impl JanitorSettings {
    /// Loads settings without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ebs-janitor")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the configured regions in order, trimmed, with blanks and
    /// repeats removed.
    #[must_use]
    pub fn region_list(&self) -> Vec<String> {
        parse_regions(&self.regions)
    }

    /// Performs semantic validation on the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRegions`] when the region list is empty and
    /// [`ConfigError::InvalidField`] for any other unusable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region_list().is_empty() {
            return Err(ConfigError::NoRegions(REGIONS_FIELD.message("is empty")));
        }
        if self.export_audit && self.output_dir.trim().is_empty() {
            return Err(OUTPUT_DIR_FIELD.error("is empty"));
        }
        if self.wait_for_snapshots {
            if self.snapshot_poll_interval_secs == 0 {
                return Err(POLL_INTERVAL_FIELD.error("must be greater than zero"));
            }
            if self.snapshot_wait_timeout_secs < self.snapshot_poll_interval_secs {
                return Err(WAIT_TIMEOUT_FIELD.error("must not be shorter than the poll interval"));
            }
            if self.snapshot_wait_timeout_secs > MAX_SNAPSHOT_WAIT_SECS {
                return Err(WAIT_TIMEOUT_FIELD.error(&format!(
                    "must not exceed {MAX_SNAPSHOT_WAIT_SECS} seconds"
                )));
            }
        }
        if self
            .endpoint_url
            .as_deref()
            .is_some_and(|url| url.trim().is_empty())
        {
            return Err(ENDPOINT_FIELD.error("is empty"));
        }
        Ok(())
    }

    /// Validates the settings and freezes them into a [`RunConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn into_run_config(self, mode: RunMode, date: NaiveDate) -> Result<RunConfig, ConfigError> {
        self.validate()?;
        let regions = self.region_list();
        let audit = self.export_audit.then(|| AuditTarget {
            output_dir: Utf8PathBuf::from(self.output_dir.trim()),
        });
        let snapshot_wait = self.wait_for_snapshots.then(|| SnapshotWait {
            poll_interval: Duration::from_secs(self.snapshot_poll_interval_secs),
            timeout: Duration::from_secs(self.snapshot_wait_timeout_secs),
        });
        let failure_policy = if self.fail_fast {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Isolate
        };
        Ok(RunConfig {
            mode,
            regions,
            audit,
            date,
            failure_policy,
            snapshot_wait,
        })
    }
}

fn parse_regions(raw: &str) -> Vec<String> {
    let mut regions: Vec<String> = Vec::new();
    for region in raw.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if !regions.iter().any(|seen| seen == region) {
            regions.push(region.to_owned());
        }
    }
    regions
}

/// Whether mutating provider calls are executed or only announced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every create/delete call is replaced by an intent log line.
    DryRun,
    /// Create/delete calls are sent to the provider.
    Live,
}

impl RunMode {
    /// Parses the raw dry-run flag. Only `true` and `false` are accepted
    /// (case-insensitive, surrounding whitespace ignored); an unset or blank
    /// flag is an error rather than a default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDryRun`] for anything else.
    pub fn from_flag(raw: Option<&str>) -> Result<Self, ConfigError> {
        raw.map_or_else(
            || {
                Err(ConfigError::InvalidDryRun {
                    value: String::new(),
                })
            },
            str::parse,
        )
    }

    /// Returns true when mutations are suppressed.
    #[must_use]
    pub const fn is_dry_run(self) -> bool {
        matches!(self, Self::DryRun)
    }

    /// Prefix applied to every action log line.
    #[must_use]
    pub const fn log_prefix(self) -> &'static str {
        match self {
            Self::DryRun => "Dry run - ",
            Self::Live => "",
        }
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value.trim();
        if normalised.eq_ignore_ascii_case("true") {
            Ok(Self::DryRun)
        } else if normalised.eq_ignore_ascii_case("false") {
            Ok(Self::Live)
        } else {
            Err(ConfigError::InvalidDryRun {
                value: value.to_owned(),
            })
        }
    }
}

/// What to do when a region fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum FailurePolicy {
    /// Record the failure and continue with the next region.
    #[default]
    Isolate,
    /// Stop the run at the first failure.
    Abort,
}

/// Where the audit file is written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuditTarget {
    /// Directory receiving the CSV file.
    pub output_dir: Utf8PathBuf,
}

/// Polling parameters for the optional snapshot completion wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapshotWait {
    /// Delay between two state polls.
    pub poll_interval: Duration,
    /// Maximum time spent waiting for one snapshot.
    pub timeout: Duration,
}

/// Immutable configuration for one janitor run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunConfig {
    /// Dry-run or live.
    pub mode: RunMode,
    /// Regions in processing order.
    pub regions: Vec<String>,
    /// Audit destination; `None` disables the export.
    pub audit: Option<AuditTarget>,
    /// Date stamp used in the audit file name.
    pub date: NaiveDate,
    /// Region failure handling.
    pub failure_policy: FailurePolicy,
    /// Snapshot completion wait; `None` keeps snapshot creation
    /// fire-and-forget.
    pub snapshot_wait: Option<SnapshotWait>,
}

impl RunConfig {
    /// Builds a configuration with the defaults used by tests and embedders:
    /// audit disabled, isolated failures, no snapshot wait.
    #[must_use]
    pub fn new(mode: RunMode, regions: Vec<String>, date: NaiveDate) -> Self {
        Self {
            mode,
            regions,
            audit: None,
            date,
            failure_policy: FailurePolicy::Isolate,
            snapshot_wait: None,
        }
    }

    /// Region used for account-level calls: the first configured region.
    #[must_use]
    pub fn home_region(&self) -> &str {
        self.regions
            .first()
            .map_or(FALLBACK_HOME_REGION, String::as_str)
    }

    /// Enables the audit export into `output_dir`.
    #[must_use]
    pub fn with_audit(mut self, output_dir: impl Into<Utf8PathBuf>) -> Self {
        self.audit = Some(AuditTarget {
            output_dir: output_dir.into(),
        });
        self
    }

    /// Sets the region failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enables the snapshot completion wait.
    #[must_use]
    pub const fn with_snapshot_wait(mut self, wait: SnapshotWait) -> Self {
        self.snapshot_wait = Some(wait);
        self
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The dry-run flag is unset, blank, or not a boolean.
    #[error(
        "invalid {DRY_RUN_ENV} value '{value}': set {DRY_RUN_ENV} (or --dry-run) to 'true' or 'false'"
    )]
    InvalidDryRun {
        /// Raw value that failed to parse.
        value: String,
    },
    /// No regions remain after parsing.
    #[error("no regions configured: {0}")]
    NoRegions(String),
    /// A field holds an unusable value.
    #[error("invalid configuration: {0}")]
    InvalidField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
