//! Point-in-time CSV audit of unattached volumes.
//!
//! The export runs once per invocation, before any mutation, using its own
//! discovery pass over every configured region. Rows follow region order,
//! then provider order.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{AuditTarget, FailurePolicy};
use crate::discovery::discover_unattached;
use crate::provider::{FactoryError, ProviderFactory, Volume};

mod writer;

pub use writer::{AUDIT_HEADER, AuditRecord, AuditWriter};

/// Alias used in the file name when the account alias cannot be resolved.
pub const UNKNOWN_ACCOUNT_ALIAS: &str = "unknown";

/// Builds `<alias>_unattached_ebs_<YYYY-MM-DD>.csv`.
#[must_use]
pub fn audit_file_name(alias: &str, date: NaiveDate) -> String {
    format!("{alias}_unattached_ebs_{}.csv", date.format("%Y-%m-%d"))
}

/// Result of an audit export.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AuditSummary {
    /// File written.
    pub path: Utf8PathBuf,
    /// Data rows written, excluding the header.
    pub rows: usize,
    /// Regions left out of the audit because discovery failed.
    pub failed_regions: Vec<String>,
}

/// Errors raised while producing the audit file.
#[derive(Debug, Error)]
pub enum AuditError<E>
where
    E: std::error::Error + 'static,
{
    /// The output directory or file could not be created or written.
    #[error("audit I/O error at {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// A row could not be encoded.
    #[error("failed to encode audit file {path}: {message}")]
    Csv {
        /// File being written.
        path: Utf8PathBuf,
        /// Encoder error message.
        message: String,
    },
    /// Discovery failed in a region and the run is configured to abort.
    #[error("audit discovery failed in {region}: {source}")]
    Provider {
        /// Region that failed.
        region: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
}

/// Writes the audit file for a set of regions.
#[derive(Debug)]
pub struct AuditExporter<'a, F: ProviderFactory> {
    factory: &'a F,
    target: &'a AuditTarget,
    policy: FailurePolicy,
}

impl<'a, F: ProviderFactory> AuditExporter<'a, F> {
    /// Creates an exporter writing into `target`.
    #[must_use]
    pub const fn new(factory: &'a F, target: &'a AuditTarget, policy: FailurePolicy) -> Self {
        Self {
            factory,
            target,
            policy,
        }
    }

    /// Discovers the unattached volumes of every region and writes them to
    /// `<alias>_unattached_ebs_<date>.csv`, replacing any existing file.
    ///
    /// Discovery completes for all regions before the file is opened.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Provider`] when a region fails under
    /// [`FailurePolicy::Abort`], and [`AuditError::Io`] or
    /// [`AuditError::Csv`] when the file cannot be written. Write failures
    /// are fatal regardless of policy.
    pub async fn export(
        &self,
        regions: &[String],
        date: NaiveDate,
    ) -> Result<AuditSummary, AuditError<FactoryError<F>>> {
        let alias = self.resolve_alias().await;
        let mut volumes: Vec<Volume> = Vec::new();
        let mut failed_regions = Vec::new();

        for region in regions {
            match self.discover(region).await {
                Ok(found) => volumes.extend(found),
                Err(err) => match self.policy {
                    FailurePolicy::Abort => {
                        return Err(AuditError::Provider {
                            region: region.clone(),
                            source: err,
                        });
                    }
                    FailurePolicy::Isolate => {
                        error!(region = %region, error = %err, "audit discovery failed; region skipped");
                        failed_regions.push(region.clone());
                    }
                },
            }
        }

        let path = self
            .target
            .output_dir
            .join(audit_file_name(&alias, date));
        let rows =
            write_audit_file::<FactoryError<F>>(&self.target.output_dir, &path, &volumes)?;
        info!(path = %path, rows, "audit file written");

        Ok(AuditSummary {
            path,
            rows,
            failed_regions,
        })
    }

    async fn discover(&self, region: &str) -> Result<Vec<Volume>, FactoryError<F>> {
        let provider = self.factory.connect(region).await?;
        discover_unattached(&provider).await
    }

    async fn resolve_alias(&self) -> String {
        match self.factory.account_alias().await {
            Ok(Some(alias)) if !alias.trim().is_empty() => alias.trim().to_owned(),
            Ok(_) => {
                warn!("account has no alias; using '{UNKNOWN_ACCOUNT_ALIAS}'");
                UNKNOWN_ACCOUNT_ALIAS.to_owned()
            }
            Err(err) => {
                warn!(error = %err, "failed to resolve account alias; using '{UNKNOWN_ACCOUNT_ALIAS}'");
                UNKNOWN_ACCOUNT_ALIAS.to_owned()
            }
        }
    }
}

fn write_audit_file<E: std::error::Error + 'static>(
    dir_path: &Utf8Path,
    path: &Utf8Path,
    volumes: &[Volume],
) -> Result<usize, AuditError<E>> {
    Dir::create_ambient_dir_all(dir_path, ambient_authority())
        .map_err(|err| io_error::<E>(dir_path, &err))?;
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| io_error::<E>(dir_path, &err))?;
    let file_name = path.file_name().unwrap_or_else(|| path.as_str());
    let file = dir.create(file_name).map_err(|err| io_error::<E>(path, &err))?;

    let mut writer = AuditWriter::new(file).map_err(|err| csv_error::<E>(path, &err))?;
    for volume in volumes {
        writer
            .write_volume(volume)
            .map_err(|err| csv_error::<E>(path, &err))?;
    }
    writer.finish().map_err(|err| csv_error::<E>(path, &err))
}

fn io_error<E: std::error::Error + 'static>(
    path: &Utf8Path,
    err: &std::io::Error,
) -> AuditError<E> {
    AuditError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn csv_error<E: std::error::Error + 'static>(
    path: &Utf8Path,
    err: &csv::Error,
) -> AuditError<E> {
    AuditError::Csv {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
