//! Region iteration driver.
//!
//! A sweep writes the audit file for every configured region first, then
//! runs the cleanup workflow region by region, in configured order, each
//! with a freshly connected provider. Region failures are isolated by
//! default; with [`FailurePolicy::Abort`] the first failure ends the sweep.

use std::io::Write;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::audit::{AuditError, AuditExporter, AuditSummary};
use crate::cleanup::{CleanupError, CleanupOrchestrator, Phase, RegionSummary};
use crate::config::{FailurePolicy, RunConfig, RunMode};
use crate::provider::{FactoryError, ProviderFactory};

/// Outcome of one region in a sweep.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionOutcome {
    /// Every phase ran to completion.
    Completed(RegionSummary),
    /// A phase failed; the region may be partially processed.
    Failed {
        /// Region that failed.
        region: String,
        /// Phase that failed, when known.
        phase: Option<Phase>,
        /// Failure description.
        message: String,
    },
    /// The region was not touched.
    Skipped {
        /// Region left alone.
        region: String,
        /// Why it was skipped.
        reason: String,
    },
}

impl RegionOutcome {
    /// Region this outcome describes.
    #[must_use]
    pub fn region(&self) -> &str {
        match self {
            Self::Completed(summary) => &summary.region,
            Self::Failed { region, .. } | Self::Skipped { region, .. } => region,
        }
    }

    /// Returns true unless the region completed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Completed(_))
    }
}

/// Report of a whole sweep.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RunReport {
    /// Mode the sweep ran in.
    pub mode: RunMode,
    /// Date stamp of the run.
    pub date: NaiveDate,
    /// Audit export result; `None` when the export is disabled.
    pub audit: Option<AuditSummary>,
    /// Per-region outcomes, in processing order.
    pub regions: Vec<RegionOutcome>,
}

impl RunReport {
    /// Returns true when any region failed or was skipped.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.regions.iter().any(RegionOutcome::is_failure)
    }
}

/// Errors that end a sweep early.
#[derive(Debug, Error)]
pub enum SweepError<E>
where
    E: std::error::Error + 'static,
{
    /// The audit file could not be produced.
    #[error("audit export failed: {0}")]
    Audit(#[from] AuditError<E>),
    /// A region failed under [`FailurePolicy::Abort`].
    #[error("sweep aborted in {region}: {source}")]
    Region {
        /// Region that failed.
        region: String,
        /// Cleanup failure.
        #[source]
        source: CleanupError<E>,
    },
}

/// Drives the audit export and per-region cleanup for one run.
#[derive(Clone, Debug)]
pub struct Janitor<F: ProviderFactory> {
    factory: F,
    config: RunConfig,
}

impl<F: ProviderFactory> Janitor<F> {
    /// Creates a janitor for `config` using `factory` to reach the provider.
    #[must_use]
    pub const fn new(factory: F, config: RunConfig) -> Self {
        Self { factory, config }
    }

    /// Returns the run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs the audit export, then cleans up every region, writing action
    /// lines to `out`.
    ///
    /// Regions whose audit discovery failed are skipped so that nothing is
    /// deleted without first appearing in the audit.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Audit`] when the audit cannot be written (or a
    /// region's audit discovery fails under [`FailurePolicy::Abort`]) and
    /// [`SweepError::Region`] for the first region failure under
    /// [`FailurePolicy::Abort`]. Under [`FailurePolicy::Isolate`] region
    /// failures are recorded in the returned [`RunReport`] instead.
    pub async fn sweep<W: Write>(
        &self,
        out: W,
    ) -> Result<RunReport, SweepError<FactoryError<F>>> {
        let config = &self.config;
        let audit = match &config.audit {
            Some(target) => Some(
                AuditExporter::new(&self.factory, target, config.failure_policy)
                    .export(&config.regions, config.date)
                    .await?,
            ),
            None => {
                info!("audit export disabled");
                None
            }
        };
        let unaudited = audit
            .as_ref()
            .map(|summary| summary.failed_regions.clone())
            .unwrap_or_default();

        let mut orchestrator =
            CleanupOrchestrator::new(config.mode, out).with_snapshot_wait(config.snapshot_wait);
        let mut regions = Vec::with_capacity(config.regions.len());
        for region in &config.regions {
            if unaudited.contains(region) {
                warn!(region = %region, "skipping region missing from the audit");
                regions.push(RegionOutcome::Skipped {
                    region: region.clone(),
                    reason: String::from("audit discovery failed"),
                });
                continue;
            }

            match self.clean_region(&mut orchestrator, region).await {
                Ok(summary) => {
                    info!(
                        region = %region,
                        volumes = summary.volumes_found,
                        pruned = summary.snapshots_pruned,
                        "region cleanup finished"
                    );
                    regions.push(RegionOutcome::Completed(summary));
                }
                Err(err) => {
                    error!(region = %region, error = %err, "region cleanup failed");
                    if config.failure_policy == FailurePolicy::Abort {
                        return Err(SweepError::Region {
                            region: region.clone(),
                            source: err,
                        });
                    }
                    regions.push(RegionOutcome::Failed {
                        region: region.clone(),
                        phase: err.phase(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(RunReport {
            mode: config.mode,
            date: config.date,
            audit,
            regions,
        })
    }

    async fn clean_region<W: Write>(
        &self,
        orchestrator: &mut CleanupOrchestrator<W>,
        region: &str,
    ) -> Result<RegionSummary, CleanupError<FactoryError<F>>> {
        let provider = self
            .factory
            .connect(region)
            .await
            .map_err(|err| CleanupError::provider(Phase::Connect, region, err))?;
        orchestrator.process_region(&provider).await
    }
}

#[cfg(test)]
mod tests;
