//! Shared fixtures for janitor BDD scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use ebs_janitor::RunReport;
use ebs_janitor::test_support::FakeCloud;
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;

/// Audit file header written before any rows.
pub const AUDIT_HEADER_LINE: &str = "VolumeId,Size,AvailabilityZone,CreateTime\n";

#[derive(Clone, Debug)]
pub struct JanitorContext {
    pub cloud: FakeCloud,
    pub dry_run_flag: Option<String>,
    pub audit_dir: Option<AuditDir>,
    pub outcome: Option<SweepResult>,
    pub log: String,
}

#[derive(Clone, Debug)]
pub struct AuditDir {
    pub path: Utf8PathBuf,
    pub(crate) _tmp: Arc<TempDir>,
}

#[derive(Clone, Debug)]
pub enum SweepResult {
    Success(RunReport),
    Rejected(String),
    Failure(String),
}

#[derive(Clone, Debug, Error)]
pub enum JanitorTestError {
    #[error("failed to create audit directory: {0}")]
    Workspace(String),
}

#[fixture]
pub fn janitor_context() -> JanitorContext {
    JanitorContext {
        cloud: FakeCloud::new(),
        dry_run_flag: None,
        audit_dir: None,
        outcome: None,
        log: String::new(),
    }
}

pub fn audit_dir() -> Result<AuditDir, JanitorTestError> {
    let tmp = TempDir::new().map_err(|err| JanitorTestError::Workspace(format!("tempdir: {err}")))?;
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).map_err(|path| {
        JanitorTestError::Workspace(format!("non-utf8 tempdir path: {}", path.display()))
    })?;
    Ok(AuditDir {
        path,
        _tmp: Arc::new(tmp),
    })
}

pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 7)
        .unwrap_or_else(|| panic!("2024-03-07 should be a valid date"))
}
