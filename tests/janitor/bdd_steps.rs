//! BDD step definitions for the janitor sweep.

use ebs_janitor::test_support::{FakeOperation, ProviderCall, snapshot, volume};
use ebs_janitor::{Janitor, RegionOutcome, RunConfig, RunMode};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{
    AUDIT_HEADER_LINE, JanitorContext, JanitorTestError, SweepResult, audit_dir, run_date,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] JanitorTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("volume \"{volume_id}\" is unattached in \"{region}\"")]
fn unattached_volume(
    janitor_context: JanitorContext,
    volume_id: String,
    region: String,
) -> JanitorContext {
    let zone = format!("{region}a");
    janitor_context
        .cloud
        .add_volume(&region, volume(&volume_id, &zone, 8));
    janitor_context
}

#[given(
    "snapshot \"{snapshot_id}\" of \"{volume_id}\" exists in \"{region}\" with start offset {offset}"
)]
fn existing_snapshot(
    janitor_context: JanitorContext,
    snapshot_id: String,
    volume_id: String,
    region: String,
    offset: i64,
) -> JanitorContext {
    janitor_context
        .cloud
        .add_snapshot(&region, snapshot(&snapshot_id, &volume_id, offset));
    janitor_context
}

#[given("the dry run flag is \"{flag}\"")]
fn dry_run_flag(mut janitor_context: JanitorContext, flag: String) -> JanitorContext {
    janitor_context.dry_run_flag = Some(flag);
    janitor_context
}

#[given("the dry run flag is unset")]
fn dry_run_flag_unset(mut janitor_context: JanitorContext) -> JanitorContext {
    janitor_context.dry_run_flag = None;
    janitor_context
}

#[given("the audit export is enabled")]
fn audit_enabled(mut janitor_context: JanitorContext) -> Result<JanitorContext, StepError> {
    janitor_context.audit_dir = Some(audit_dir()?);
    Ok(janitor_context)
}

#[given("deleting volumes fails in \"{region}\"")]
fn delete_volume_fails(janitor_context: JanitorContext, region: String) -> JanitorContext {
    janitor_context
        .cloud
        .fail_on(&region, FakeOperation::DeleteVolume);
    janitor_context
}

#[when("I run the janitor for regions \"{regions}\"")]
fn run_janitor(
    mut janitor_context: JanitorContext,
    regions: String,
) -> Result<JanitorContext, StepError> {
    let mode = match RunMode::from_flag(janitor_context.dry_run_flag.as_deref()) {
        Ok(mode) => mode,
        Err(err) => {
            janitor_context.outcome = Some(SweepResult::Rejected(err.to_string()));
            return Ok(janitor_context);
        }
    };
    let region_list = regions
        .split(',')
        .map(|region| region.trim().to_owned())
        .collect();
    let mut config = RunConfig::new(mode, region_list, run_date());
    if let Some(dir) = &janitor_context.audit_dir {
        config = config.with_audit(dir.path.clone());
    }

    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let janitor = Janitor::new(janitor_context.cloud.clone(), config);
    let mut out = Vec::new();
    let result = runtime.block_on(janitor.sweep(&mut out));

    janitor_context.log = String::from_utf8(out).map_err(|err| StepError::Assertion(err.to_string()))?;
    janitor_context.outcome = Some(match result {
        Ok(report) => SweepResult::Success(report),
        Err(err) => SweepResult::Failure(err.to_string()),
    });
    Ok(janitor_context)
}

fn report(janitor_context: &JanitorContext) -> Result<&ebs_janitor::RunReport, StepError> {
    match &janitor_context.outcome {
        Some(SweepResult::Success(report)) => Ok(report),
        other => Err(StepError::Assertion(format!(
            "expected a completed sweep, got {other:?}"
        ))),
    }
}

#[then("{count} snapshot was requested")]
fn snapshots_requested(janitor_context: &JanitorContext, count: usize) -> Result<(), StepError> {
    let requested = janitor_context
        .cloud
        .calls()
        .iter()
        .filter(|call| matches!(call, ProviderCall::CreateSnapshot { .. }))
        .count();
    if requested == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} snapshot requests, saw {requested}"
        )))
    }
}

#[then("volume \"{volume_id}\" is gone from \"{region}\"")]
fn volume_gone(
    janitor_context: &JanitorContext,
    volume_id: String,
    region: String,
) -> Result<(), StepError> {
    let remaining = janitor_context.cloud.volume_ids(&region);
    if remaining.contains(&volume_id) {
        Err(StepError::Assertion(format!(
            "{volume_id} still present in {region}: {remaining:?}"
        )))
    } else {
        Ok(())
    }
}

#[then("only snapshot \"{snapshot_id}\" remains in \"{region}\"")]
fn only_snapshot_remains(
    janitor_context: &JanitorContext,
    snapshot_id: String,
    region: String,
) -> Result<(), StepError> {
    let remaining = janitor_context.cloud.snapshot_ids(&region);
    if remaining == vec![snapshot_id.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected only {snapshot_id} in {region}, found {remaining:?}"
        )))
    }
}

#[then("no mutating provider calls were made")]
fn no_mutations(janitor_context: &JanitorContext) -> Result<(), StepError> {
    let mutations = janitor_context.cloud.mutation_calls();
    if mutations.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected mutating calls: {mutations:?}"
        )))
    }
}

#[then("every action line is a dry run line")]
fn dry_run_lines(janitor_context: &JanitorContext) -> Result<(), StepError> {
    report(janitor_context)?;
    if janitor_context.log.is_empty() {
        return Err(StepError::Assertion(String::from("action log is empty")));
    }
    match janitor_context
        .log
        .lines()
        .find(|line| !line.starts_with("Dry run - "))
    {
        Some(line) => Err(StepError::Assertion(format!(
            "line without dry-run prefix: {line}"
        ))),
        None => Ok(()),
    }
}

#[then("the audit file contains only the header")]
fn audit_header_only(janitor_context: &JanitorContext) -> Result<(), StepError> {
    let audit = report(janitor_context)?
        .audit
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("audit summary missing")))?;
    let contents = std::fs::read_to_string(&audit.path)
        .map_err(|err| StepError::Assertion(format!("read {}: {err}", audit.path)))?;
    if contents == AUDIT_HEADER_LINE {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected audit contents: {contents:?}"
        )))
    }
}

#[then("the sweep is rejected with a configuration error")]
fn rejected(janitor_context: &JanitorContext) -> Result<(), StepError> {
    match &janitor_context.outcome {
        Some(SweepResult::Rejected(message)) if message.contains("invalid DRY_RUN value") => {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected a configuration rejection, got {other:?}"
        ))),
    }
}

#[then("region \"{region}\" is reported as failed")]
fn region_failed(janitor_context: &JanitorContext, region: String) -> Result<(), StepError> {
    let outcome = report(janitor_context)?
        .regions
        .iter()
        .find(|outcome| outcome.region() == region)
        .ok_or_else(|| StepError::Assertion(format!("no outcome for {region}")))?;
    match outcome {
        RegionOutcome::Failed { .. } => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {region} to fail, got {other:?}"
        ))),
    }
}
