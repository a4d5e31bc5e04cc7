//! Unit tests for the janitor module.

use super::*;
use crate::test_support::{FakeCloud, FakeOperation, ProviderCall, snapshot, volume};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const EAST_1: &str = "us-east-1";
const EAST_2: &str = "us-east-2";

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 7).expect("valid date")
}

fn config(mode: RunMode) -> RunConfig {
    RunConfig::new(
        mode,
        vec![String::from(EAST_1), String::from(EAST_2)],
        run_date(),
    )
}

struct AuditDir {
    _tmp: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn audit_dir() -> AuditDir {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    AuditDir { _tmp: tmp, path }
}

async fn sweep(
    cloud: &FakeCloud,
    config: RunConfig,
) -> (
    Result<RunReport, SweepError<crate::test_support::FakeProviderError>>,
    String,
) {
    let janitor = Janitor::new(cloud.clone(), config);
    let mut out = Vec::new();
    let result = janitor.sweep(&mut out).await;
    (result, String::from_utf8(out).expect("utf8 log"))
}

#[rstest]
#[tokio::test]
async fn empty_regions_produce_header_only_audit(audit_dir: AuditDir) {
    let cloud = FakeCloud::new();
    cloud.set_account_alias(Some("acme"));

    let (result, log) = sweep(&cloud, config(RunMode::Live).with_audit(audit_dir.path.clone())).await;
    let report = result.expect("sweep should succeed");

    let audit = report.audit.as_ref().expect("audit enabled");
    assert_eq!(audit.rows, 0);
    assert_eq!(
        audit.path,
        audit_dir.path.join("acme_unattached_ebs_2024-03-07.csv")
    );
    assert_eq!(
        std::fs::read_to_string(&audit.path).expect("audit file"),
        "VolumeId,Size,AvailabilityZone,CreateTime\n"
    );
    assert!(cloud.mutation_calls().is_empty());
    assert!(log.is_empty());
    assert!(!report.has_failures());
    assert_eq!(
        report
            .regions
            .iter()
            .map(RegionOutcome::region)
            .collect::<Vec<_>>(),
        vec![EAST_1, EAST_2]
    );
}

#[rstest]
#[tokio::test]
async fn audit_completes_before_any_mutation(audit_dir: AuditDir) {
    let cloud = FakeCloud::new();
    cloud.add_volume(EAST_1, volume("vol-1", "us-east-1a", 8));
    cloud.add_volume(EAST_2, volume("vol-2", "us-east-2a", 8));

    let (result, _) = sweep(&cloud, config(RunMode::Live).with_audit(audit_dir.path.clone())).await;
    let report = result.expect("sweep should succeed");

    assert_eq!(report.audit.as_ref().map(|audit| audit.rows), Some(2));
    let calls = cloud.calls();
    let first_mutation = calls
        .iter()
        .position(ProviderCall::is_mutation)
        .expect("live sweep mutates");
    let audit_listings = calls
        .iter()
        .enumerate()
        .filter(|(_, call)| matches!(call, ProviderCall::ListVolumes { .. }))
        .map(|(index, _)| index)
        .take(2)
        .collect::<Vec<_>>();
    assert_eq!(audit_listings.len(), 2);
    assert!(audit_listings.iter().all(|index| *index < first_mutation));
    assert!(cloud.volume_ids(EAST_1).is_empty());
    assert!(cloud.volume_ids(EAST_2).is_empty());
}

#[rstest]
#[tokio::test]
async fn dry_run_sweep_touches_nothing() {
    let cloud = FakeCloud::new();
    cloud.add_volume(EAST_1, volume("vol-1", "us-east-1a", 8));
    cloud.add_snapshot(EAST_1, snapshot("snap-old", "vol-1", 10));
    cloud.add_snapshot(EAST_1, snapshot("snap-new", "vol-1", 20));
    cloud.add_volume(EAST_2, volume("vol-2", "us-east-2a", 8));

    let (first, first_log) = sweep(&cloud, config(RunMode::DryRun)).await;
    let (second, second_log) = sweep(&cloud, config(RunMode::DryRun)).await;

    assert!(cloud.mutation_calls().is_empty());
    assert_eq!(first.expect("first"), second.expect("second"));
    assert_eq!(first_log, second_log);
    assert_eq!(
        first_log,
        concat!(
            "Dry run - Creating snapshot of vol-1 - us-east-1\n",
            "Dry run - Deleting vol-1 - us-east-1\n",
            "Dry run - Deleting snapshots of vol-1 - us-east-1: snap-old\n",
            "Dry run - Creating snapshot of vol-2 - us-east-2\n",
            "Dry run - Deleting vol-2 - us-east-2\n",
            "Dry run - Deleting snapshots of vol-2 - us-east-2\n",
        )
    );
}

#[rstest]
#[tokio::test]
async fn failing_region_is_isolated() {
    let cloud = FakeCloud::new();
    cloud.add_volume(EAST_1, volume("vol-1", "us-east-1a", 8));
    cloud.add_volume(EAST_2, volume("vol-2", "us-east-2a", 8));
    cloud.fail_on(EAST_1, FakeOperation::DeleteVolume);

    let (result, _) = sweep(&cloud, config(RunMode::Live)).await;
    let report = result.expect("isolated failures do not abort");

    assert!(report.has_failures());
    assert!(matches!(
        report.regions.first(),
        Some(RegionOutcome::Failed {
            phase: Some(Phase::DeleteVolume),
            ..
        })
    ));
    assert!(matches!(
        report.regions.get(1),
        Some(RegionOutcome::Completed(summary)) if summary.volumes_deleted == 1
    ));
    assert!(cloud.volume_ids(EAST_2).is_empty());
}

#[rstest]
#[tokio::test]
async fn connect_failure_is_reported_with_its_phase() {
    let cloud = FakeCloud::new();
    cloud.fail_on(EAST_2, FakeOperation::Connect);

    let (result, _) = sweep(&cloud, config(RunMode::Live)).await;
    let report = result.expect("isolated failures do not abort");

    assert!(matches!(
        report.regions.get(1),
        Some(RegionOutcome::Failed {
            phase: Some(Phase::Connect),
            ..
        })
    ));
}

#[rstest]
fn janitor_exposes_its_configuration() {
    let config = config(RunMode::DryRun).with_failure_policy(FailurePolicy::Abort);
    let janitor = Janitor::new(FakeCloud::new(), config.clone());

    assert_eq!(janitor.config(), &config);
    assert_eq!(janitor.config().home_region(), EAST_1);
}

#[rstest]
#[tokio::test]
async fn fail_fast_stops_at_first_failure() {
    let cloud = FakeCloud::new();
    cloud.add_volume(EAST_1, volume("vol-1", "us-east-1a", 8));
    cloud.add_volume(EAST_2, volume("vol-2", "us-east-2a", 8));
    cloud.fail_on(EAST_1, FakeOperation::CreateSnapshot);

    let (result, _) = sweep(
        &cloud,
        config(RunMode::Live).with_failure_policy(FailurePolicy::Abort),
    )
    .await;
    let err = result.expect_err("abort policy should fail the sweep");

    assert!(matches!(err, SweepError::Region { ref region, .. } if region == EAST_1));
    assert!(!cloud.calls().contains(&ProviderCall::Connect {
        region: String::from(EAST_2),
    }));
    assert_eq!(cloud.volume_ids(EAST_2), vec![String::from("vol-2")]);
}

#[rstest]
#[tokio::test]
async fn regions_missing_from_audit_are_skipped(audit_dir: AuditDir) {
    let cloud = FakeCloud::new();
    cloud.add_volume(EAST_1, volume("vol-1", "us-east-1a", 8));
    cloud.add_volume(EAST_2, volume("vol-2", "us-east-2a", 8));
    cloud.fail_on(EAST_1, FakeOperation::ListVolumes);

    let (result, _) = sweep(&cloud, config(RunMode::Live).with_audit(audit_dir.path.clone())).await;
    let report = result.expect("isolated failures do not abort");

    assert!(matches!(
        report.regions.first(),
        Some(RegionOutcome::Skipped { region, .. }) if region == EAST_1
    ));
    assert_eq!(cloud.volume_ids(EAST_1), vec![String::from("vol-1")]);
    assert!(cloud.volume_ids(EAST_2).is_empty());
    assert!(report.has_failures());
}

#[rstest]
#[tokio::test]
async fn alias_failure_names_file_unknown(audit_dir: AuditDir) {
    let cloud = FakeCloud::new();
    cloud.fail_account_alias();

    let (result, _) = sweep(&cloud, config(RunMode::DryRun).with_audit(audit_dir.path.clone())).await;
    let report = result.expect("sweep should succeed");

    assert_eq!(
        report.audit.map(|audit| audit.path),
        Some(audit_dir.path.join("unknown_unattached_ebs_2024-03-07.csv"))
    );
}

#[rstest]
fn report_serialises_region_status() {
    let report = RunReport {
        mode: RunMode::DryRun,
        date: run_date(),
        audit: None,
        regions: vec![RegionOutcome::Skipped {
            region: String::from(EAST_1),
            reason: String::from("audit discovery failed"),
        }],
    };

    let json = serde_json::to_value(&report).expect("serialise report");

    assert_eq!(json["date"], "2024-03-07");
    assert_eq!(json["regions"][0]["status"], "skipped");
    assert_eq!(json["regions"][0]["region"], EAST_1);
}
