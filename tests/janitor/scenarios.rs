//! BDD scenarios for the janitor sweep.

use rstest_bdd_macros::scenario;

use super::test_helpers::{JanitorContext, janitor_context};

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Live cleanup snapshots, deletes, and prunes a volume"
)]
fn scenario_live_cleanup(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Dry run leaves the cloud untouched"
)]
fn scenario_dry_run(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Empty regions produce a header-only audit"
)]
fn scenario_empty_regions(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "A missing dry run flag is a configuration error"
)]
fn scenario_missing_dry_run(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "A failing region does not stop later regions"
)]
fn scenario_region_isolation(janitor_context: JanitorContext) {
    let _ = janitor_context;
}
