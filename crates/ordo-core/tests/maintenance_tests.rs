use ordo_core::{simulation_roles, DeploymentContext, Maintenance, Orchestrator};
use ordo_ledger::Value;
use ordo_test_utils::Harness;
use pretty_assertions::assert_eq;

async fn deployed(harness: &Harness) -> DeploymentContext {
    let ctx = harness.context(harness.config(), simulation_roles(), 1);
    Orchestrator::new(ctx.clone())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();
    ctx
}

#[tokio::test]
async fn test_upgrade_library_repoints_the_dependent_as_owner() {
    let harness = Harness::new();
    let ctx = deployed(&harness).await;
    let before = ctx.addresses.get("PlonkVerifier").unwrap();

    let upgraded = Maintenance::new(&ctx).upgrade_library(false).await.unwrap();

    assert_eq!(upgraded.len(), 1);
    assert_eq!(upgraded[0].library, "PlonkVerifier");
    assert_eq!(upgraded[0].dependent, "AccessProofCondition");
    assert_ne!(upgraded[0].address, before);
    assert_eq!(ctx.addresses.get("PlonkVerifier"), Some(upgraded[0].address));
    assert_eq!(
        ctx.artifacts.read("PlonkVerifier").and_then(|a| a.address),
        Some(upgraded[0].address)
    );

    let calls = harness.ledger.calls_named("changeDisputeManager");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].from, ctx.roles.owner);
    assert_eq!(calls[0].args, vec![Value::Address(upgraded[0].address)]);
    assert!(calls[0].success);
}

#[tokio::test]
async fn test_upgrade_library_with_aave_also_replaces_the_vault() {
    let harness = Harness::new();
    let ctx = deployed(&harness).await;

    let upgraded = Maintenance::new(&ctx).upgrade_library(true).await.unwrap();

    let libraries: Vec<_> = upgraded.iter().map(|u| u.library.as_str()).collect();
    assert_eq!(libraries, vec!["PlonkVerifier", "AaveCreditVault"]);
    assert_eq!(harness.ledger.calls_named("changeCreditVaultLibrary").len(), 1);
}

#[tokio::test]
async fn test_deprecate_revokes_condition_rights() {
    let harness = Harness::new();
    let ctx = deployed(&harness).await;

    let report = Maintenance::new(&ctx).deprecate().await.unwrap();

    assert_eq!(report.applied, 8);
    assert_eq!(report.failed, 0);
    let approvals = harness.ledger.calls_named("setProxyApproval");
    assert_eq!(approvals.len(), 5);
    assert!(approvals.iter().all(|c| c.success && c.args[1] == Value::Bool(false)));
    assert_eq!(harness.ledger.calls_named("revokeMinter").len(), 2);
}

#[tokio::test]
async fn test_deprecate_without_artifacts_skips_everything() {
    let harness = Harness::new();
    let ctx = harness.context(harness.config(), simulation_roles(), 1);

    let report = Maintenance::new(&ctx).deprecate().await.unwrap();

    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 8);
    assert!(harness.ledger.calls().is_empty());
}
