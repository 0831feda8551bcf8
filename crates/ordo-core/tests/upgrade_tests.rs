use ordo_artifact::{ADMIN_SLOT, B256};
use ordo_core::cache::{read_pending_transactions, UpgradeSuccessCache};
use ordo_core::upgrade::UPGRADE_SIGNATURE;
use ordo_core::{simulation_roles, DeployReport, Orchestrator, Roles, UpgradeState};
use ordo_test_utils::{address, single_roles, Harness};
use pretty_assertions::assert_eq;

async fn deployed(harness: &Harness, roles: &Roles) -> DeployReport {
    Orchestrator::new(harness.context(harness.config(), roles.clone(), 1))
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap()
}

fn core_units(harness: &Harness) -> Vec<String> {
    let config = harness.config();
    harness
        .plan
        .core_units()
        .filter(|u| u.inclusion.applies(&config))
        .map(|u| u.name.clone())
        .collect()
}

#[tokio::test]
async fn test_changed_code_is_upgraded_through_the_multisig() {
    let harness = Harness::new();
    let roles = simulation_roles();
    let deploy = deployed(&harness, &roles).await;

    let ctx = harness.context(harness.config(), roles, 2);
    let report = Orchestrator::new(ctx.clone()).upgrade(&harness.plan).await.unwrap();

    let units = core_units(&harness);
    for name in &units {
        let outcome = report.outcomes.iter().find(|o| &o.unit == name).unwrap();
        assert_eq!(outcome.state, UpgradeState::UpgradedViaMultisig, "{name}");
        let proxy = deploy.book.address(name).unwrap();
        assert_eq!(harness.ledger.implementation_of(proxy), outcome.implementation);
        assert_ne!(outcome.implementation, Some(deploy.book.get(name).unwrap().implementation));
    }
    assert!(matches!(
        report.state_of("DIDRegistryLibrary"),
        Some(UpgradeState::Skipped(_))
    ));
    assert_eq!(report.state_of("ConditionStoreManager"), None);

    assert_eq!(report.pending.len(), units.len());
    assert!(report.pending.iter().all(|tx| tx.function == UPGRADE_SIGNATURE));
    let written = read_pending_transactions(&harness.paths().transactions).unwrap();
    assert_eq!(written, report.pending);

    // Multisig upgrades are left out of the success cache
    let success = UpgradeSuccessCache::load(&harness.paths().upgrade_cache).unwrap();
    assert!(units.iter().all(|u| !success.is_done(u)));
    assert!(ctx.artifacts.is_ready());
}

#[tokio::test]
async fn test_unchanged_code_needs_no_multisig() {
    let harness = Harness::new();
    let roles = simulation_roles();
    deployed(&harness, &roles).await;
    let deployments = harness.ledger.deployment_count();

    let ctx = harness.context(harness.config(), roles, 1);
    let report = Orchestrator::new(ctx).upgrade(&harness.plan).await.unwrap();

    assert!(report.pending.is_empty());
    assert!(report.failed().is_empty());
    assert_eq!(harness.ledger.deployment_count(), deployments);
    assert!(harness.ledger.calls_named("upgrade").is_empty());
    assert!(read_pending_transactions(&harness.paths().transactions).unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_upgrade_is_recorded_and_not_repeated() {
    let harness = Harness::new();
    let deploy = deployed(&harness, &single_roles()).await;

    let report = Orchestrator::new(harness.context(harness.config(), single_roles(), 2))
        .upgrade(&harness.plan)
        .await
        .unwrap();
    let units = core_units(&harness);
    for name in &units {
        assert_eq!(report.state_of(name), Some(&UpgradeState::UpgradedDirect), "{name}");
    }
    assert!(report.pending.is_empty());
    let registry = deploy.book.address("DIDRegistry").unwrap();
    assert_ne!(
        harness.ledger.implementation_of(registry),
        Some(deploy.book.get("DIDRegistry").unwrap().implementation)
    );

    let again = Orchestrator::new(harness.context(harness.config(), single_roles(), 2))
        .upgrade(&harness.plan)
        .await
        .unwrap();
    for name in &units {
        assert_eq!(
            again.state_of(name),
            Some(&UpgradeState::Skipped("already upgraded".to_string())),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_unavailable_custody_leaves_transactions_for_signers() {
    let harness = Harness::new();
    let roles = simulation_roles();
    let deploy = deployed(&harness, &roles).await;
    harness.custody.set_unavailable(true);

    let report = Orchestrator::new(harness.context(harness.config(), roles, 2))
        .upgrade(&harness.plan)
        .await
        .unwrap();

    let units = core_units(&harness);
    assert_eq!(report.failed().len(), units.len());
    for name in &units {
        let proxy = deploy.book.address(name).unwrap();
        assert_eq!(
            harness.ledger.implementation_of(proxy),
            Some(deploy.book.get(name).unwrap().implementation),
            "{name}"
        );
    }
    let written = read_pending_transactions(&harness.paths().transactions).unwrap();
    assert_eq!(written.len(), units.len());
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_direct_failure() {
    let harness = Harness::new();
    let roles = simulation_roles();
    deployed(&harness, &roles).await;

    let ctx = harness.context(harness.config().with_fail_fast(true), roles, 2);
    let err = Orchestrator::new(ctx.clone()).upgrade(&harness.plan).await.unwrap_err();

    assert_eq!(err.kind(), "UpgradeFailure");
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("NeverminedConfig"));
    assert!(harness.ledger.calls_named("upgrade").iter().all(|c| !c.success));
    assert!(read_pending_transactions(&harness.paths().transactions).unwrap().is_empty());
    assert!(!ctx.artifacts.is_ready());
}

#[tokio::test]
async fn test_single_approver_cannot_execute() {
    let harness = Harness::new();
    let mut roles = simulation_roles();
    deployed(&harness, &roles).await;
    roles.approvers.truncate(1);

    let report = Orchestrator::new(harness.context(harness.config(), roles, 2))
        .upgrade(&harness.plan)
        .await
        .unwrap();

    assert_eq!(report.failed().len(), core_units(&harness).len());
    assert_eq!(report.pending.len(), core_units(&harness).len());
}

#[tokio::test]
async fn test_three_approvers_execute_with_the_recorded_approval() {
    let harness = Harness::new();
    let deploy = deployed(&harness, &simulation_roles()).await;

    // The third approver sorts ahead of both signers and never approves
    let mut roles = simulation_roles();
    roles.approvers = vec![address(0xa2), address(0xa3), address(0xa1)];
    let report = Orchestrator::new(harness.context(harness.config(), roles, 2))
        .upgrade(&harness.plan)
        .await
        .unwrap();

    let units = core_units(&harness);
    assert!(report.failed().is_empty(), "{:?}", report.failed());
    for name in &units {
        assert_eq!(report.state_of(name), Some(&UpgradeState::UpgradedViaMultisig), "{name}");
        let proxy = deploy.book.address(name).unwrap();
        assert_ne!(
            harness.ledger.implementation_of(proxy),
            Some(deploy.book.get(name).unwrap().implementation),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_interrupted_upgrade_keeps_queued_transactions() {
    let harness = Harness::new();
    let roles = simulation_roles();
    deployed(&harness, &roles).await;

    let before = harness.ledger.deployment_count();
    let halted = harness.ledger.halt_after_deploys(before + 3);
    let outcome = Orchestrator::new(harness.context(harness.config(), roles, 2))
        .upgrade_guarded(&harness.plan, async {
            let _ = halted.await;
        })
        .await
        .unwrap();

    assert!(outcome.is_interrupted());
    let written = read_pending_transactions(&harness.paths().transactions).unwrap();
    assert_eq!(written.len(), 3);
    assert!(written.iter().all(|tx| tx.function == UPGRADE_SIGNATURE));
}

#[tokio::test]
async fn test_empty_admin_slot_fails_the_upgrade_call() {
    let harness = Harness::new();
    let deploy = deployed(&harness, &single_roles()).await;
    let registry = deploy.book.address("DIDRegistry").unwrap();
    harness.ledger.set_storage(registry, ADMIN_SLOT, B256::ZERO);

    let report = Orchestrator::new(harness.context(harness.config(), single_roles(), 2))
        .upgrade(&harness.plan)
        .await
        .unwrap();
    assert_eq!(report.state_of("DIDRegistry"), Some(&UpgradeState::Failed));
    assert_eq!(report.state_of("NeverminedConfig"), Some(&UpgradeState::UpgradedDirect));

    let ctx = harness.context(harness.config().with_fail_fast(true), single_roles(), 3);
    let err = Orchestrator::new(ctx).upgrade(&harness.plan).await.unwrap_err();
    assert_eq!(err.kind(), "UpgradeFailure");
    assert!(err.to_string().contains("DIDRegistry"));
    let source = std::error::Error::source(&err).map(ToString::to_string).unwrap_or_default();
    assert!(source.contains("proxy admin slot is empty"), "{source}");
}
