use ordo_core::plan::{ArgRef, UnitSpec};
use ordo_core::planner::PROXY_ADMIN;
use ordo_core::{DeploymentPlan, DeploymentPlanner, Orchestrator};
use ordo_test_utils::{single_roles, Harness};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let harness = Harness::new();

    let first = Orchestrator::new(harness.single_context())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();
    assert!(!first.book.newly_deployed().is_empty());
    let deployments = harness.ledger.deployment_count();
    let calls = harness.ledger.calls().len();
    let cache = harness.cache_bytes();

    let second = Orchestrator::new(harness.single_context())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();

    assert!(second.book.newly_deployed().is_empty());
    assert_eq!(second.stages.applied, Vec::<u32>::new());
    assert_eq!(harness.ledger.deployment_count(), deployments);
    assert_eq!(harness.ledger.calls().len(), calls);
    assert_eq!(harness.cache_bytes(), cache);
}

#[tokio::test]
async fn test_fresh_artifacts_do_not_reseed_but_cache_still_attaches() {
    let harness = Harness::new();
    Orchestrator::new(harness.single_context())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();
    let deployments = harness.ledger.deployment_count();

    let ctx = harness.context(harness.config().with_fresh(true), single_roles(), 1);
    let report = Orchestrator::new(ctx).deploy(&harness.plan, &harness.stages).await.unwrap();

    assert!(report.book.newly_deployed().is_empty());
    assert_eq!(harness.ledger.deployment_count(), deployments);
}

#[tokio::test]
async fn test_artifacts_reseed_a_lost_cache() {
    let harness = Harness::new();
    let first = Orchestrator::new(harness.single_context())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();
    std::fs::remove_file(harness.paths().deploy_cache).unwrap();

    let ctx = harness.single_context();
    let seeded = DeploymentPlanner::new(&ctx).seed_from_artifacts(&harness.plan);
    let core_and_libraries = harness
        .plan
        .included(&ctx.config)
        .filter(|u| u.is_core || u.is_library())
        .count();
    assert_eq!(seeded, core_and_libraries);
    assert_eq!(
        ctx.addresses.get("DIDRegistry"),
        first.book.address("DIDRegistry")
    );
}

#[tokio::test]
async fn test_attach_only_requires_cached_core_units() {
    let harness = Harness::new();
    let ctx = harness.context(harness.config().with_deploy_core(false), single_roles(), 1);

    let err = Orchestrator::new(ctx.clone())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "MissingCoreArtifact");
    assert!(err.is_fatal());
    // Libraries ahead of the first core unit were still deployed and recorded
    assert!(ctx.addresses.get("DIDRegistryLibrary").is_some());
    assert!(ctx.addresses.get("NeverminedConfig").is_none());
}

#[tokio::test]
async fn test_attach_only_succeeds_after_full_deploy() {
    let harness = Harness::new();
    Orchestrator::new(harness.single_context())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();

    let ctx = harness.context(harness.config().with_deploy_core(false), single_roles(), 1);
    let report = Orchestrator::new(ctx).deploy(&harness.plan, &harness.stages).await.unwrap();
    assert!(report.book.newly_deployed().is_empty());
}

#[tokio::test]
async fn test_forward_reference_is_unresolved() {
    let harness = Harness::new();
    let plan = DeploymentPlan::new(vec![
        UnitSpec::contract("Consumer", vec![ArgRef::unit("Provider")]),
        UnitSpec::contract("Provider", vec![]),
    ]);

    let err = plan.validate().unwrap_err();
    assert_eq!(err.kind(), "UnresolvedDependency");

    let err = Orchestrator::new(harness.single_context())
        .deploy(&plan, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UnresolvedDependency");
    assert_eq!(harness.ledger.deployment_count(), 0);
}

#[tokio::test]
async fn test_proxied_units_share_one_admin() {
    let harness = Harness::new();
    let ctx = harness.single_context();
    let report = Orchestrator::new(ctx.clone())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();

    let admin = ctx.addresses.get(PROXY_ADMIN).unwrap();
    for unit in harness.plan.core_units().filter(|u| u.inclusion.applies(&ctx.config)) {
        let deployed = report.book.get(&unit.name).unwrap();
        assert_ne!(deployed.address, deployed.implementation, "{}", unit.name);
        assert_eq!(
            harness.ledger.implementation_of(deployed.address),
            Some(deployed.implementation)
        );
    }
    assert!(ctx.artifacts.read(PROXY_ADMIN).is_some());
    assert_eq!(harness.ledger.owner_of(admin), Some(ctx.roles.upgrader));
}

#[tokio::test]
async fn test_no_proxy_deploys_everything_directly() {
    let harness = Harness::new();
    let ctx = harness.context(harness.config().with_no_proxy(true), single_roles(), 1);
    let report = Orchestrator::new(ctx.clone())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();

    assert!(report.book.iter().all(|u| u.address == u.implementation));
    assert!(ctx.addresses.get(PROXY_ADMIN).is_none());
    assert_eq!(harness.ledger.deployment_count(), report.book.len());
}

#[tokio::test]
async fn test_artifacts_describe_deployed_units() {
    let harness = Harness::new();
    let ctx = harness.single_context();
    let report = Orchestrator::new(ctx.clone())
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();

    assert!(ctx.artifacts.is_ready());
    let registry = ctx.artifacts.read("DIDRegistry").unwrap();
    let deployed = report.book.get("DIDRegistry").unwrap();
    assert_eq!(registry.address, Some(deployed.address));
    assert_eq!(registry.implementation, Some(deployed.implementation));
    assert_eq!(
        registry.libraries.get("DIDRegistryLibrary").copied(),
        report.book.address("DIDRegistryLibrary")
    );
}

#[tokio::test]
async fn test_testnet_profile_adds_token_units() {
    let harness = Harness::new();
    let ctx = harness.context(harness.config().with_testnet(true), single_roles(), 1);
    let report = Orchestrator::new(ctx)
        .deploy(&harness.plan, &harness.stages)
        .await
        .unwrap();

    assert!(report.book.contains("NeverminedToken"));
    assert!(report.book.contains("Dispenser"));
    assert!(report.stages.applied.contains(&14));
}
