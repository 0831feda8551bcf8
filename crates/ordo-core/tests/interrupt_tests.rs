use ordo_core::cache::{AddressCache, SharedAddressCache};
use ordo_core::{GuardOutcome, Orchestrator};
use ordo_test_utils::{single_roles, Harness};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[tokio::test]
async fn test_interrupt_keeps_every_confirmed_unit() {
    let harness = Harness::new();
    let ctx = harness.context(harness.config().with_no_proxy(true), single_roles(), 1);
    let halted = harness.ledger.halt_after_deploys(5);

    let outcome = Orchestrator::new(ctx.clone())
        .deploy_guarded(&harness.plan, &harness.stages, async {
            let _ = halted.await;
        })
        .await
        .unwrap();

    assert!(outcome.is_interrupted());
    assert_ne!(outcome.exit_code(), 0);

    let saved = AddressCache::load(&harness.paths().deploy_cache).unwrap();
    assert_eq!(saved.len(), 5);
    assert_eq!(saved.stage(), 0);
    for unit in harness.plan.included(&ctx.config).take(5) {
        assert!(saved.contains(&unit.name), "{}", unit.name);
    }
    assert!(!ctx.artifacts.is_ready());
}

#[tokio::test]
async fn test_resume_after_interrupt_deploys_only_the_rest() {
    let harness = Harness::new();
    let config = harness.config().with_no_proxy(true);
    let halted = harness.ledger.halt_after_deploys(5);

    let first = Orchestrator::new(harness.context(config.clone(), single_roles(), 1))
        .deploy_guarded(&harness.plan, &harness.stages, async {
            let _ = halted.await;
        })
        .await
        .unwrap();
    assert!(first.is_interrupted());
    harness.ledger.release_halt();

    let ctx = harness.context(config, single_roles(), 1);
    let outcome = Orchestrator::new(ctx.clone())
        .deploy_guarded(&harness.plan, &harness.stages, std::future::pending())
        .await
        .unwrap();

    let GuardOutcome::Completed(report) = outcome else {
        panic!("resumed run was interrupted");
    };
    assert_eq!(report.book.len() - report.book.newly_deployed().len(), 5);
    assert_eq!(harness.ledger.deployment_count(), report.book.len());
    assert!(ctx.artifacts.is_ready());
}

#[tokio::test]
async fn test_completed_run_exits_cleanly() {
    let harness = Harness::new();
    let outcome = Orchestrator::new(harness.single_context())
        .deploy_guarded(&harness.plan, &harness.stages, std::future::pending())
        .await
        .unwrap();

    assert!(!outcome.is_interrupted());
    assert_eq!(outcome.exit_code(), 0);
}

proptest! {
    #[test]
    fn prop_stage_cursor_never_decreases(stages in proptest::collection::vec(0u32..=25, 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedAddressCache::new(AddressCache::new(), dir.path().join("deploy-cache.json"));

        let mut highest = 0;
        for stage in stages {
            cache.complete_stage(stage).unwrap();
            highest = highest.max(stage);
            prop_assert_eq!(cache.stage(), highest);
        }
        let saved = AddressCache::load(cache.path()).unwrap();
        prop_assert_eq!(saved.stage(), highest);
    }
}
