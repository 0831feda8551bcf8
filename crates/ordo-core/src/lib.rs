//! Ordo Core - Deployment & Upgrade Orchestration
//!
//! Drives a fixed set of interdependent units onto a ledger and keeps them
//! there:
//! - Deploys units in dependency order, re-attaching to anything cached
//! - Applies numbered configuration stages exactly once
//! - Upgrades proxied units, falling back to a 2-of-N multisig
//! - Survives interruption with every confirmed address on disk
//!
//! # Core Concepts
//!
//! - [`DeploymentPlan`]: ordered units with arguments and link-time libraries
//! - [`DeploymentPlanner`]: deploy-or-attach per unit, persisting as it goes
//! - [`StageMachine`]: numbered actions gated by the `stage` cursor
//! - [`UpgradeCoordinator`]: direct upgrade, multisig fallback, pending ledger
//! - [`InterruptGuard`]: flushes the address cache on interruption or failure
//!
//! # Example
//!
//! ```rust,ignore
//! use ordo_core::prelude::*;
//!
//! # async fn example(ctx: DeploymentContext) -> ordo_core::Result<()> {
//! let plan = DeploymentPlan::standard();
//! let stages = standard_stages();
//! let outcome = Orchestrator::new(ctx)
//!     .deploy_guarded(&plan, &stages, shutdown_signal())
//!     .await?;
//!
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod maintenance;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod simulation;
pub mod stages;
pub mod upgrade;

// Re-exports for convenience
pub use cache::{AddressCache, SharedAddressCache, UpgradeSuccessCache};
pub use config::{ConfigError, DeployConfig, FeeConfig, NetworkSettings, Settings, StatePaths};
pub use context::{DeploymentContext, RoleKind, Roles, UnitHandle};
pub use error::{
    CacheError, MultisigFailure, OrchestratorError, Result, TransactionFailure, UpgradeFailure,
};
pub use guard::{shutdown_signal, GuardOutcome, InterruptGuard};
pub use maintenance::{DeprecationReport, LibraryUpgrade, Maintenance};
pub use orchestrator::{DeployReport, Orchestrator};
pub use plan::{ArgRef, DeploymentPlan, Inclusion, SettingRef, UnitKind, UnitSpec};
pub use planner::{AddressBook, DeployedUnit, DeploymentPlanner};
pub use simulation::{simulate, simulation_roles, synthetic_registry, SimulationReport};
pub use stages::{standard_stages, StageAction, StageMachine, StageReport, Step, StepOutcome};
pub use upgrade::{UnitUpgrade, UpgradeCoordinator, UpgradeReport, UpgradeState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a deployment
    pub use crate::{
        shutdown_signal, standard_stages, DeployConfig, DeploymentContext, DeploymentPlan, GuardOutcome,
        Orchestrator, Roles, UpgradeState,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;

    use ordo_ledger::{SimulatedCustody, SimulatedLedger};

    #[tokio::test]
    async fn single_identity_deploy_applies_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeployConfig::default().with_paths(StatePaths::under(dir.path()));
        let identity = simulation_roles().deployer;
        let ledger = Arc::new(SimulatedLedger::default());
        let plan = DeploymentPlan::standard();
        let stages = standard_stages();

        let ctx = DeploymentContext::new(
            config,
            Roles::single(identity),
            ledger.clone(),
            Arc::new(synthetic_registry(&plan, &stages, 1)),
            Arc::new(SimulatedCustody::new(ledger.clone())),
        )
        .unwrap();
        let report = Orchestrator::new(ctx.clone()).deploy(&plan, &stages).await.unwrap();

        assert!(report.stages.failed.is_empty(), "{:?}", report.stages);
        assert_eq!(ctx.addresses.stage(), stages::MAX_STAGE);
        assert!(ctx.artifacts.is_ready());
        assert!(ledger.calls().iter().all(|c| c.success));
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
