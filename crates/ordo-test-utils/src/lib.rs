//! Testing utilities for the Ordo workspace
//!
//! A [`Harness`] owns a scratch state root plus one simulated ledger and
//! custody. Every [`Harness::context`] call opens a fresh context over the
//! same ledger and the same files, which is how a second orchestrator run
//! is exercised.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use ordo_artifact::Address;
use ordo_core::{
    simulation_roles, standard_stages, synthetic_registry, DeployConfig, DeploymentContext, DeploymentPlan, Roles,
    StageAction, StatePaths,
};
use ordo_ledger::{SimulatedCustody, SimulatedLedger};
use tempfile::TempDir;

/// Address whose last byte is `byte`
#[must_use]
pub fn address(byte: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = byte;
    Address::new(bytes)
}

/// Every role held by the deployer of [`simulation_roles`]
#[must_use]
pub fn single_roles() -> Roles {
    Roles::single(simulation_roles().deployer)
}

/// Scratch state root with a shared simulated ledger
#[derive(Debug)]
pub struct Harness {
    pub dir: TempDir,
    pub ledger: Arc<SimulatedLedger>,
    pub custody: Arc<SimulatedCustody>,
    pub plan: DeploymentPlan,
    pub stages: Vec<StageAction>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        let ledger = Arc::new(SimulatedLedger::default());
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            custody: Arc::new(SimulatedCustody::new(Arc::clone(&ledger))),
            ledger,
            plan: DeploymentPlan::standard(),
            stages: standard_stages(),
        }
    }

    #[must_use]
    pub fn paths(&self) -> StatePaths {
        StatePaths::under(self.dir.path())
    }

    /// Default configuration rooted in the scratch directory
    #[must_use]
    pub fn config(&self) -> DeployConfig {
        DeployConfig::default().with_paths(self.paths())
    }

    /// Context over this harness' ledger and files at a code `revision`
    #[must_use]
    pub fn context(&self, config: DeployConfig, roles: Roles, revision: u32) -> DeploymentContext {
        DeploymentContext::new(
            config,
            roles,
            self.ledger.clone(),
            Arc::new(synthetic_registry(&self.plan, &self.stages, revision)),
            self.custody.clone(),
        )
        .expect("valid test context")
    }

    /// Default configuration, single identity, first revision
    #[must_use]
    pub fn single_context(&self) -> DeploymentContext {
        self.context(self.config(), single_roles(), 1)
    }

    /// Raw contents of the address cache file
    #[must_use]
    pub fn cache_bytes(&self) -> Vec<u8> {
        std::fs::read(self.paths().deploy_cache).expect("read deploy cache")
    }
}
