//! Maintenance operations on an existing deployment
//!
//! These work from the exported artifacts rather than a fresh plan run.

use std::collections::BTreeMap;

use ordo_artifact::{Address, Artifact};
use ordo_ledger::Value;

use crate::context::DeploymentContext;
use crate::error::{OrchestratorError, Result, TransactionFailure};
use crate::plan::ArgRef;
use crate::planner::{AddressBook, DeployedUnit};
use crate::stages::{StageMachine, Step, StepOutcome};

/// A redeployed library and the unit re-pointed at it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryUpgrade {
    pub library: String,
    pub address: Address,
    pub dependent: String,
}

/// Counts of a deprecation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeprecationReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Calls revoking the rights granted to condition units
#[must_use]
pub fn deprecation_steps() -> Vec<Step> {
    let u = ArgRef::unit;
    let revoked = || ArgRef::Literal(Value::Bool(false));
    vec![
        Step::call("DIDRegistry", "setManager", vec![u("TransferDIDOwnershipCondition"), revoked()]),
        Step::call("NFT1155Upgradeable", "setProxyApproval", vec![u("NFTLockCondition"), revoked()]),
        Step::call("NFT721Upgradeable", "setProxyApproval", vec![u("NFT721LockCondition"), revoked()]),
        Step::call("NFT721Upgradeable", "setProxyApproval", vec![u("NFTLockCondition"), revoked()]),
        Step::call("NFT1155Upgradeable", "setProxyApproval", vec![u("TransferNFTCondition"), revoked()]),
        Step::call("NFT721Upgradeable", "setProxyApproval", vec![u("TransferNFT721Condition"), revoked()]),
        Step::call("NFT1155Upgradeable", "revokeMinter", vec![u("TransferNFTCondition")]),
        Step::call("NFT721Upgradeable", "revokeMinter", vec![u("TransferNFT721Condition")]),
    ]
}

/// Maintenance commands bound to a context
#[derive(Debug)]
pub struct Maintenance<'a> {
    ctx: &'a DeploymentContext,
}

impl<'a> Maintenance<'a> {
    #[must_use]
    pub fn new(ctx: &'a DeploymentContext) -> Self {
        Self { ctx }
    }

    /// Redeploy the proof verifier (and the credit vault when `with_aave`)
    /// and re-point their dependents, signed by the owner wallet
    ///
    /// # Errors
    /// Returns error if a deployment or re-pointing call fails
    pub async fn upgrade_library(&self, with_aave: bool) -> Result<Vec<LibraryUpgrade>> {
        let mut targets = vec![("PlonkVerifier", "AccessProofCondition", "changeDisputeManager")];
        if with_aave {
            targets.push(("AaveCreditVault", "AaveCreditTemplate", "changeCreditVaultLibrary"));
        }

        let mut upgraded = Vec::new();
        for (library, dependent, function) in targets {
            let address = self.redeploy_library(library).await?;
            tracing::info!("Pointing {} at {} {}", dependent, library, address);
            self.call_as_owner(dependent, function, &[Value::Address(address)]).await?;
            upgraded.push(LibraryUpgrade {
                library: library.to_string(),
                address,
                dependent: dependent.to_string(),
            });
        }
        Ok(upgraded)
    }

    /// Revoke manager, proxy approval and minter rights of condition units
    ///
    /// Each call is signed by the target's owner. Failures are logged and
    /// counted; strict mode stops at the first one.
    ///
    /// # Errors
    /// Returns the first failure in strict mode
    pub async fn deprecate(&self) -> Result<DeprecationReport> {
        let steps = deprecation_steps();
        let mut names: Vec<&str> = Vec::new();
        for step in &steps {
            if let Step::Call { unit, args, .. } = step {
                names.push(unit);
                names.extend(args.iter().filter_map(ArgRef::dependency));
            }
        }
        let book = self.book_from_artifacts(&names);
        let machine = StageMachine::new(self.ctx, &book);

        let mut report = DeprecationReport::default();
        for step in &steps {
            match machine.run_step(step).await {
                Ok(StepOutcome::Applied) => report.applied += 1,
                Ok(StepOutcome::NoOp(reason)) => {
                    tracing::info!("Deprecation step skipped: {}", reason);
                    report.skipped += 1;
                }
                Err(failure) => {
                    tracing::warn!("Deprecation step failed: {}", failure);
                    if self.ctx.config.strict {
                        return Err(failure.into());
                    }
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn redeploy_library(&self, name: &str) -> Result<Address> {
        let previous = self.ctx.artifacts.read(name);
        let libraries = previous.as_ref().map(|a| a.libraries.clone()).unwrap_or_default();
        if let Some(address) = previous.as_ref().and_then(|a| a.address) {
            tracing::info!("Upgrading {} from {}", name, address);
        }

        let component = self.ctx.registry.component(name)?;
        let bytecode = component.link(&libraries)?;
        let failure = |source| TransactionFailure::new(name, Address::ZERO, "constructor", &[], source);
        let deployment = self
            .ctx
            .ledger
            .deploy(&bytecode, &[], self.ctx.roles.deployer)
            .await
            .map_err(failure)?;
        let receipt = self
            .ctx
            .ledger
            .await_confirmation(deployment.tx_hash)
            .await
            .map_err(failure)?;
        let address = receipt.contract_address.unwrap_or(deployment.address);

        self.ctx.addresses.record(name, address)?;
        self.ctx.artifacts.write(
            &Artifact::new(name, component.abi.clone(), bytecode)
                .with_address(address)
                .with_implementation(address)
                .with_version(&self.ctx.config.version)
                .with_libraries(libraries),
        )?;
        tracing::info!("Deployed {} at {}", name, address);
        Ok(address)
    }

    async fn call_as_owner(&self, unit: &str, function: &str, args: &[Value]) -> Result<()> {
        let address = self
            .ctx
            .artifacts
            .read(unit)
            .and_then(|a| a.address)
            .ok_or_else(|| OrchestratorError::UnresolvedDependency {
                unit: unit.to_string(),
                dependency: format!("artifact for {unit}"),
            })?;
        let signature = self.ctx.handle(unit, address)?.signature(function, args)?;
        let failure = |source| TransactionFailure::new(unit, address, &signature, args, source);
        let tx = self
            .ctx
            .ledger
            .call(address, &signature, args, self.ctx.roles.owner)
            .await
            .map_err(failure)?;
        self.ctx.ledger.await_confirmation(tx).await.map_err(failure)?;
        Ok(())
    }

    fn book_from_artifacts(&self, names: &[&str]) -> AddressBook {
        let mut book = AddressBook::new();
        for name in names {
            if book.contains(name) {
                continue;
            }
            if let Some(address) = self.ctx.artifacts.read(name).and_then(|a| a.address) {
                book.insert(DeployedUnit {
                    name: (*name).to_string(),
                    address,
                    implementation: address,
                    libraries: BTreeMap::new(),
                    newly_deployed: false,
                });
            }
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deprecation_targets_only_token_and_registry_units() {
        let steps = deprecation_steps();
        assert_eq!(steps.len(), 8);
        let targets: std::collections::BTreeSet<_> = steps.iter().filter_map(Step::target).collect();
        assert_eq!(
            targets.into_iter().collect::<Vec<_>>(),
            vec!["DIDRegistry", "NFT1155Upgradeable", "NFT721Upgradeable"]
        );
    }
}
