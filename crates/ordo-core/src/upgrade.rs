//! Upgrade of deployed core units
//!
//! Each core unit moves from `Pending` to one of:
//!
//! - `UpgradedDirect`: the deployer still controls the proxy admin
//! - `UpgradedViaMultisig`: the direct call failed and the 2-of-N custody
//!   flow executed the admin upgrade (or there was nothing to upgrade)
//! - `Failed`: the custody flow did not execute; the payload stays in
//!   `transactions.json` for manual signing
//! - `Skipped`: not attempted
//!
//! Preparing an implementation is memoised per run, so the fallback never
//! deploys a second copy of the code the direct attempt already deployed.

use std::collections::HashMap;

use ordo_artifact::{keccak256, Address, Artifact, ADMIN_SLOT, IMPLEMENTATION_SLOT};
use ordo_ledger::{LedgerError, PendingTransaction, TxHash, Value};

use crate::cache::{write_pending_transactions, UpgradeSuccessCache};
use crate::context::DeploymentContext;
use crate::error::{MultisigFailure, Result, TransactionFailure, UpgradeFailure};
use crate::plan::{DeploymentPlan, UnitSpec};

/// Admin function rewriting a proxy's implementation
pub const UPGRADE_SIGNATURE: &str = "upgrade(address,address)";

/// Per-unit upgrade state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    Pending,
    UpgradedDirect,
    UpgradedViaMultisig,
    Failed,
    Skipped(String),
}

impl UpgradeState {
    #[inline]
    #[must_use]
    pub const fn is_upgraded(&self) -> bool {
        matches!(self, Self::UpgradedDirect | Self::UpgradedViaMultisig)
    }
}

/// Outcome for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitUpgrade {
    pub unit: String,
    pub proxy: Option<Address>,
    pub implementation: Option<Address>,
    pub state: UpgradeState,
}

impl UnitUpgrade {
    fn skipped(unit: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::info!("Skipping upgrade of {}: {}", unit, reason);
        Self {
            unit: unit.to_string(),
            proxy: None,
            implementation: None,
            state: UpgradeState::Skipped(reason),
        }
    }
}

/// Summary of an upgrade run
#[derive(Debug, Clone, Default)]
pub struct UpgradeReport {
    pub outcomes: Vec<UnitUpgrade>,
    /// Admin calls routed through the multisig in this run
    pub pending: Vec<PendingTransaction>,
}

impl UpgradeReport {
    #[must_use]
    pub fn state_of(&self, unit: &str) -> Option<&UpgradeState> {
        self.outcomes.iter().find(|o| o.unit == unit).map(|o| &o.state)
    }

    /// Units that ended in `Failed`
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.state == UpgradeState::Failed)
            .map(|o| o.unit.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Prepared {
    implementation: Address,
    artifact: Artifact,
}

/// Drives upgrades of every core unit
#[derive(Debug)]
pub struct UpgradeCoordinator<'a> {
    ctx: &'a DeploymentContext,
    prepared: HashMap<String, Prepared>,
}

impl<'a> UpgradeCoordinator<'a> {
    #[must_use]
    pub fn new(ctx: &'a DeploymentContext) -> Self {
        Self {
            ctx,
            prepared: HashMap::new(),
        }
    }

    /// Upgrade all core units of the plan
    ///
    /// Pending multisig transactions are written to the transactions file
    /// as each one is queued, and once more when the run ends.
    ///
    /// # Errors
    /// Returns `UpgradeFailure` on the first direct failure in fail-fast
    /// mode, or a persistence error
    pub async fn run(&mut self, plan: &DeploymentPlan) -> Result<UpgradeReport> {
        let paths = self.ctx.config.paths.clone();
        let mut success = UpgradeSuccessCache::load(&paths.upgrade_cache)?;
        let mut report = UpgradeReport::default();

        let mut outcome = Ok(());
        for unit in plan.units().iter().filter(|u| u.is_core || u.is_library()) {
            match self.upgrade_unit(unit, &mut success, &mut report.pending).await {
                Ok(upgrade) => report.outcomes.push(upgrade),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        write_pending_transactions(&paths.transactions, &report.pending)?;
        outcome?;

        let upgraded = report.outcomes.iter().filter(|o| o.state.is_upgraded()).count();
        tracing::info!(
            "Upgrade finished: {} upgraded, {} failed, {} pending transactions",
            upgraded,
            report.failed().len(),
            report.pending.len()
        );
        Ok(report)
    }

    async fn upgrade_unit(
        &mut self,
        unit: &UnitSpec,
        success: &mut UpgradeSuccessCache,
        pending: &mut Vec<PendingTransaction>,
    ) -> Result<UnitUpgrade> {
        let name = unit.name.as_str();
        if success.is_done(name) {
            return Ok(UnitUpgrade::skipped(name, "already upgraded"));
        }
        if unit.is_library() {
            return Ok(UnitUpgrade::skipped(name, "library, use upgrade-library"));
        }
        if !unit.is_proxied(&self.ctx.config) {
            return Ok(UnitUpgrade::skipped(name, "not behind a proxy"));
        }
        let Some((artifact, proxy)) = self
            .ctx
            .artifacts
            .read(name)
            .and_then(|a| a.address.map(|address| (a, address)))
        else {
            return Ok(UnitUpgrade::skipped(name, "not deployed"));
        };

        tracing::info!("Upgrading {} at {}", name, proxy);
        let direct = self.upgrade_direct(unit, proxy, &artifact).await;
        let (state, implementation) = match direct {
            Ok(implementation) => {
                success.mark_done(name);
                success.save(&self.ctx.config.paths.upgrade_cache)?;
                (UpgradeState::UpgradedDirect, Some(implementation))
            }
            Err(e) => {
                tracing::warn!("Cannot upgrade {} directly: {}", name, e);
                if self.ctx.config.fail_fast {
                    return Err(UpgradeFailure {
                        unit: name.to_string(),
                        proxy,
                        source: Box::new(e),
                    }
                    .into());
                }
                self.upgrade_via_multisig(unit, proxy, &artifact, pending).await?
            }
        };

        Ok(UnitUpgrade {
            unit: name.to_string(),
            proxy: Some(proxy),
            implementation,
            state,
        })
    }

    /// Prepare, then call the admin as the deployer
    async fn upgrade_direct(&mut self, unit: &UnitSpec, proxy: Address, artifact: &Artifact) -> Result<Address> {
        let prepared = self.prepare(unit, artifact).await?;
        let current = self.implementation_of(proxy).await?;
        if current == prepared.implementation {
            tracing::info!("{} already runs {}", unit.name, current);
        } else {
            let admin = self.admin_of(&unit.name, proxy).await?;
            let args = [Value::Address(proxy), Value::Address(prepared.implementation)];
            let failure = |source| TransactionFailure::new(&unit.name, admin, UPGRADE_SIGNATURE, &args, source);
            let tx = self
                .ctx
                .ledger
                .call(admin, UPGRADE_SIGNATURE, &args, self.ctx.roles.deployer)
                .await
                .map_err(failure)?;
            self.ctx.ledger.await_confirmation(tx).await.map_err(failure)?;
        }
        self.ctx.artifacts.write(&prepared.artifact)?;
        Ok(prepared.implementation)
    }

    async fn upgrade_via_multisig(
        &mut self,
        unit: &UnitSpec,
        proxy: Address,
        artifact: &Artifact,
        pending: &mut Vec<PendingTransaction>,
    ) -> Result<(UpgradeState, Option<Address>)> {
        let name = unit.name.as_str();
        let prepared = match self.prepare(unit, artifact).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("Cannot prepare an implementation for {}: {}", name, e);
                return Ok((UpgradeState::Failed, None));
            }
        };
        self.ctx.artifacts.write(&prepared.artifact)?;

        let (current, admin) = match self.slots_of(name, proxy).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!("Cannot read proxy slots of {}: {}", name, e);
                return Ok((UpgradeState::Failed, Some(prepared.implementation)));
            }
        };
        if current == prepared.implementation {
            tracing::info!("Nothing to upgrade for {}", name);
            return Ok((UpgradeState::UpgradedViaMultisig, Some(prepared.implementation)));
        }

        tracing::info!("Multisig upgrade of {}: {} -> {}", name, current, prepared.implementation);
        let args = vec![Value::Address(proxy), Value::Address(prepared.implementation)];
        let tx = PendingTransaction::call(admin, UPGRADE_SIGNATURE, args.clone())
            .map_err(|source| TransactionFailure::new(name, admin, UPGRADE_SIGNATURE, &args, source))?
            .with_description(format!("upgrade {name} to {}", prepared.implementation));
        pending.push(tx.clone());
        write_pending_transactions(&self.ctx.config.paths.transactions, pending)?;

        let state = match self.execute_multisig(name, &tx).await {
            Ok(hash) => {
                tracing::info!("Executed multisig upgrade of {} in {}", name, hash);
                UpgradeState::UpgradedViaMultisig
            }
            Err(failure) => {
                let payload = serde_json::to_string(&tx).unwrap_or_else(|_| format!("{tx:?}"));
                tracing::warn!("{}; transaction left for signers: {}", failure, payload);
                UpgradeState::Failed
            }
        };
        Ok((state, Some(prepared.implementation)))
    }

    /// First approver approves the hash, second approver executes
    ///
    /// Only the approver whose approval is on record is handed to custody,
    /// next to the executor.
    async fn execute_multisig(&self, unit: &str, tx: &PendingTransaction) -> Result<TxHash, MultisigFailure> {
        let failure = |source| MultisigFailure {
            unit: unit.to_string(),
            source,
        };
        let approvers = &self.ctx.roles.approvers;
        let [first, second, ..] = approvers.as_slice() else {
            return Err(failure(LedgerError::Custody(format!(
                "two approvers required, {} configured",
                approvers.len()
            ))));
        };
        let safe = self.ctx.roles.upgrader;
        let custody = &self.ctx.custody;

        let hash = custody.transaction_hash(safe, tx).await.map_err(failure)?;
        custody.approve_hash(safe, hash, *first).await.map_err(failure)?;
        custody.execute(safe, tx, &[*first], *second).await.map_err(failure)
    }

    /// New implementation for a unit; reuses the recorded one when the code is unchanged
    async fn prepare(&mut self, unit: &UnitSpec, artifact: &Artifact) -> Result<Prepared> {
        if let Some(prepared) = self.prepared.get(&unit.name) {
            return Ok(prepared.clone());
        }

        let component = self.ctx.registry.component(&unit.name)?;
        let bytecode = component.link(&artifact.libraries)?;
        let unchanged = keccak256(bytecode.as_bytes()) == keccak256(artifact.bytecode.as_bytes());

        let implementation = match artifact.implementation {
            Some(implementation) if unchanged && !implementation.is_zero() => implementation,
            _ => {
                let deployer = self.ctx.roles.deployer;
                let failure = |source| TransactionFailure::new(&unit.name, Address::ZERO, "constructor", &[], source);
                let deployment = self
                    .ctx
                    .ledger
                    .deploy(&bytecode, &[], deployer)
                    .await
                    .map_err(failure)?;
                let receipt = self
                    .ctx
                    .ledger
                    .await_confirmation(deployment.tx_hash)
                    .await
                    .map_err(failure)?;
                let address = receipt.contract_address.unwrap_or(deployment.address);
                tracing::info!("Deployed new implementation of {} at {}", unit.name, address);
                address
            }
        };

        let mut updated = Artifact::new(&unit.name, component.abi.clone(), bytecode)
            .with_implementation(implementation)
            .with_version(&self.ctx.config.version)
            .with_libraries(artifact.libraries.clone());
        updated.address = artifact.address;

        let prepared = Prepared {
            implementation,
            artifact: updated,
        };
        self.prepared.insert(unit.name.clone(), prepared.clone());
        Ok(prepared)
    }

    /// Current implementation and admin of a proxy
    async fn slots_of(&self, unit: &str, proxy: Address) -> Result<(Address, Address)> {
        Ok((self.implementation_of(proxy).await?, self.admin_of(unit, proxy).await?))
    }

    async fn implementation_of(&self, proxy: Address) -> Result<Address> {
        let word = self.ctx.ledger.read_storage_at(proxy, IMPLEMENTATION_SLOT).await?;
        Ok(Address::from_word(word))
    }

    /// Admin recorded in the proxy; an empty slot leaves nobody to send the upgrade to
    async fn admin_of(&self, unit: &str, proxy: Address) -> Result<Address> {
        let word = self.ctx.ledger.read_storage_at(proxy, ADMIN_SLOT).await?;
        let admin = Address::from_word(word);
        if admin.is_zero() {
            return Err(TransactionFailure::new(
                unit,
                proxy,
                UPGRADE_SIGNATURE,
                &[],
                LedgerError::Rejected {
                    to: proxy,
                    function: UPGRADE_SIGNATURE.to_string(),
                    reason: "proxy admin slot is empty".to_string(),
                },
            )
            .into());
        }
        Ok(admin)
    }
}
