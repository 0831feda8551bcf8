//! Dependency-ordered, idempotent deployment
//!
//! For each unit of the plan the planner either re-attaches to the address
//! recorded in the cache or deploys it:
//!
//! - libraries are deployed once, without initializer
//! - auxiliary units (and every unit when proxies are disabled) are deployed
//!   directly and then initialized
//! - core units get an implementation, a shared proxy admin and a
//!   transparent proxy whose constructor runs the initializer
//!
//! Every new address is written to the cache file as soon as it is
//! confirmed, so an interrupted run resumes where it stopped.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use ordo_artifact::{Address, Artifact, IMPLEMENTATION_SLOT};
use ordo_ledger::{codec, Component, Value};

use crate::context::DeploymentContext;
use crate::error::{OrchestratorError, Result, TransactionFailure};
use crate::plan::{DeploymentPlan, UnitSpec};

/// Component name of the shared proxy administrator
pub const PROXY_ADMIN: &str = "ProxyAdmin";

/// Component name of the transparent proxy
pub const PROXY: &str = "TransparentUpgradeableProxy";

/// A unit with its resolved addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedUnit {
    pub name: String,
    pub address: Address,
    /// Equals `address` for units without a proxy
    pub implementation: Address,
    pub libraries: BTreeMap<String, Address>,
    /// Deployed during this run rather than re-attached
    pub newly_deployed: bool,
}

/// Units processed in this run, in plan order
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    units: IndexMap<String, DeployedUnit>,
}

impl AddressBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: DeployedUnit) {
        self.units.insert(unit.name.clone(), unit);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DeployedUnit> {
        self.units.get(name)
    }

    #[must_use]
    pub fn address(&self, name: &str) -> Option<Address> {
        self.units.get(name).map(|u| u.address)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeployedUnit> {
        self.units.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Names of units deployed (not re-attached) in this run
    #[must_use]
    pub fn newly_deployed(&self) -> Vec<&str> {
        self.units
            .values()
            .filter(|u| u.newly_deployed)
            .map(|u| u.name.as_str())
            .collect()
    }
}

/// Deploys or re-attaches every unit of a plan
#[derive(Debug)]
pub struct DeploymentPlanner<'a> {
    ctx: &'a DeploymentContext,
}

impl<'a> DeploymentPlanner<'a> {
    #[must_use]
    pub fn new(ctx: &'a DeploymentContext) -> Self {
        Self { ctx }
    }

    /// Copy addresses of core units and libraries from existing artifacts into the cache
    ///
    /// Skipped entirely in fresh mode. Returns the number of units seeded.
    pub fn seed_from_artifacts(&self, plan: &DeploymentPlan) -> usize {
        if self.ctx.config.fresh {
            return 0;
        }
        let mut seeded = 0;
        for unit in plan.included(&self.ctx.config) {
            if !(unit.is_core || unit.is_library()) || self.ctx.addresses.get(&unit.name).is_some() {
                continue;
            }
            if let Some(address) = self.ctx.artifacts.read(&unit.name).and_then(|a| a.address) {
                if address.is_zero() {
                    continue;
                }
                tracing::info!("Using existing artifact for {} at {}", unit.name, address);
                self.ctx.addresses.insert(&unit.name, address);
                seeded += 1;
            }
        }
        seeded
    }

    /// Process the whole plan in order
    ///
    /// # Errors
    /// Returns the first fatal error: invalid plan, missing core unit,
    /// unresolved dependency, failed deployment or persistence failure.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<AddressBook> {
        plan.validate()?;
        self.seed_from_artifacts(plan);

        let mut book = AddressBook::new();
        for unit in plan.included(&self.ctx.config) {
            let deployed = self.deploy_or_attach(unit, &book).await?;
            book.insert(deployed);
        }

        let fresh = book.newly_deployed().len();
        tracing::info!(
            "Planner finished: {} units, {} deployed, {} re-attached",
            book.len(),
            fresh,
            book.len() - fresh
        );
        Ok(book)
    }

    /// Resolve one unit to an address, deploying it only if it is not cached
    ///
    /// # Errors
    /// Returns `MissingCoreArtifact` when core deployment is disabled and the
    /// unit is not cached, `UnresolvedDependency` when an argument or library
    /// has no address yet, `Interface` when no initializer takes the unit's
    /// arguments, or the failure of the deployment itself.
    pub async fn deploy_or_attach(&self, unit: &UnitSpec, book: &AddressBook) -> Result<DeployedUnit> {
        let cached = self.ctx.addresses.get(&unit.name);

        if unit.is_core && !self.ctx.config.deploy_core && cached.is_none() {
            return Err(OrchestratorError::MissingCoreArtifact(unit.name.clone()));
        }

        let libraries = self.resolve_libraries(unit, book)?;
        let component = self.ctx.registry.component(&unit.name)?;
        let bytecode = component.link(&libraries)?;

        let deployed = match cached {
            Some(address) => self.attach(unit, address, libraries).await?,
            None => self.deploy_new(unit, &component, &bytecode, libraries, book).await?,
        };

        let artifact = Artifact::new(&unit.name, component.abi.clone(), bytecode)
            .with_address(deployed.address)
            .with_implementation(deployed.implementation)
            .with_version(&self.ctx.config.version)
            .with_libraries(deployed.libraries.clone());
        self.ctx.artifacts.write(&artifact)?;

        Ok(deployed)
    }

    fn resolve_libraries(&self, unit: &UnitSpec, book: &AddressBook) -> Result<BTreeMap<String, Address>> {
        unit.libraries
            .iter()
            .map(|lib| {
                book.address(lib)
                    .map(|a| (lib.clone(), a))
                    .ok_or_else(|| OrchestratorError::UnresolvedDependency {
                        unit: unit.name.clone(),
                        dependency: lib.clone(),
                    })
            })
            .collect()
    }

    async fn attach(
        &self,
        unit: &UnitSpec,
        address: Address,
        libraries: BTreeMap<String, Address>,
    ) -> Result<DeployedUnit> {
        let handle = self.ctx.handle(&unit.name, address)?;
        let implementation = if unit.is_proxied(&self.ctx.config) {
            let word = self.ctx.ledger.read_storage_at(address, IMPLEMENTATION_SLOT).await?;
            let slot = Address::from_word(word);
            if slot.is_zero() {
                address
            } else {
                slot
            }
        } else {
            address
        };
        tracing::debug!("Re-attached {} at {}", handle.name, handle.address);
        Ok(DeployedUnit {
            name: unit.name.clone(),
            address,
            implementation,
            libraries,
            newly_deployed: false,
        })
    }

    async fn deploy_new(
        &self,
        unit: &UnitSpec,
        component: &Arc<Component>,
        bytecode: &str,
        libraries: BTreeMap<String, Address>,
        book: &AddressBook,
    ) -> Result<DeployedUnit> {
        let args = unit
            .args
            .iter()
            .map(|arg| arg.resolve(&unit.name, |n| book.address(n), &self.ctx.roles, &self.ctx.config))
            .collect::<Result<Vec<Value>>>()?;

        let (address, implementation) = if unit.is_library() {
            let address = self.deploy_code(&unit.name, bytecode, &[]).await?;
            (address, address)
        } else if unit.is_proxied(&self.ctx.config) {
            let implementation = self.deploy_code(&unit.name, bytecode, &[]).await?;
            let admin = self.ensure_proxy_admin().await?;
            let init = match initializer(component, &unit.name, args.len())? {
                Some(signature) => codec::encode_call(&signature, &args)?,
                None => Vec::new(),
            };
            let proxy_code = self.ctx.registry.component(PROXY)?;
            let proxy = self
                .deploy_code(
                    &unit.name,
                    &proxy_code.bytecode,
                    &[Value::Address(implementation), Value::Address(admin), Value::Bytes(init.into())],
                )
                .await?;
            (proxy, implementation)
        } else {
            let address = self.deploy_code(&unit.name, bytecode, &[]).await?;
            if let Some(signature) = initializer(component, &unit.name, args.len())? {
                self.send(&unit.name, address, &signature, &args).await?;
            }
            (address, address)
        };

        self.ctx.addresses.record(&unit.name, address)?;
        tracing::info!("Deployed {} at {}", unit.name, address);

        Ok(DeployedUnit {
            name: unit.name.clone(),
            address,
            implementation,
            libraries,
            newly_deployed: true,
        })
    }

    /// The shared proxy admin, deployed on first use and owned by the deployer
    async fn ensure_proxy_admin(&self) -> Result<Address> {
        if let Some(admin) = self.ctx.addresses.get(PROXY_ADMIN) {
            return Ok(admin);
        }
        let component = self.ctx.registry.component(PROXY_ADMIN)?;
        let admin = self
            .deploy_code(PROXY_ADMIN, &component.bytecode, &[Value::Address(self.ctx.roles.deployer)])
            .await?;
        self.ctx.addresses.record(PROXY_ADMIN, admin)?;
        self.ctx.artifacts.write(
            &Artifact::new(PROXY_ADMIN, component.abi.clone(), component.bytecode.clone())
                .with_address(admin)
                .with_implementation(admin)
                .with_version(&self.ctx.config.version),
        )?;
        tracing::info!("Deployed {} at {}", PROXY_ADMIN, admin);
        Ok(admin)
    }

    async fn deploy_code(&self, name: &str, bytecode: &str, args: &[Value]) -> Result<Address> {
        let deployer = self.ctx.roles.deployer;
        let failure = |source| TransactionFailure::new(name, Address::ZERO, "constructor", args, source);

        let deployment = self
            .ctx
            .ledger
            .deploy(bytecode, args, deployer)
            .await
            .map_err(failure)?;
        let receipt = self
            .ctx
            .ledger
            .await_confirmation(deployment.tx_hash)
            .await
            .map_err(failure)?;
        Ok(receipt.contract_address.unwrap_or(deployment.address))
    }

    async fn send(&self, name: &str, address: Address, signature: &str, args: &[Value]) -> Result<()> {
        let deployer = self.ctx.roles.deployer;
        let failure = |source| TransactionFailure::new(name, address, signature, args, source);
        let tx = self
            .ctx
            .ledger
            .call(address, signature, args, deployer)
            .await
            .map_err(failure)?;
        self.ctx.ledger.await_confirmation(tx).await.map_err(failure)?;
        Ok(())
    }
}

/// Initializer taking exactly `arity` arguments; required whenever arguments are given
fn initializer(component: &Component, unit: &str, arity: usize) -> Result<Option<String>> {
    match component.initializer(arity) {
        Some(signature) => Ok(Some(signature)),
        None if arity == 0 => Ok(None),
        None => Err(OrchestratorError::Interface {
            unit: unit.to_string(),
            function: "initialize".to_string(),
            arity,
        }),
    }
}

#[cfg(test)]
mod tests {
    use ordo_artifact::AbiEntry;

    use super::*;

    #[test]
    fn initializer_arity_must_match_exactly() {
        let component = Component::new("Dispenser", vec![AbiEntry::function("initialize", &["address"])], "0x");
        assert_eq!(
            initializer(&component, "Dispenser", 1).unwrap().as_deref(),
            Some("initialize(address)")
        );
        assert_eq!(initializer(&component, "Dispenser", 0).unwrap(), None);

        let err = initializer(&component, "Dispenser", 3).unwrap_err();
        assert!(matches!(err, OrchestratorError::Interface { arity: 3, .. }));
        assert_eq!(err.kind(), "InterfaceMismatch");
        assert!(err.is_fatal());
    }
}
