//! Run-wide context handed to every component
//!
//! [`DeploymentContext`] bundles the immutable configuration, the resolved
//! [`Roles`], the collaborator handles and the shared address cache. It is
//! cheap to clone and never mutated after construction.

use std::sync::Arc;

use ordo_artifact::{Address, ArtifactStore};
use ordo_ledger::{Component, ComponentRegistry, Ledger, MultisigCustody, Value};
use serde::{Deserialize, Serialize};

use crate::cache::SharedAddressCache;
use crate::config::{ConfigError, DeployConfig};
use crate::error::{OrchestratorError, Result};

/// Identities acting during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    /// Submits deployments and initial configuration
    pub deployer: Address,

    /// Final owner of every ownable unit
    pub owner: Address,

    pub governor: Address,

    /// Holds upgrade authority over the proxy admin (the multisig)
    pub upgrader: Address,

    /// Members of the upgrader multisig able to approve and execute
    #[serde(default)]
    pub approvers: Vec<Address>,
}

impl Roles {
    /// Every role held by a single identity
    #[must_use]
    pub fn single(identity: Address) -> Self {
        Self {
            deployer: identity,
            owner: identity,
            governor: identity,
            upgrader: identity,
            approvers: Vec::new(),
        }
    }

    /// # Errors
    /// Returns error if the deployer is unset or approvers repeat
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deployer.is_zero() {
            return Err(ConfigError::Roles("deployer must be set".to_string()));
        }
        let mut seen = self.approvers.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.approvers.len() {
            return Err(ConfigError::Roles("approvers must be distinct".to_string()));
        }
        Ok(())
    }

    /// Address of a role
    #[must_use]
    pub const fn address_of(&self, role: RoleKind) -> Address {
        match role {
            RoleKind::Deployer => self.deployer,
            RoleKind::Owner => self.owner,
            RoleKind::Governor => self.governor,
            RoleKind::Upgrader => self.upgrader,
        }
    }
}

/// Role reference usable as a call argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Deployer,
    Owner,
    Governor,
    Upgrader,
}

/// Everything a pipeline component needs
#[derive(Clone)]
pub struct DeploymentContext {
    pub config: Arc<DeployConfig>,
    pub roles: Roles,
    pub ledger: Arc<dyn Ledger>,
    pub registry: Arc<dyn ComponentRegistry>,
    pub custody: Arc<dyn MultisigCustody>,
    pub artifacts: ArtifactStore,
    pub addresses: SharedAddressCache,
}

impl std::fmt::Debug for DeploymentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentContext")
            .field("config", &self.config)
            .field("roles", &self.roles)
            .field("artifacts", &self.artifacts)
            .field("addresses", &self.addresses.path())
            .finish_non_exhaustive()
    }
}

impl DeploymentContext {
    /// Assemble a context; the artifact store and cache come from the config paths
    ///
    /// # Errors
    /// Returns error if the configuration or roles are invalid or the cache is unreadable
    pub fn new(
        config: DeployConfig,
        roles: Roles,
        ledger: Arc<dyn Ledger>,
        registry: Arc<dyn ComponentRegistry>,
        custody: Arc<dyn MultisigCustody>,
    ) -> Result<Self> {
        config.validate()?;
        roles.validate()?;
        let artifacts = ArtifactStore::new(&config.paths.artifacts_dir, &config.network);
        let addresses = SharedAddressCache::open(&config.paths.deploy_cache)?;
        Ok(Self {
            config: Arc::new(config),
            roles,
            ledger,
            registry,
            custody,
            artifacts,
            addresses,
        })
    }

    /// Capability handle for a unit at a known address
    ///
    /// # Errors
    /// Returns error if the registry has no component of that name
    pub fn handle(&self, name: &str, address: Address) -> Result<UnitHandle> {
        let component = self.registry.component(name)?;
        Ok(UnitHandle {
            name: name.to_string(),
            address,
            component,
        })
    }
}

/// A unit bound to its address and interface
///
/// Calls are only built for functions the interface actually declares.
#[derive(Debug, Clone)]
pub struct UnitHandle {
    pub name: String,
    pub address: Address,
    component: Arc<Component>,
}

impl UnitHandle {
    #[must_use]
    pub fn component(&self) -> &Component {
        &self.component
    }

    /// Canonical signature of `function` for these arguments
    ///
    /// # Errors
    /// Returns error if the interface does not declare the function
    pub fn signature(&self, function: &str, args: &[Value]) -> Result<String> {
        self.component
            .function_signature(function, args.len())
            .ok_or_else(|| OrchestratorError::Interface {
                unit: self.name.clone(),
                function: function.to_string(),
                arity: args.len(),
            })
    }
}
