//! Error types for the orchestrator
//!
//! Failures fall into two classes:
//! - Fatal: configuration, unresolved dependencies, interface mismatches,
//!   missing core units, persistence and interruption. The run flushes the address cache and halts.
//! - Recoverable: individual transactions, direct upgrades and multisig
//!   flows. These are logged with full call context and the run continues,
//!   unless strict mode promotes a [`TransactionFailure`] to fatal.

use ordo_artifact::{Address, StoreError};
use ordo_ledger::{display_args, LedgerError, RegistryError, Value};

use crate::config::ConfigError;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid configuration, detected before any chain interaction
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A unit references something that has no address yet
    #[error("unresolved dependency: {unit} needs {dependency}")]
    UnresolvedDependency { unit: String, dependency: String },

    /// A unit's interface has no function of the name and arity a call needs
    #[error("interface mismatch: {unit} declares no {function} taking {arity} arguments")]
    Interface { unit: String, function: String, arity: usize },

    /// Core-already-exists mode and a core unit is not in the cache
    #[error("missing core artifact: {0} is not deployed and core deployment is disabled")]
    MissingCoreArtifact(String),

    /// A transaction failed where no recovery applies, or in strict mode
    #[error("transaction failed: {0}")]
    Transaction(#[from] TransactionFailure),

    /// Upgrade failure in fail-fast mode
    #[error("upgrade failed: {0}")]
    Upgrade(#[from] UpgradeFailure),

    /// Interface or bytecode lookup failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Ledger failure outside a recoverable call
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Artifact persistence failed
    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),

    /// Cache persistence failed
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Run stopped by an external interruption
    #[error("interrupted")]
    Interrupted,
}

impl OrchestratorError {
    /// Whether this kind is normally absorbed by the stage machine or the upgrade coordinator
    ///
    /// Such an error only reaches the top level in strict or fail-fast mode.
    #[inline]
    #[must_use]
    pub const fn is_recoverable_kind(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Upgrade(_))
    }

    /// Whether the run must halt on this error
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable_kind()
    }

    /// Short kind label used in summaries
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::UnresolvedDependency { .. } => "UnresolvedDependency",
            Self::Interface { .. } => "InterfaceMismatch",
            Self::MissingCoreArtifact(_) => "MissingCoreArtifact",
            Self::Transaction(_) => "TransactionFailure",
            Self::Upgrade(_) => "UpgradeFailure",
            Self::Registry(_) => "RegistryError",
            Self::Ledger(_) => "LedgerError",
            Self::Store(_) => "StoreError",
            Self::Cache(_) => "CacheError",
            Self::Interrupted => "Interrupted",
        }
    }
}

/// A single on-chain call that did not confirm
#[derive(Debug, thiserror::Error)]
#[error("{function} on {target} ({address}) with {} failed: {source}", display_args(.args))]
pub struct TransactionFailure {
    pub target: String,
    pub address: Address,
    pub function: String,
    pub args: Vec<Value>,
    #[source]
    pub source: LedgerError,
}

impl TransactionFailure {
    #[must_use]
    pub fn new(target: &str, address: Address, function: &str, args: &[Value], source: LedgerError) -> Self {
        Self {
            target: target.to_string(),
            address,
            function: function.to_string(),
            args: args.to_vec(),
            source,
        }
    }
}

/// Direct upgrade of one unit did not go through
#[derive(Debug, thiserror::Error)]
#[error("upgrade of {unit} at {proxy} failed: {source}")]
pub struct UpgradeFailure {
    pub unit: String,
    pub proxy: Address,
    #[source]
    pub source: Box<OrchestratorError>,
}

/// Multi-party approval flow did not execute
#[derive(Debug, thiserror::Error)]
#[error("multisig execution for {unit} failed: {source}")]
pub struct MultisigFailure {
    pub unit: String,
    #[source]
    pub source: LedgerError,
}

/// Cache persistence errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Cache file exists but cannot be read
    #[error("cannot read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache file is not valid JSON of the expected shape
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Writing the cache failed
    #[error("cannot write cache: {0}")]
    Write(#[from] StoreError),
}

/// Result alias for orchestrator operations
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_failure_names_target_and_args() {
        let failure = TransactionFailure::new(
            "NeverminedConfig",
            Address::new([1; 20]),
            "setGovernor(address)",
            &[Value::Address(Address::new([2; 20]))],
            LedgerError::Reverted(ordo_artifact::B256::ZERO),
        );
        let msg = failure.to_string();
        assert!(msg.contains("setGovernor(address)"));
        assert!(msg.contains("NeverminedConfig"));
        assert!(msg.contains(&Address::new([2; 20]).to_string()));
        assert!(msg.contains("reverted"));
    }

    #[test]
    fn kinds() {
        assert_eq!(OrchestratorError::MissingCoreArtifact("X".into()).kind(), "MissingCoreArtifact");
        assert_eq!(OrchestratorError::Interrupted.kind(), "Interrupted");
        let mismatch = OrchestratorError::Interface {
            unit: "NFT721Upgradeable".into(),
            function: "initialize".into(),
            arity: 7,
        };
        assert_eq!(mismatch.kind(), "InterfaceMismatch");
        assert!(mismatch.is_fatal());
        assert!(mismatch.to_string().contains("initialize taking 7 arguments"));
    }
}
