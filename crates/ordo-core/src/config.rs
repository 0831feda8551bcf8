//! Run configuration
//!
//! [`DeployConfig`] is read from environment variables (or any injected
//! lookup), refined with `with_*` overrides from the command line, and
//! validated before the ledger is touched. Per-network connection details
//! and roles live in a TOML [`Settings`] file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ordo_artifact::Address;
use serde::{Deserialize, Serialize};

use crate::context::Roles;

/// Upper bound of the marketplace fee rate (parts per million)
pub const FEE_RATE_MAX: i64 = 1_000_000;

/// Environment variable names
pub mod env {
    pub const NETWORK: &str = "ORDO_NETWORK";
    pub const NO_PROXY: &str = "ORDO_NO_PROXY";
    /// Shared with HTTP clients as a host bypass list; only `true` selects no-proxy mode
    pub const LEGACY_NO_PROXY: &str = "NO_PROXY";
    pub const STRICT: &str = "ORDO_STRICT";
    pub const TESTNET: &str = "TESTNET";
    pub const WITH_TOKEN: &str = "ORDO_WITH_TOKEN";
    pub const DEPLOY_CORE: &str = "ORDO_DEPLOY_CORE";
    pub const FRESH: &str = "ORDO_FRESH";
    pub const FAIL_FAST: &str = "ORDO_FAIL_FAST";
    pub const FEE_RATE: &str = "ORDO_FEE_RATE";
    pub const FEE_RECEIVER: &str = "ORDO_FEE_RECEIVER";
    pub const FORWARDER: &str = "ORDO_FORWARDER";
    pub const STATE_DIR: &str = "ORDO_STATE_DIR";
}

/// Built-in meta-transaction forwarders by chain id
const DEFAULT_FORWARDERS: &[(u64, &str)] = &[
    (80001, "0x4d4581c01A457925410cd3877d17b2fd4553b2C5"),
    (1, "0xAa3E82b4c4093b4bA13Cb5714382C99ADBf750cA"),
    (137, "0xdA78a11FD57aF7be2eDD804840eA7f4c2A38801d"),
];

/// Default forwarder for a chain, if one is known
#[must_use]
pub fn default_forwarder(chain_id: u64) -> Option<Address> {
    DEFAULT_FORWARDERS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .and_then(|(_, raw)| raw.parse().ok())
}

/// Marketplace fee settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeeConfig {
    /// Parts per million, `0..=1_000_000`
    pub rate: i64,
    pub receiver: Address,
}

impl FeeConfig {
    /// # Errors
    /// Returns error if the rate is out of range, or positive without a receiver
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=FEE_RATE_MAX).contains(&self.rate) {
            return Err(ConfigError::FeeOutOfRange(self.rate));
        }
        if self.rate > 0 && self.receiver.is_zero() {
            return Err(ConfigError::MissingFeeReceiver(self.rate));
        }
        Ok(())
    }

    /// Rate as an on-chain integer; only meaningful after [`Self::validate`]
    #[must_use]
    pub fn rate_value(&self) -> u128 {
        u128::try_from(self.rate).unwrap_or(0)
    }
}

/// Files the orchestrator reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePaths {
    pub artifacts_dir: PathBuf,
    pub deploy_cache: PathBuf,
    pub upgrade_cache: PathBuf,
    pub transactions: PathBuf,
}

impl StatePaths {
    /// Standard layout under `root`
    #[must_use]
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            artifacts_dir: root.join("artifacts"),
            deploy_cache: root.join("deploy-cache.json"),
            upgrade_cache: root.join("upgrade-cache.json"),
            transactions: root.join("transactions.json"),
        }
    }
}

impl Default for StatePaths {
    fn default() -> Self {
        Self::under(".")
    }
}

/// Immutable settings of one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Network selector; also the artifact file suffix
    pub network: String,

    /// Deploy every unit directly, even core units
    pub no_proxy: bool,

    /// Abort on the first failed administrative call
    pub strict: bool,

    /// Testnet profile: adds the token and dispenser units
    pub testnet: bool,

    /// Deploy the token outside the testnet profile
    pub with_token: bool,

    /// When false, core units must already be in the cache
    pub deploy_core: bool,

    /// Ignore existing artifacts when seeding the cache
    pub fresh: bool,

    /// Abort the upgrade run on the first failed direct upgrade
    pub fail_fast: bool,

    pub fee: FeeConfig,

    /// Meta-transaction forwarder override
    pub forwarder: Option<Address>,

    pub paths: StatePaths,

    /// Version tag written into artifacts
    pub version: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: "local".to_string(),
            no_proxy: false,
            strict: false,
            testnet: false,
            with_token: false,
            deploy_core: true,
            fresh: false,
            fail_fast: false,
            fee: FeeConfig::default(),
            forwarder: None,
            paths: StatePaths::default(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl DeployConfig {
    /// Read configuration from the process environment
    ///
    /// # Errors
    /// Returns error if a variable is present but malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// Returns error if a variable is present but malformed
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| -> Result<bool, ConfigError> {
            lookup(key).map_or(Ok(default), |raw| parse_flag(key, &raw))
        };

        let fee_rate = match lookup(env::FEE_RATE) {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<i64>().map_err(|_| ConfigError::InvalidNumber {
                key: env::FEE_RATE.to_string(),
                value: raw.clone(),
            })?,
            _ => 0,
        };
        let fee_receiver = parse_optional_address(env::FEE_RECEIVER, lookup(env::FEE_RECEIVER))?.unwrap_or(Address::ZERO);
        let forwarder = parse_optional_address(env::FORWARDER, lookup(env::FORWARDER))?;
        let paths = lookup(env::STATE_DIR).map_or(defaults.paths.clone(), StatePaths::under);

        Ok(Self {
            network: lookup(env::NETWORK).unwrap_or(defaults.network),
            no_proxy: flag(env::NO_PROXY, defaults.no_proxy)?
                || lookup(env::LEGACY_NO_PROXY).is_some_and(|raw| raw.trim().eq_ignore_ascii_case("true")),
            strict: flag(env::STRICT, defaults.strict)?,
            testnet: flag(env::TESTNET, defaults.testnet)?,
            with_token: flag(env::WITH_TOKEN, defaults.with_token)?,
            deploy_core: flag(env::DEPLOY_CORE, defaults.deploy_core)?,
            fresh: flag(env::FRESH, defaults.fresh)?,
            fail_fast: flag(env::FAIL_FAST, defaults.fail_fast)?,
            fee: FeeConfig {
                rate: fee_rate,
                receiver: fee_receiver,
            },
            forwarder,
            paths,
            version: defaults.version,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_paths(mut self, paths: StatePaths) -> Self {
        self.paths = paths;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_no_proxy(mut self, no_proxy: bool) -> Self {
        self.no_proxy = no_proxy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_deploy_core(mut self, deploy_core: bool) -> Self {
        self.deploy_core = deploy_core;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fee(mut self, rate: i64, receiver: Address) -> Self {
        self.fee = FeeConfig { rate, receiver };
        self
    }

    #[inline]
    #[must_use]
    pub fn with_forwarder(mut self, forwarder: Option<Address>) -> Self {
        self.forwarder = forwarder;
        self
    }

    /// Whether the token unit belongs in this run's plan
    #[inline]
    #[must_use]
    pub fn includes_token(&self) -> bool {
        self.testnet || self.with_token
    }

    /// Forwarder to configure on `chain_id`: the override, else the built-in default
    #[must_use]
    pub fn forwarder_for_chain(&self, chain_id: u64) -> Option<Address> {
        self.forwarder.or_else(|| default_forwarder(chain_id))
    }

    /// Check every setting that can be checked without the ledger
    ///
    /// # Errors
    /// Returns the first invalid setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.trim().is_empty() {
            return Err(ConfigError::MissingValue(env::NETWORK.to_string()));
        }
        if self.network.contains(['/', '\\', '.']) {
            return Err(ConfigError::InvalidNetwork(self.network.clone()));
        }
        self.fee.validate()
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_optional_address(key: &str, raw: Option<String>) -> Result<Option<Address>, ConfigError> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidAddress {
                key: key.to_string(),
                value: raw,
            }),
        _ => Ok(None),
    }
}

fn default_confirmation_timeout() -> u64 {
    300
}

/// Connection details and roles for one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Directory with compiler output
    #[serde(default)]
    pub build_dir: Option<PathBuf>,

    pub roles: Roles,
}

/// Contents of the settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSettings>,
}

impl Settings {
    /// Parse settings from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid settings TOML
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Settings(e.to_string()))
    }

    /// Load settings from a file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Settings(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Settings of one network
    ///
    /// # Errors
    /// Returns error if the network is not configured
    pub fn network(&self, name: &str) -> Result<&NetworkSettings, ConfigError> {
        self.networks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Fee rate outside `0..=1_000_000`
    #[error("fee rate {0} is outside 0..=1000000")]
    FeeOutOfRange(i64),

    /// Positive fee without a receiver
    #[error("fee rate {0} requires a non-zero fee receiver")]
    MissingFeeReceiver(i64),

    /// Boolean variable with an unrecognised value
    #[error("{key} must be a boolean, got {value:?}")]
    InvalidFlag { key: String, value: String },

    /// Numeric variable that does not parse
    #[error("{key} must be an integer, got {value:?}")]
    InvalidNumber { key: String, value: String },

    /// Address variable that does not parse
    #[error("{key} must be an address, got {value:?}")]
    InvalidAddress { key: String, value: String },

    /// Network name unusable as a file suffix
    #[error("invalid network name {0:?}")]
    InvalidNetwork(String),

    /// Required value missing
    #[error("missing value: {0}")]
    MissingValue(String),

    /// Network absent from the settings file
    #[error("network {0} is not configured")]
    UnknownNetwork(String),

    /// Settings file unreadable or malformed
    #[error("settings: {0}")]
    Settings(String),

    /// Role assignment unusable
    #[error("roles: {0}")]
    Roles(String),

    /// Stage list numbered out of order or out of range
    #[error("stages: {0}")]
    Stages(String),
}
