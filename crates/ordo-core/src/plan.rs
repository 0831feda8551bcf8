//! The fixed deployment plan
//!
//! Units are listed in dependency order by hand. [`DeploymentPlan::validate`]
//! rejects any reference to a unit that is not listed earlier, so ordering
//! mistakes surface at load time instead of mid-deployment.

use std::collections::HashSet;

use ordo_artifact::Address;
use ordo_ledger::Value;

use crate::config::DeployConfig;
use crate::context::{RoleKind, Roles};
use crate::error::{OrchestratorError, Result};

/// How a unit is instantiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Initializer-based contract; proxied when core
    Contract,
    /// Stateless code deployed once and linked or referenced by address
    Library,
}

/// When a unit belongs to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    Always,
    /// Testnet profile or explicit token flag
    WithToken,
    TestnetOnly,
}

impl Inclusion {
    #[must_use]
    pub fn applies(self, config: &DeployConfig) -> bool {
        match self {
            Self::Always => true,
            Self::WithToken => config.includes_token(),
            Self::TestnetOnly => config.testnet,
        }
    }
}

/// Run settings usable as arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingRef {
    FeeRate,
    FeeReceiver,
}

/// An argument resolved at call time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgRef {
    Literal(Value),
    /// Address of an earlier unit
    Unit(String),
    Role(RoleKind),
    Setting(SettingRef),
}

impl ArgRef {
    #[must_use]
    pub fn unit(name: &str) -> Self {
        Self::Unit(name.to_string())
    }

    #[must_use]
    pub fn text(s: &str) -> Self {
        Self::Literal(Value::String(s.to_string()))
    }

    #[must_use]
    pub const fn zero_address() -> Self {
        Self::Literal(Value::Address(Address::ZERO))
    }

    #[must_use]
    pub fn uint(v: u128) -> Self {
        Self::Literal(Value::from(v))
    }

    /// The unit this argument depends on, if any
    #[must_use]
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Unit(name) => Some(name),
            _ => None,
        }
    }

    /// Resolve against known addresses, roles and settings
    ///
    /// # Errors
    /// Returns `UnresolvedDependency` if a referenced unit has no address
    pub fn resolve<F>(&self, owner: &str, lookup: F, roles: &Roles, config: &DeployConfig) -> Result<Value>
    where
        F: Fn(&str) -> Option<Address>,
    {
        Ok(match self {
            Self::Literal(v) => v.clone(),
            Self::Unit(name) => Value::Address(lookup(name).ok_or_else(|| OrchestratorError::UnresolvedDependency {
                unit: owner.to_string(),
                dependency: name.clone(),
            })?),
            Self::Role(role) => Value::Address(roles.address_of(*role)),
            Self::Setting(SettingRef::FeeRate) => Value::from(config.fee.rate_value()),
            Self::Setting(SettingRef::FeeReceiver) => Value::Address(config.fee.receiver),
        })
    }

    /// ABI type this argument resolves to
    #[must_use]
    pub fn abi_type(&self) -> String {
        match self {
            Self::Literal(v) => v.abi_type(),
            Self::Unit(_) | Self::Role(_) | Self::Setting(SettingRef::FeeReceiver) => "address".to_string(),
            Self::Setting(SettingRef::FeeRate) => "uint256".to_string(),
        }
    }
}

/// One unit of the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub is_core: bool,
    pub kind: UnitKind,
    pub args: Vec<ArgRef>,
    /// Link-time libraries
    pub libraries: Vec<String>,
    pub inclusion: Inclusion,
}

impl UnitSpec {
    /// Auxiliary contract, deployed directly and initialized
    #[must_use]
    pub fn contract(name: &str, args: Vec<ArgRef>) -> Self {
        Self {
            name: name.to_string(),
            is_core: false,
            kind: UnitKind::Contract,
            args,
            libraries: Vec::new(),
            inclusion: Inclusion::Always,
        }
    }

    /// Core contract, behind an upgradeable proxy unless proxies are disabled
    #[must_use]
    pub fn core(name: &str, args: Vec<ArgRef>) -> Self {
        Self {
            is_core: true,
            ..Self::contract(name, args)
        }
    }

    #[must_use]
    pub fn library(name: &str) -> Self {
        Self {
            kind: UnitKind::Library,
            ..Self::contract(name, Vec::new())
        }
    }

    #[inline]
    #[must_use]
    pub fn linked_with(mut self, library: &str) -> Self {
        self.libraries.push(library.to_string());
        self
    }

    #[inline]
    #[must_use]
    pub fn included(mut self, inclusion: Inclusion) -> Self {
        self.inclusion = inclusion;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.kind == UnitKind::Library
    }

    /// Whether this unit is deployed behind a proxy under `config`
    #[must_use]
    pub fn is_proxied(&self, config: &DeployConfig) -> bool {
        self.is_core && !self.is_library() && !config.no_proxy
    }

    /// Every unit this one depends on, libraries included
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .filter_map(ArgRef::dependency)
            .chain(self.libraries.iter().map(String::as_str))
    }
}

/// Ordered list of units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentPlan {
    units: Vec<UnitSpec>,
}

impl DeploymentPlan {
    #[must_use]
    pub fn new(units: Vec<UnitSpec>) -> Self {
        Self { units }
    }

    #[must_use]
    pub fn units(&self) -> &[UnitSpec] {
        &self.units
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UnitSpec> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Units that belong to a run under `config`
    pub fn included<'a>(&'a self, config: &'a DeployConfig) -> impl Iterator<Item = &'a UnitSpec> {
        self.units.iter().filter(move |u| u.inclusion.applies(config))
    }

    /// Core units of the plan, in order
    pub fn core_units(&self) -> impl Iterator<Item = &UnitSpec> {
        self.units.iter().filter(|u| u.is_core)
    }

    /// Check that every reference points to an earlier unit and names are unique
    ///
    /// # Errors
    /// Returns `UnresolvedDependency` for the first forward or dangling reference
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for unit in &self.units {
            for dep in unit.dependencies() {
                if !seen.contains(dep) {
                    return Err(OrchestratorError::UnresolvedDependency {
                        unit: unit.name.clone(),
                        dependency: dep.to_string(),
                    });
                }
            }
            if !seen.insert(unit.name.as_str()) {
                return Err(OrchestratorError::UnresolvedDependency {
                    unit: unit.name.clone(),
                    dependency: format!("duplicate definition of {}", unit.name),
                });
            }
        }
        Ok(())
    }

    /// The production plan
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn standard() -> Self {
        use ArgRef::Role;
        use RoleKind::{Deployer, Owner};

        let u = ArgRef::unit;
        let deployer = || Role(Deployer);
        let owner = || Role(Owner);
        let csm = || u("ConditionStoreManager");
        let asm = || u("AgreementStoreManager");
        let registry = || u("DIDRegistry");

        let mut units = vec![
            UnitSpec::library("DIDRegistryLibrary"),
            UnitSpec::library("EpochLibrary"),
            UnitSpec::core(
                "NeverminedConfig",
                vec![deployer(), deployer(), ArgRef::Literal(Value::Bool(false))],
            ),
            // NFT contracts are deployed later and wired in by stage 24
            UnitSpec::core(
                "DIDRegistry",
                vec![
                    deployer(),
                    ArgRef::zero_address(),
                    ArgRef::zero_address(),
                    u("NeverminedConfig"),
                    ArgRef::zero_address(),
                ],
            )
            .linked_with("DIDRegistryLibrary"),
            UnitSpec::core("StandardRoyalties", vec![registry()]),
            UnitSpec::core(
                "NFT1155Upgradeable",
                vec![
                    owner(),
                    registry(),
                    ArgRef::text("Nevermined NFT-1155"),
                    ArgRef::text("NVM"),
                    ArgRef::text(""),
                    u("NeverminedConfig"),
                ],
            ),
            UnitSpec::core(
                "NFT721Upgradeable",
                vec![
                    owner(),
                    registry(),
                    ArgRef::text("Nevermined NFT-721"),
                    ArgRef::text("NVM"),
                    ArgRef::text(""),
                    ArgRef::uint(0),
                    u("NeverminedConfig"),
                ],
            ),
            UnitSpec::core(
                "NFT721SubscriptionUpgradeable",
                vec![
                    owner(),
                    registry(),
                    ArgRef::text("Nevermined NFT-721"),
                    ArgRef::text("NVM"),
                    ArgRef::text(""),
                    ArgRef::uint(0),
                    u("NeverminedConfig"),
                ],
            ),
            UnitSpec::core(
                "NFT1155SubscriptionUpgradeable",
                vec![
                    owner(),
                    registry(),
                    ArgRef::text("Nevermined Smart Subscription"),
                    ArgRef::text("NVM"),
                    ArgRef::text(""),
                    u("NeverminedConfig"),
                ],
            ),
            UnitSpec::core("NeverminedToken", vec![owner(), deployer()]).included(Inclusion::WithToken),
            UnitSpec::contract("Dispenser", vec![u("NeverminedToken"), owner()]).included(Inclusion::TestnetOnly),
            UnitSpec::contract("ConditionStoreManager", vec![deployer(), deployer(), u("NeverminedConfig")])
                .linked_with("EpochLibrary"),
            UnitSpec::library("PlonkVerifier"),
            UnitSpec::library("AaveCreditVault"),
            UnitSpec::contract("TemplateStoreManager", vec![deployer()]),
        ];

        for condition in [
            "EscrowPaymentCondition",
            "SignCondition",
            "HashLockCondition",
            "ThresholdCondition",
            "WhitelistingCondition",
            "NFT721HolderCondition",
            "NFT721LockCondition",
            "NFT721EscrowPaymentCondition",
            "NFTEscrowPaymentCondition",
            "AaveBorrowCondition",
            "AaveCollateralDepositCondition",
            "AaveCollateralWithdrawCondition",
            "AaveRepayCondition",
        ] {
            units.push(UnitSpec::contract(condition, vec![owner(), csm()]));
        }

        units.extend([
            UnitSpec::contract(
                "AgreementStoreManager",
                vec![deployer(), csm(), u("TemplateStoreManager"), registry()],
            ),
            UnitSpec::contract("RewardsDistributor", vec![registry(), csm(), u("EscrowPaymentCondition")]),
            UnitSpec::contract("LockPaymentCondition", vec![deployer(), csm(), registry()]),
            UnitSpec::contract("TransferDIDOwnershipCondition", vec![owner(), csm(), registry()]),
            UnitSpec::contract("NFTAccessCondition", vec![owner(), csm(), registry()]),
            UnitSpec::contract(
                "AccessProofCondition",
                vec![owner(), csm(), registry(), u("PlonkVerifier")],
            ),
            UnitSpec::contract(
                "AccessDLEQCondition",
                vec![
                    owner(),
                    csm(),
                    registry(),
                    u("LockPaymentCondition"),
                    u("EscrowPaymentCondition"),
                ],
            ),
            UnitSpec::contract("NFTHolderCondition", vec![owner(), csm(), u("NFT1155Upgradeable")]),
            UnitSpec::contract("NFTLockCondition", vec![owner(), csm(), u("NFT1155Upgradeable")]),
            UnitSpec::contract(
                "TransferNFTCondition",
                vec![deployer(), csm(), registry(), u("NFT1155Upgradeable"), ArgRef::zero_address()],
            ),
            UnitSpec::contract("AccessCondition", vec![owner(), csm(), asm()]),
            UnitSpec::contract("ComputeExecutionCondition", vec![owner(), csm(), asm()]),
            UnitSpec::contract(
                "TransferNFT721Condition",
                vec![
                    deployer(),
                    csm(),
                    registry(),
                    u("NFT721Upgradeable"),
                    u("LockPaymentCondition"),
                ],
            ),
            UnitSpec::contract(
                "DistributeNFTCollateralCondition",
                vec![owner(), csm(), u("NFT721LockCondition")],
            ),
        ]);

        let template = |name: &str, conditions: &[&str]| {
            let mut args = vec![owner(), asm()];
            args.extend(conditions.iter().map(|c| u(c)));
            UnitSpec::contract(name, args)
        };

        units.extend([
            template("AccessTemplate", &["AccessCondition", "LockPaymentCondition", "EscrowPaymentCondition"]),
            template(
                "AccessProofTemplate",
                &["AccessProofCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template(
                "AccessDLEQTemplate",
                &["AccessDLEQCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template(
                "NFTAccessProofTemplate",
                &["AccessProofCondition", "NFTHolderCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template(
                "NFTAccessDLEQTemplate",
                &["AccessDLEQCondition", "NFTHolderCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template(
                "NFTAccessSwapTemplate",
                &["NFTLockCondition", "NFTEscrowPaymentCondition", "AccessProofCondition"],
            ),
            template(
                "NFTSalesWithAccessTemplate",
                &["LockPaymentCondition", "TransferNFTCondition", "EscrowPaymentCondition", "AccessProofCondition"],
            ),
            template(
                "NFTSalesWithDLEQTemplate",
                &["LockPaymentCondition", "TransferNFTCondition", "EscrowPaymentCondition", "AccessDLEQCondition"],
            ),
            template(
                "NFT721AccessProofTemplate",
                &["AccessProofCondition", "NFT721HolderCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template(
                "NFT721AccessDLEQTemplate",
                &["AccessDLEQCondition", "NFT721HolderCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template(
                "NFT721AccessSwapTemplate",
                &["NFT721LockCondition", "NFT721EscrowPaymentCondition", "AccessProofCondition"],
            ),
            template(
                "NFT721SalesWithAccessTemplate",
                &["LockPaymentCondition", "TransferNFT721Condition", "EscrowPaymentCondition", "AccessProofCondition"],
            ),
            template(
                "NFT721SalesWithDLEQTemplate",
                &["LockPaymentCondition", "TransferNFT721Condition", "EscrowPaymentCondition", "AccessDLEQCondition"],
            ),
            template(
                "EscrowComputeExecutionTemplate",
                &["ComputeExecutionCondition", "LockPaymentCondition", "EscrowPaymentCondition"],
            ),
            template("NFTAccessTemplate", &["NFTHolderCondition", "NFTAccessCondition"]),
            template("NFT721AccessTemplate", &["NFT721HolderCondition", "NFTAccessCondition"]),
            template(
                "NFTSalesTemplate",
                &["LockPaymentCondition", "TransferNFTCondition", "EscrowPaymentCondition"],
            ),
            template(
                "NFT721SalesTemplate",
                &["LockPaymentCondition", "TransferNFT721Condition", "EscrowPaymentCondition"],
            ),
            template(
                "DIDSalesTemplate",
                &["LockPaymentCondition", "TransferDIDOwnershipCondition", "EscrowPaymentCondition"],
            ),
            template(
                "AaveCreditTemplate",
                &[
                    "NFT721LockCondition",
                    "AaveCollateralDepositCondition",
                    "AaveBorrowCondition",
                    "AaveRepayCondition",
                    "AaveCollateralWithdrawCondition",
                    "DistributeNFTCollateralCondition",
                    "AaveCreditVault",
                ],
            ),
        ]);

        Self::new(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_plan_is_valid() {
        let plan = DeploymentPlan::standard();
        plan.validate().unwrap();
        assert!(plan.units().len() >= 50);
    }

    #[test]
    fn forward_reference_rejected() {
        let plan = DeploymentPlan::new(vec![
            UnitSpec::contract("A", vec![ArgRef::unit("B")]),
            UnitSpec::contract("B", vec![]),
        ]);
        assert!(matches!(
            plan.validate(),
            Err(OrchestratorError::UnresolvedDependency { unit, dependency }) if unit == "A" && dependency == "B"
        ));
    }

    #[test]
    fn missing_library_rejected() {
        let plan = DeploymentPlan::new(vec![UnitSpec::core("A", vec![]).linked_with("Lib")]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn duplicate_unit_rejected() {
        let plan = DeploymentPlan::new(vec![UnitSpec::contract("A", vec![]), UnitSpec::contract("A", vec![])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn proxying_rules() {
        let config = DeployConfig::default();
        assert!(UnitSpec::core("A", vec![]).is_proxied(&config));
        assert!(!UnitSpec::contract("B", vec![]).is_proxied(&config));
        assert!(!UnitSpec::library("L").is_proxied(&config));
        assert!(!UnitSpec::core("A", vec![]).is_proxied(&config.with_no_proxy(true)));
    }

    #[test]
    fn token_units_follow_profile() {
        let plan = DeploymentPlan::standard();
        let base = DeployConfig::default();
        let names = |c: &DeployConfig| plan.included(c).map(|u| u.name.clone()).collect::<Vec<_>>();
        assert!(!names(&base).contains(&"NeverminedToken".to_string()));
        let testnet = base.clone().with_testnet(true);
        assert!(names(&testnet).contains(&"NeverminedToken".to_string()));
        assert!(names(&testnet).contains(&"Dispenser".to_string()));
    }

    #[test]
    fn resolve_reports_missing_unit() {
        let roles = Roles::single(Address::new([1; 20]));
        let config = DeployConfig::default();
        let err = ArgRef::unit("X")
            .resolve("Y", |_| None, &roles, &config)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnresolvedDependency { .. }));
        let v = ArgRef::Role(RoleKind::Owner)
            .resolve("Y", |_| None, &roles, &config)
            .unwrap();
        assert_eq!(v, Value::Address(Address::new([1; 20])));
    }
}
