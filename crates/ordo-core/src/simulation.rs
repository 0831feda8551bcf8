//! Dry runs against the in-memory ledger
//!
//! [`synthetic_registry`] derives a component for every unit from the plan
//! and the stage list: an initializer matching the unit's arguments, the
//! ownership functions, and every function a stage or maintenance step calls
//! on it. The bytecode depends on `revision`, so a second registry with a new
//! revision looks like changed code to the upgrade coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;

use ordo_artifact::{keccak256, AbiEntry, Address};
use ordo_ledger::{Component, InMemoryRegistry, LinkOffset, SimulatedCustody, SimulatedLedger};

use crate::config::DeployConfig;
use crate::context::{DeploymentContext, Roles};
use crate::error::Result;
use crate::maintenance::deprecation_steps;
use crate::orchestrator::{DeployReport, Orchestrator};
use crate::plan::{ArgRef, DeploymentPlan};
use crate::planner::{PROXY, PROXY_ADMIN};
use crate::stages::{StageAction, Step};
use crate::upgrade::UpgradeReport;

/// Functions keyed by `(name, arity)` per component
type Interfaces = BTreeMap<String, BTreeMap<(String, usize), AbiEntry>>;

fn declare(interfaces: &mut Interfaces, unit: &str, entry: AbiEntry) {
    let key = (entry.name.clone().unwrap_or_default(), entry.inputs.len());
    interfaces.entry(unit.to_string()).or_default().entry(key).or_insert(entry);
}

fn function(name: &str, args: &[ArgRef]) -> AbiEntry {
    let types: Vec<String> = args.iter().map(ArgRef::abi_type).collect();
    let types: Vec<&str> = types.iter().map(String::as_str).collect();
    AbiEntry::function(name, &types)
}

fn ownable() -> [AbiEntry; 2] {
    [
        AbiEntry::function("owner", &[]).returns(&["address"]),
        AbiEntry::function("transferOwnership", &["address"]),
    ]
}

fn declare_step(interfaces: &mut Interfaces, step: &Step) {
    let Some(target) = step.target() else {
        return;
    };
    match step {
        Step::Call { function: f, args, .. } | Step::DirectCall { function: f, args, .. } => {
            declare(interfaces, target, function(f, args));
        }
        Step::ApproveTemplate { .. } => {
            declare(interfaces, target, AbiEntry::function("proposeTemplate", &["address"]));
            declare(interfaces, target, AbiEntry::function("approveTemplate", &["address"]));
            declare(
                interfaces,
                target,
                AbiEntry::function("isTemplateApproved", &["address"]).returns(&["bool"]),
            );
        }
        Step::SetForwarder => {
            declare(interfaces, target, AbiEntry::function("setTrustedForwarder", &["address"]));
        }
        Step::TransferOwnership { .. } | Step::Note(_) => {}
    }
}

fn bytecode(name: &str, revision: u32, libraries: usize) -> String {
    let seed = keccak256(format!("{name}:{revision}"));
    let placeholders = "00".repeat(std::mem::size_of::<Address>() * libraries);
    format!("0x{}{placeholders}", hex::encode(seed))
}

/// Registry with a component for every unit of `plan`
#[must_use]
pub fn synthetic_registry(plan: &DeploymentPlan, stages: &[StageAction], revision: u32) -> InMemoryRegistry {
    let mut interfaces = Interfaces::new();

    for unit in plan.units() {
        interfaces.entry(unit.name.clone()).or_default();
        if unit.is_library() {
            continue;
        }
        for entry in ownable() {
            declare(&mut interfaces, &unit.name, entry);
        }
        if !unit.args.is_empty() {
            declare(&mut interfaces, &unit.name, function("initialize", &unit.args));
        }
    }
    for step in stages.iter().flat_map(|s| &s.steps).chain(&deprecation_steps()) {
        declare_step(&mut interfaces, step);
    }
    declare(
        &mut interfaces,
        "AccessProofCondition",
        AbiEntry::function("changeDisputeManager", &["address"]),
    );
    declare(
        &mut interfaces,
        "AaveCreditTemplate",
        AbiEntry::function("changeCreditVaultLibrary", &["address"]),
    );

    let registry = InMemoryRegistry::new();
    for (name, functions) in interfaces {
        let libraries = plan.get(&name).map(|u| u.libraries.clone()).unwrap_or_default();
        let mut component = Component::new(
            &name,
            functions.into_values().collect(),
            bytecode(&name, revision, libraries.len()),
        );
        for (i, library) in libraries.into_iter().enumerate() {
            component.link_references.insert(
                library,
                vec![LinkOffset {
                    start: 32 + i * std::mem::size_of::<Address>(),
                    length: std::mem::size_of::<Address>(),
                }],
            );
        }
        registry.insert(component);
    }

    let mut admin_abi = ownable().to_vec();
    admin_abi.push(AbiEntry::function("upgrade", &["address", "address"]));
    registry.insert(Component::new(PROXY_ADMIN, admin_abi, bytecode(PROXY_ADMIN, 0, 0)));
    registry.insert(Component::new(PROXY, Vec::new(), bytecode(PROXY, 0, 0)));
    registry
}

/// Roles used by dry runs: distinct identities and a two-member upgrader multisig
#[must_use]
pub fn simulation_roles() -> Roles {
    let id = |b: u8| {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Address::new(bytes)
    };
    Roles {
        deployer: id(0x01),
        owner: id(0x02),
        governor: id(0x03),
        upgrader: id(0x5a),
        approvers: vec![id(0xa1), id(0xa2)],
    }
}

/// Outcome of a full dry run
#[derive(Debug)]
pub struct SimulationReport {
    pub deploy: DeployReport,
    pub upgrade: UpgradeReport,
    pub deployments: usize,
    pub calls: usize,
    pub failed_calls: usize,
}

/// Deploy the standard plan, then upgrade it to a new code revision
///
/// State files are written under `config.paths`.
///
/// # Errors
/// Returns the first fatal error of either pipeline
pub async fn simulate(config: DeployConfig, roles: Roles) -> Result<SimulationReport> {
    let ledger = Arc::new(SimulatedLedger::default());
    let custody = Arc::new(SimulatedCustody::new(Arc::clone(&ledger)));
    let plan = DeploymentPlan::standard();
    let stages = crate::stages::standard_stages();

    let ctx = DeploymentContext::new(
        config.clone(),
        roles.clone(),
        ledger.clone(),
        Arc::new(synthetic_registry(&plan, &stages, 1)),
        custody.clone(),
    )?;
    let deploy = Orchestrator::new(ctx).deploy(&plan, &stages).await?;

    let ctx = DeploymentContext::new(
        config,
        roles,
        ledger.clone(),
        Arc::new(synthetic_registry(&plan, &stages, 2)),
        custody,
    )?;
    let upgrade = Orchestrator::new(ctx).upgrade(&plan).await?;

    let calls = ledger.calls();
    Ok(SimulationReport {
        deploy,
        upgrade,
        deployments: ledger.deployment_count(),
        calls: calls.len(),
        failed_calls: calls.iter().filter(|c| !c.success).count(),
    })
}
