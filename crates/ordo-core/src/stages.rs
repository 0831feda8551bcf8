//! Staged post-deployment configuration
//!
//! A fixed list of numbered actions applied after planning. The `stage`
//! cursor in the address cache records the last applied action, so a
//! resumed run starts with the first action above it.
//!
//! Each action has a precondition (units that must be in the address book)
//! and a list of [`Step`]s. A step whose target or argument units are not
//! deployed is a no-op. A failed step aborts the rest of its action, which
//! then does not advance the cursor; the machine moves on to the next action
//! unless strict mode is set.

use ordo_artifact::{Address, B256};
use ordo_ledger::{codec, LedgerError, Value};

use crate::config::ConfigError;
use crate::context::{DeploymentContext, RoleKind};
use crate::error::{OrchestratorError, Result, TransactionFailure};
use crate::plan::{ArgRef, SettingRef};
use crate::planner::{AddressBook, PROXY_ADMIN};

/// Highest stage number
pub const MAX_STAGE: u32 = 25;

const CONFIG_UNIT: &str = "NeverminedConfig";
const TEMPLATE_MANAGER: &str = "TemplateStoreManager";

/// One administrative operation within a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Call signed by the target's current owner when that is not the deployer
    Call {
        unit: String,
        function: String,
        args: Vec<ArgRef>,
    },
    /// Call signed by the deployer, no owner lookup
    DirectCall {
        unit: String,
        function: String,
        args: Vec<ArgRef>,
    },
    /// Hand ownership from the deployer to the owner wallet
    TransferOwnership { unit: String },
    /// Propose and approve a template on the template manager
    ApproveTemplate { template: String },
    /// Point the configuration unit at the meta-transaction forwarder
    SetForwarder,
    /// Log only
    Note(String),
}

impl Step {
    #[must_use]
    pub fn call(unit: &str, function: &str, args: Vec<ArgRef>) -> Self {
        Self::Call {
            unit: unit.to_string(),
            function: function.to_string(),
            args,
        }
    }

    #[must_use]
    pub fn direct(unit: &str, function: &str, args: Vec<ArgRef>) -> Self {
        Self::DirectCall {
            unit: unit.to_string(),
            function: function.to_string(),
            args,
        }
    }

    #[must_use]
    pub fn transfer_ownership(unit: &str) -> Self {
        Self::TransferOwnership { unit: unit.to_string() }
    }

    #[must_use]
    pub fn approve_template(template: &str) -> Self {
        Self::ApproveTemplate {
            template: template.to_string(),
        }
    }

    #[must_use]
    pub fn note(text: &str) -> Self {
        Self::Note(text.to_string())
    }

    /// Unit the step calls into
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Call { unit, .. } | Self::DirectCall { unit, .. } | Self::TransferOwnership { unit } => {
                Some(unit)
            }
            Self::ApproveTemplate { .. } => Some(TEMPLATE_MANAGER),
            Self::SetForwarder => Some(CONFIG_UNIT),
            Self::Note(_) => None,
        }
    }
}

/// What a successful step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// Nothing to do, with the reason
    NoOp(String),
}

impl StepOutcome {
    #[inline]
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A numbered configuration action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAction {
    pub stage: u32,
    pub name: String,
    /// Units that must be deployed for the action to run
    pub requires: Vec<String>,
    pub steps: Vec<Step>,
}

impl StageAction {
    #[must_use]
    pub fn new(stage: u32, name: &str) -> Self {
        Self {
            stage,
            name: name.to_string(),
            requires: Vec::new(),
            steps: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn requires(mut self, units: &[&str]) -> Self {
        self.requires.extend(units.iter().map(ToString::to_string));
        self
    }

    #[inline]
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[inline]
    #[must_use]
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }
}

/// Check numbering: within `1..=MAX_STAGE` and strictly increasing
///
/// # Errors
/// Returns `ConfigError::Stages` for the first offending action
pub fn validate_stages(stages: &[StageAction]) -> Result<(), ConfigError> {
    let mut previous = 0;
    for action in stages {
        if action.stage == 0 || action.stage > MAX_STAGE {
            return Err(ConfigError::Stages(format!(
                "stage {} ({}) is outside 1..={MAX_STAGE}",
                action.stage, action.name
            )));
        }
        if action.stage <= previous {
            return Err(ConfigError::Stages(format!(
                "stage {} ({}) does not follow stage {previous}",
                action.stage, action.name
            )));
        }
        previous = action.stage;
    }
    Ok(())
}

/// Role identifier `bytes32("minter")`
#[must_use]
pub fn minter_role() -> B256 {
    B256::right_padding_from(b"minter")
}

/// The production stage list
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn standard_stages() -> Vec<StageAction> {
    let u = ArgRef::unit;
    let minter = || ArgRef::Literal(Value::Bytes32(minter_role()));
    let asm = "AgreementStoreManager";
    let csm = "ConditionStoreManager";
    let nft1155 = "NFT1155Upgradeable";
    let nft721 = "NFT721Upgradeable";
    let registry = "DIDRegistry";
    let proxy_role = |templates: &[&str]| -> Vec<Step> {
        templates
            .iter()
            .map(|t| Step::call(asm, "grantProxyRole", vec![u(t)]))
            .collect()
    };

    vec![
        StageAction::new(1, "approve templates")
            .requires(&[TEMPLATE_MANAGER])
            .steps(
                [
                    "AccessTemplate",
                    "AccessProofTemplate",
                    "EscrowComputeExecutionTemplate",
                    "NFTAccessTemplate",
                    "NFT721AccessTemplate",
                    "NFTSalesTemplate",
                    "NFTSalesWithAccessTemplate",
                    "NFTAccessProofTemplate",
                    "NFTAccessSwapTemplate",
                    "NFT721SalesWithAccessTemplate",
                    "NFT721AccessProofTemplate",
                    "NFT721AccessSwapTemplate",
                    "NFT721SalesTemplate",
                    "DIDSalesTemplate",
                    "AaveCreditTemplate",
                ]
                .map(Step::approve_template),
            )
            .step(Step::transfer_ownership(TEMPLATE_MANAGER)),
        StageAction::new(2, "condition store manager roles")
            .requires(&[csm])
            .step(Step::call(csm, "delegateCreateRole", vec![u(asm)]))
            .step(Step::call(csm, "setNvmConfigAddress", vec![u(CONFIG_UNIT)]))
            .step(Step::call(csm, "grantProxyRole", vec![u("EscrowPaymentCondition")]))
            .step(Step::transfer_ownership(csm)),
        StageAction::new(3, "NFT-1155 operators")
            .requires(&[nft1155, registry])
            .step(Step::note("no operators needed, the registry is set up at initialization")),
        StageAction::new(4, "lock payment proxy")
            .requires(&["LockPaymentCondition", asm])
            .step(Step::call("LockPaymentCondition", "grantProxyRole", vec![u(asm)])),
        StageAction::new(5, "agreement manager proxies").requires(&[asm]).steps(proxy_role(&[
            "NFTAccessTemplate",
            "NFTSalesTemplate",
            "NFT721AccessTemplate",
            "NFT721SalesTemplate",
            "AaveCreditTemplate",
            "AccessProofTemplate",
            "AccessTemplate",
            "DIDSalesTemplate",
            "EscrowComputeExecutionTemplate",
        ])),
        StageAction::new(6, "lock payment reinitialize")
            .requires(&["LockPaymentCondition"])
            .step(Step::call("LockPaymentCondition", "reinitialize", vec![]))
            .step(Step::transfer_ownership("LockPaymentCondition")),
        StageAction::new(7, "agreement manager ownership")
            .requires(&[asm])
            .step(Step::transfer_ownership(asm)),
        StageAction::new(8, "NFT-721 operators")
            .requires(&[nft721, registry])
            .step(Step::note("no operators needed, the registry is set up at initialization")),
        StageAction::new(9, "registry operator for DID transfers")
            .requires(&["TransferDIDOwnershipCondition", registry])
            .step(Step::call(
                registry,
                "grantRegistryOperatorRole",
                vec![u("TransferDIDOwnershipCondition")],
            )),
        StageAction::new(10, "NFT-1155 transfer operator")
            .requires(&["TransferNFTCondition", nft1155])
            .step(Step::call(nft1155, "grantOperatorRole", vec![u("TransferNFTCondition")])),
        StageAction::new(11, "registry check")
            .requires(&["TransferNFTCondition", registry])
            .step(Step::note("registry already wired")),
        StageAction::new(12, "NFT-721 transfer operator")
            .requires(&["TransferNFT721Condition", nft721])
            .step(Step::call(nft721, "grantOperatorRole", vec![u("TransferNFT721Condition")])),
        StageAction::new(13, "registry ownership")
            .requires(&[registry])
            .step(Step::transfer_ownership(registry)),
        StageAction::new(14, "token minters")
            .requires(&["NeverminedToken"])
            .step(Step::direct("NeverminedToken", "grantRole", vec![minter(), u("Dispenser")]))
            .step(Step::direct(
                "NeverminedToken",
                "revokeRole",
                vec![minter(), ArgRef::Role(RoleKind::Deployer)],
            ))
            .step(Step::direct(
                "NeverminedToken",
                "grantRole",
                vec![minter(), ArgRef::Role(RoleKind::Owner)],
            )),
        StageAction::new(15, "marketplace fees and governor")
            .requires(&[CONFIG_UNIT])
            .step(Step::call(
                CONFIG_UNIT,
                "setMarketplaceFees",
                vec![ArgRef::Setting(SettingRef::FeeRate), ArgRef::Setting(SettingRef::FeeReceiver)],
            ))
            .step(Step::call(CONFIG_UNIT, "setGovernor", vec![ArgRef::Role(RoleKind::Governor)]))
            .step(Step::transfer_ownership(CONFIG_UNIT)),
        StageAction::new(16, "NFT-1155 transfer proxy")
            .requires(&["TransferNFTCondition", asm])
            .step(Step::call("TransferNFTCondition", "grantProxyRole", vec![u(asm)]))
            .step(Step::transfer_ownership("TransferNFTCondition")),
        StageAction::new(17, "NFT-721 transfer proxy")
            .requires(&["TransferNFT721Condition", asm])
            .step(Step::call("TransferNFT721Condition", "grantProxyRole", vec![u(asm)]))
            .step(Step::transfer_ownership("TransferNFT721Condition")),
        StageAction::new(18, "access condition reinitialize")
            .requires(&["AccessCondition"])
            .step(Step::call("AccessCondition", "reinitialize", vec![])),
        StageAction::new(19, "royalties")
            .requires(&[registry, "StandardRoyalties"])
            .step(Step::call(registry, "registerRoyaltiesChecker", vec![u("StandardRoyalties")]))
            .step(Step::call(registry, "setDefaultRoyalties", vec![u("StandardRoyalties")])),
        StageAction::new(20, "NFT-1155 lock operator")
            .requires(&["NFTLockCondition", nft1155])
            .step(Step::call(nft1155, "grantOperatorRole", vec![u("NFTLockCondition")])),
        StageAction::new(21, "NFT-721 lock operator")
            .requires(&["NFTLockCondition", nft721])
            .step(Step::call(nft721, "grantOperatorRole", vec![u("NFTLockCondition")])),
        StageAction::new(22, "NFT-721 collateral lock operator")
            .requires(&[nft721, "NFT721LockCondition"])
            .step(Step::call(nft721, "grantOperatorRole", vec![u("NFT721LockCondition")])),
        StageAction::new(23, "forwarder and config pointers")
            .step(Step::SetForwarder)
            .step(Step::call(nft1155, "setNvmConfigAddress", vec![u(CONFIG_UNIT)]))
            .step(Step::call(nft721, "setNvmConfigAddress", vec![u(CONFIG_UNIT)]))
            .step(Step::call("NeverminedToken", "setNvmConfigAddress", vec![u(CONFIG_UNIT)])),
        StageAction::new(24, "registry NFT-1155")
            .requires(&[nft1155])
            .step(Step::call(registry, "setNFT1155", vec![u(nft1155)])),
        StageAction::new(25, "late agreement manager proxies").requires(&[asm]).steps(proxy_role(&[
            "NFTAccessProofTemplate",
            "NFTSalesWithAccessTemplate",
            "NFT721AccessProofTemplate",
            "NFT721SalesWithAccessTemplate",
        ])),
    ]
}

/// Summary of a stage machine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub applied: Vec<u32>,
    /// At or below the cursor when the run started
    pub already_done: Vec<u32>,
    /// Precondition not met in this run
    pub skipped: Vec<u32>,
    pub failed: Vec<u32>,
}

/// Applies stage actions against the units of one run
#[derive(Debug)]
pub struct StageMachine<'a> {
    ctx: &'a DeploymentContext,
    book: &'a AddressBook,
}

impl<'a> StageMachine<'a> {
    #[must_use]
    pub fn new(ctx: &'a DeploymentContext, book: &'a AddressBook) -> Self {
        Self { ctx, book }
    }

    /// Apply every action above the cursor
    ///
    /// # Errors
    /// Returns error on invalid numbering, on cache write failure, or on the
    /// first failed action in strict mode
    pub async fn run(&self, stages: &[StageAction]) -> Result<StageReport> {
        validate_stages(stages)?;
        let mut report = StageReport::default();

        for action in stages {
            let cursor = self.ctx.addresses.stage();
            if cursor >= action.stage {
                tracing::debug!("Stage {} ({}) already applied", action.stage, action.name);
                report.already_done.push(action.stage);
                continue;
            }
            if let Some(missing) = action.requires.iter().find(|u| !self.book.contains(u)) {
                tracing::debug!("Skipping stage {} ({}): {} not deployed", action.stage, action.name, missing);
                report.skipped.push(action.stage);
                continue;
            }

            tracing::info!("Stage {}: {}", action.stage, action.name);
            match self.run_action(action).await {
                Ok(()) => {
                    self.ctx.addresses.complete_stage(action.stage)?;
                    report.applied.push(action.stage);
                }
                Err(failure) => {
                    tracing::warn!("Stage {} ({}) failed: {}", action.stage, action.name, failure);
                    if self.ctx.config.strict {
                        return Err(failure.into());
                    }
                    report.failed.push(action.stage);
                }
            }
        }

        tracing::info!(
            "Stages: {} applied, {} already done, {} skipped, {} failed",
            report.applied.len(),
            report.already_done.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn run_action(&self, action: &StageAction) -> Result<(), TransactionFailure> {
        for step in &action.steps {
            if let StepOutcome::NoOp(reason) = self.run_step(step).await? {
                tracing::debug!("Stage {} step skipped: {}", action.stage, reason);
            }
        }
        Ok(())
    }

    /// Execute one step
    ///
    /// # Errors
    /// Returns the failed transaction with its target and arguments
    pub async fn run_step(&self, step: &Step) -> Result<StepOutcome, TransactionFailure> {
        match step {
            Step::Call { unit, function, args } => self.call_contract(unit, function, args, true).await,
            Step::DirectCall { unit, function, args } => self.call_contract(unit, function, args, false).await,
            Step::TransferOwnership { unit } => match self.book.address(unit) {
                Some(address) => self.transfer_ownership(unit, address, self.ctx.roles.owner).await,
                None => Ok(StepOutcome::NoOp(format!("{unit} not deployed"))),
            },
            Step::ApproveTemplate { template } => self.approve_template(template).await,
            Step::SetForwarder => self.set_forwarder().await,
            Step::Note(text) => {
                tracing::info!("{}", text);
                Ok(StepOutcome::NoOp(text.clone()))
            }
        }
    }

    /// Hand the proxy admin to the upgrader wallet
    ///
    /// Idempotent; failures are logged and reported as a no-op.
    pub async fn handover_proxy_admin(&self) -> StepOutcome {
        let Some(admin) = self.ctx.addresses.get(PROXY_ADMIN) else {
            return StepOutcome::NoOp("no proxy admin deployed".to_string());
        };
        match self.transfer_ownership(PROXY_ADMIN, admin, self.ctx.roles.upgrader).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                tracing::warn!("Proxy admin handover failed: {}", failure);
                StepOutcome::NoOp(failure.to_string())
            }
        }
    }

    async fn call_contract(
        &self,
        unit: &str,
        function: &str,
        args: &[ArgRef],
        as_owner: bool,
    ) -> Result<StepOutcome, TransactionFailure> {
        let Some(address) = self.book.address(unit) else {
            return Ok(StepOutcome::NoOp(format!("{unit} not deployed")));
        };
        let values = match self.resolve_args(unit, args) {
            Ok(values) => values,
            Err(missing) => return Ok(StepOutcome::NoOp(format!("{missing} not deployed"))),
        };
        let signature = self.signature(unit, address, function, &values)?;
        let from = if as_owner {
            self.signer_for(address).await
        } else {
            self.ctx.roles.deployer
        };
        self.submit(unit, address, &signature, &values, from).await?;
        Ok(StepOutcome::Applied)
    }

    async fn transfer_ownership(
        &self,
        unit: &str,
        address: Address,
        new_owner: Address,
    ) -> Result<StepOutcome, TransactionFailure> {
        let deployer = self.ctx.roles.deployer;
        let current = match self.ctx.ledger.current_owner_of(address).await {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!("Cannot read owner of {}: {}", unit, e);
                Address::ZERO
            }
        };

        if current == new_owner {
            return Ok(StepOutcome::NoOp(format!("{new_owner} already owns {unit}")));
        }
        if current != deployer {
            tracing::warn!(
                "Ownership of {} was not transferred: owner is {}, not the deployer {}",
                unit,
                current,
                deployer
            );
            return Ok(StepOutcome::NoOp(format!("deployer no longer owns {unit}")));
        }

        tracing::info!("Transferring ownership of {} from {} to {}", unit, deployer, new_owner);
        let args = [Value::Address(new_owner)];
        let signature = self.signature(unit, address, "transferOwnership", &args)?;
        self.submit(unit, address, &signature, &args, deployer).await?;
        Ok(StepOutcome::Applied)
    }

    async fn approve_template(&self, template: &str) -> Result<StepOutcome, TransactionFailure> {
        let (Some(manager), Some(address)) = (self.book.address(TEMPLATE_MANAGER), self.book.address(template)) else {
            return Ok(StepOutcome::NoOp(format!("{template} not deployed")));
        };

        let args = [Value::Address(address)];
        let approved = self
            .ctx
            .ledger
            .query(manager, "isTemplateApproved(address)", &args)
            .await
            .and_then(|raw| codec::decode_bool(&raw));
        match approved {
            Ok(true) => {
                tracing::info!("Already approved {} at {}", template, address);
                return Ok(StepOutcome::NoOp(format!("{template} already approved")));
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("Approval state of {} unknown: {}", template, e),
        }

        tracing::info!("Proposing template {}: {}", template, address);
        let propose = self.signature(TEMPLATE_MANAGER, manager, "proposeTemplate", &args)?;
        if let Err(failure) = self
            .submit(TEMPLATE_MANAGER, manager, &propose, &args, self.ctx.roles.deployer)
            .await
        {
            tracing::warn!("Template {} already proposed: {}", template, failure);
        }

        tracing::info!("Approving template {}: {}", template, address);
        self.call_contract(TEMPLATE_MANAGER, "approveTemplate", &[ArgRef::unit(template)], true)
            .await
    }

    async fn set_forwarder(&self) -> Result<StepOutcome, TransactionFailure> {
        let Some(address) = self.book.address(CONFIG_UNIT) else {
            return Ok(StepOutcome::NoOp(format!("{CONFIG_UNIT} not deployed")));
        };
        let chain_id = self
            .ctx
            .ledger
            .chain_id()
            .await
            .map_err(|e| TransactionFailure::new(CONFIG_UNIT, address, "setTrustedForwarder", &[], e))?;

        let Some(forwarder) = self.ctx.config.forwarder_for_chain(chain_id) else {
            tracing::warn!("No forwarder known for chain {}, meta transactions will not work", chain_id);
            return Ok(StepOutcome::NoOp(format!("no forwarder for chain {chain_id}")));
        };
        tracing::info!("Setting forwarder {} for chain {}", forwarder, chain_id);
        self.call_contract(
            CONFIG_UNIT,
            "setTrustedForwarder",
            &[ArgRef::Literal(Value::Address(forwarder))],
            true,
        )
        .await
    }

    /// Resolve step arguments; the error is the first unit without an address
    fn resolve_args(&self, unit: &str, args: &[ArgRef]) -> Result<Vec<Value>, String> {
        args.iter()
            .map(|arg| {
                arg.resolve(unit, |n| self.book.address(n), &self.ctx.roles, &self.ctx.config)
                    .map_err(|e| match e {
                        OrchestratorError::UnresolvedDependency { dependency, .. } => dependency,
                        other => other.to_string(),
                    })
            })
            .collect()
    }

    /// Signature declared by the unit's interface
    fn signature(
        &self,
        unit: &str,
        address: Address,
        function: &str,
        args: &[Value],
    ) -> Result<String, TransactionFailure> {
        self.ctx
            .handle(unit, address)
            .and_then(|handle| handle.signature(function, args))
            .map_err(|e| {
                TransactionFailure::new(
                    unit,
                    address,
                    function,
                    args,
                    LedgerError::Rejected {
                        to: address,
                        function: function.to_string(),
                        reason: e.to_string(),
                    },
                )
            })
    }

    /// Current owner when it is not the deployer, else the deployer
    async fn signer_for(&self, address: Address) -> Address {
        let deployer = self.ctx.roles.deployer;
        match self.ctx.ledger.current_owner_of(address).await {
            Ok(owner) if !owner.is_zero() && owner != deployer => {
                tracing::debug!("Signing as owner {} for {}", owner, address);
                owner
            }
            Ok(_) => deployer,
            Err(e) => {
                tracing::debug!("Owner of {} unavailable ({}), signing as deployer", address, e);
                deployer
            }
        }
    }

    async fn submit(
        &self,
        unit: &str,
        address: Address,
        signature: &str,
        args: &[Value],
        from: Address,
    ) -> Result<(), TransactionFailure> {
        let failure = |source| TransactionFailure::new(unit, address, signature, args, source);
        let tx = self
            .ctx
            .ledger
            .call(address, signature, args, from)
            .await
            .map_err(failure)?;
        self.ctx.ledger.await_confirmation(tx).await.map_err(failure)?;
        Ok(())
    }
}
