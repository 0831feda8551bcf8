//! In-memory ledger for local runs and tests
//!
//! Models only what the orchestrator relies on:
//!
//! - contract creation at deterministic addresses, transparent proxies
//!   (`(implementation, admin, init calldata)` constructor) and ownable
//!   admins (single `address` constructor argument becomes the owner)
//! - `initialize*` sets the owner to its first address argument, or the caller
//! - every other state-changing call requires the caller to be the owner,
//!   except `proposeTemplate` and role grants (`grantRole`, `revokeRole`),
//!   whose access control is not modelled
//! - `upgrade(proxy, implementation)` rewrites the proxy's implementation slot
//! - `owner()` and `isTemplateApproved(address)` views
//!
//! Fault injection: [`SimulatedLedger::fail_function`] makes a function
//! revert, [`SimulatedLedger::halt_after_deploys`] freezes the ledger after a
//! number of deployments and signals the caller.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ordo_artifact::{keccak256, Address, ADMIN_SLOT, B256, IMPLEMENTATION_SLOT};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::codec;
use crate::error::LedgerError;
use crate::ledger::{Ledger, MultisigCustody};
use crate::types::{Deployment, PendingTransaction, Receipt, TxHash, Value};

/// Chain id reported by default
pub const SIMULATED_CHAIN_ID: u64 = 31337;

/// A call as observed by the simulated ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub to: Address,
    pub function: String,
    pub args: Vec<Value>,
    pub from: Address,
    pub success: bool,
}

impl RecordedCall {
    /// Function name without the parameter list
    #[must_use]
    pub fn name(&self) -> &str {
        function_name(&self.function)
    }
}

#[derive(Debug, Default)]
struct SimContract {
    code_hash: B256,
    owner: Option<Address>,
    initialized: bool,
    storage: HashMap<B256, B256>,
    proposed: HashSet<Address>,
    approved: HashSet<Address>,
}

struct Halt {
    after: usize,
    signal: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct World {
    nonce: u64,
    block: u64,
    deployments: usize,
    contracts: HashMap<Address, SimContract>,
    receipts: HashMap<TxHash, Receipt>,
    calls: Vec<RecordedCall>,
    failing: HashSet<String>,
    halt: Option<Halt>,
}

impl World {
    fn next_hash(&mut self, from: Address) -> TxHash {
        self.nonce += 1;
        let mut seed = from.to_vec();
        seed.extend_from_slice(&self.nonce.to_be_bytes());
        keccak256(seed)
    }

    fn mine(&mut self, tx_hash: TxHash, success: bool, contract_address: Option<Address>) {
        self.block += 1;
        self.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                success,
                block_number: self.block,
                contract_address,
            },
        );
    }

    fn apply(&mut self, to: Address, function: &str, args: &[Value], from: Address) -> Result<(), String> {
        let name = function_name(function);
        if self.failing.contains(name) {
            return Err(format!("{name} configured to fail"));
        }

        if name == "upgrade" {
            return self.apply_upgrade(to, args, from);
        }

        let contract = self
            .contracts
            .get_mut(&to)
            .ok_or_else(|| format!("no contract at {to}"))?;

        match name {
            n if n.starts_with("initialize") => {
                if contract.initialized {
                    return Err("already initialized".to_string());
                }
                contract.initialized = true;
                contract.owner = Some(first_address(args).unwrap_or(from));
            }
            "proposeTemplate" => {
                let template = first_address(args).ok_or("missing template")?;
                if !contract.proposed.insert(template) {
                    return Err("template already proposed".to_string());
                }
            }
            "grantRole" | "revokeRole" => {}
            _ => {
                if let Some(owner) = contract.owner {
                    if owner != from {
                        return Err(format!("caller {from} is not the owner {owner}"));
                    }
                }
                match name {
                    "transferOwnership" => {
                        contract.owner = Some(first_address(args).ok_or("missing new owner")?);
                    }
                    "approveTemplate" => {
                        let template = first_address(args).ok_or("missing template")?;
                        if !contract.proposed.contains(&template) {
                            return Err("template not proposed".to_string());
                        }
                        contract.approved.insert(template);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn apply_upgrade(&mut self, admin: Address, args: &[Value], from: Address) -> Result<(), String> {
        let admin_owner = self
            .contracts
            .get(&admin)
            .ok_or_else(|| format!("no contract at {admin}"))?
            .owner;
        if admin_owner != Some(from) {
            return Err(format!("caller {from} does not own proxy admin {admin}"));
        }
        let (Some(proxy), Some(implementation)) = (
            args.first().and_then(Value::as_address),
            args.get(1).and_then(Value::as_address),
        ) else {
            return Err("upgrade expects (proxy, implementation)".to_string());
        };
        let proxy_state = self
            .contracts
            .get_mut(&proxy)
            .ok_or_else(|| format!("no proxy at {proxy}"))?;
        if proxy_state.storage.get(&ADMIN_SLOT) != Some(&admin.into_word()) {
            return Err(format!("{admin} is not the admin of {proxy}"));
        }
        proxy_state.storage.insert(IMPLEMENTATION_SLOT, implementation.into_word());
        Ok(())
    }
}

fn function_name(signature: &str) -> &str {
    signature.split('(').next().unwrap_or(signature)
}

fn first_address(args: &[Value]) -> Option<Address> {
    args.first().and_then(Value::as_address).filter(|a| !a.is_zero())
}

/// Deterministic in-memory ledger
pub struct SimulatedLedger {
    chain_id: u64,
    world: Mutex<World>,
}

impl std::fmt::Debug for SimulatedLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let world = self.world.lock();
        f.debug_struct("SimulatedLedger")
            .field("chain_id", &self.chain_id)
            .field("contracts", &world.contracts.len())
            .field("calls", &world.calls.len())
            .finish()
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new(SIMULATED_CHAIN_ID)
    }
}

impl SimulatedLedger {
    #[must_use]
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            world: Mutex::new(World::default()),
        }
    }

    /// Make every call to `function` (name without parameters) revert
    pub fn fail_function(&self, function: &str) {
        self.world.lock().failing.insert(function.to_string());
    }

    pub fn clear_failures(&self) {
        self.world.lock().failing.clear();
    }

    /// Let `count` deployments through, then signal and block further deployments
    #[must_use]
    pub fn halt_after_deploys(&self, count: usize) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.world.lock().halt = Some(Halt {
            after: count,
            signal: Some(tx),
        });
        rx
    }

    /// Lift a halt set by [`Self::halt_after_deploys`]
    pub fn release_halt(&self) {
        self.world.lock().halt = None;
    }

    /// Number of successful deployments so far
    #[must_use]
    pub fn deployment_count(&self) -> usize {
        self.world.lock().deployments
    }

    /// Every call observed so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.world.lock().calls.clone()
    }

    /// Calls to the named function (name without parameters)
    #[must_use]
    pub fn calls_named(&self, function: &str) -> Vec<RecordedCall> {
        self.world
            .lock()
            .calls
            .iter()
            .filter(|c| c.name() == function)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_contract(&self, address: Address) -> bool {
        self.world.lock().contracts.contains_key(&address)
    }

    #[must_use]
    pub fn owner_of(&self, address: Address) -> Option<Address> {
        self.world.lock().contracts.get(&address).and_then(|c| c.owner)
    }

    /// Force the owner of a contract
    pub fn set_owner(&self, address: Address, owner: Address) {
        if let Some(c) = self.world.lock().contracts.get_mut(&address) {
            c.owner = Some(owner);
        }
    }

    /// Overwrite one storage word of a contract
    pub fn set_storage(&self, address: Address, slot: B256, word: B256) {
        if let Some(c) = self.world.lock().contracts.get_mut(&address) {
            c.storage.insert(slot, word);
        }
    }

    /// Implementation currently behind a proxy
    #[must_use]
    pub fn implementation_of(&self, proxy: Address) -> Option<Address> {
        self.world
            .lock()
            .contracts
            .get(&proxy)
            .and_then(|c| c.storage.get(&IMPLEMENTATION_SLOT))
            .map(|word| Address::from_word(*word))
    }

    /// Code hash recorded at deployment
    #[must_use]
    pub fn code_hash_of(&self, address: Address) -> Option<B256> {
        self.world.lock().contracts.get(&address).map(|c| c.code_hash)
    }

    /// Submit an already-recorded call as `from`, bypassing the trait
    fn submit(&self, to: Address, function: &str, args: &[Value], from: Address) -> TxHash {
        let mut world = self.world.lock();
        let tx_hash = world.next_hash(from);
        let outcome = world.apply(to, function, args, from);
        if let Err(reason) = &outcome {
            tracing::debug!("Simulated call {} on {} reverted: {}", function, to, reason);
        }
        let success = outcome.is_ok();
        world.calls.push(RecordedCall {
            to,
            function: function.to_string(),
            args: args.to_vec(),
            from,
            success,
        });
        world.mine(tx_hash, success, None);
        tx_hash
    }
}

#[async_trait::async_trait]
impl Ledger for SimulatedLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.chain_id)
    }

    async fn deploy(
        &self,
        bytecode: &str,
        constructor_args: &[Value],
        from: Address,
    ) -> Result<Deployment, LedgerError> {
        let frozen = {
            let world = self.world.lock();
            world.halt.as_ref().is_some_and(|h| world.deployments >= h.after)
        };
        if frozen {
            futures::future::pending::<()>().await;
        }

        let mut world = self.world.lock();
        let tx_hash = world.next_hash(from);
        let address = Address::from_word(keccak256(tx_hash));

        let mut contract = SimContract {
            code_hash: keccak256(bytecode.as_bytes()),
            ..SimContract::default()
        };
        match constructor_args {
            [Value::Address(implementation), Value::Address(admin), Value::Bytes(init)] => {
                contract.storage.insert(IMPLEMENTATION_SLOT, implementation.into_word());
                contract.storage.insert(ADMIN_SLOT, admin.into_word());
                if init.len() >= 4 {
                    let owner = codec::decode_address(&init[4..])
                        .ok()
                        .filter(|a| !a.is_zero() && init[4..16].iter().all(|b| *b == 0))
                        .unwrap_or(from);
                    contract.owner = Some(owner);
                    contract.initialized = true;
                }
            }
            [Value::Address(owner)] => contract.owner = Some(*owner),
            _ => {}
        }
        world.contracts.insert(address, contract);
        world.mine(tx_hash, true, Some(address));
        world.deployments += 1;

        let reached = world.deployments;
        if let Some(halt) = world.halt.as_mut() {
            if reached >= halt.after {
                if let Some(signal) = halt.signal.take() {
                    let _ = signal.send(());
                }
            }
        }

        Ok(Deployment { address, tx_hash })
    }

    async fn call(
        &self,
        to: Address,
        signature: &str,
        args: &[Value],
        from: Address,
    ) -> Result<TxHash, LedgerError> {
        Ok(self.submit(to, signature, args, from))
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Receipt, LedgerError> {
        let receipt = self
            .world
            .lock()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or(LedgerError::UnknownTransaction(tx_hash))?;
        if receipt.success {
            Ok(receipt)
        } else {
            Err(LedgerError::Reverted(tx_hash))
        }
    }

    async fn read_storage_at(&self, address: Address, slot: B256) -> Result<B256, LedgerError> {
        Ok(self
            .world
            .lock()
            .contracts
            .get(&address)
            .and_then(|c| c.storage.get(&slot).copied())
            .unwrap_or(B256::ZERO))
    }

    async fn query(&self, to: Address, signature: &str, args: &[Value]) -> Result<Vec<u8>, LedgerError> {
        let world = self.world.lock();
        let contract = world.contracts.get(&to).ok_or_else(|| LedgerError::Rejected {
            to,
            function: signature.to_string(),
            reason: "no contract".to_string(),
        })?;
        match function_name(signature) {
            "owner" => contract
                .owner
                .map(|o| codec::encode_return(&Value::Address(o)))
                .ok_or(LedgerError::NoOwner(to)),
            "isTemplateApproved" => {
                let template = first_address(args).unwrap_or(Address::ZERO);
                Ok(codec::encode_return(&Value::Bool(contract.approved.contains(&template))))
            }
            _ => Err(LedgerError::Rejected {
                to,
                function: signature.to_string(),
                reason: "view not simulated".to_string(),
            }),
        }
    }
}

/// In-memory 2-of-N custody executing through a [`SimulatedLedger`]
///
/// Execution follows Safe's rule: the submitted signers (approvers plus the
/// executor) are sorted, and each of the first `threshold` must have an
/// approval on record or be the executor.
#[derive(Debug)]
pub struct SimulatedCustody {
    ledger: Arc<SimulatedLedger>,
    threshold: usize,
    approvals: Mutex<HashMap<B256, BTreeSet<Address>>>,
    unavailable: AtomicBool,
}

impl SimulatedCustody {
    #[must_use]
    pub fn new(ledger: Arc<SimulatedLedger>) -> Self {
        Self {
            ledger,
            threshold: 2,
            approvals: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every custody operation fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Custody("custody service unavailable".to_string()));
        }
        Ok(())
    }

    fn hash(safe: Address, tx: &PendingTransaction) -> B256 {
        let mut preimage = safe.to_vec();
        preimage.extend_from_slice(tx.to.as_slice());
        preimage.extend_from_slice(&tx.data);
        keccak256(preimage)
    }
}

#[async_trait::async_trait]
impl MultisigCustody for SimulatedCustody {
    async fn transaction_hash(&self, safe: Address, tx: &PendingTransaction) -> Result<B256, LedgerError> {
        self.check_available()?;
        Ok(Self::hash(safe, tx))
    }

    async fn approve_hash(&self, _safe: Address, hash: B256, approver: Address) -> Result<(), LedgerError> {
        self.check_available()?;
        self.approvals.lock().entry(hash).or_default().insert(approver);
        Ok(())
    }

    async fn execute(
        &self,
        safe: Address,
        tx: &PendingTransaction,
        approvers: &[Address],
        executor: Address,
    ) -> Result<TxHash, LedgerError> {
        self.check_available()?;
        let hash = Self::hash(safe, tx);
        let recorded = self.approvals.lock().get(&hash).cloned().unwrap_or_default();
        let mut signers: Vec<Address> = approvers.iter().copied().chain(std::iter::once(executor)).collect();
        signers.sort();
        signers.dedup();
        if signers.len() < self.threshold {
            return Err(LedgerError::Custody(format!(
                "{} of {} required approvals",
                signers.len(),
                self.threshold
            )));
        }
        if let Some(unapproved) = signers
            .iter()
            .take(self.threshold)
            .find(|s| **s != executor && !recorded.contains(*s))
        {
            return Err(LedgerError::Custody(format!("{unapproved} has not approved {hash}")));
        }
        let tx_hash = self.ledger.submit(tx.to, &tx.function, &tx.args, safe);
        self.ledger.await_confirmation(tx_hash).await?;
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([n; 20])
    }

    #[tokio::test]
    async fn initialize_sets_owner_then_ownership_rules_apply() {
        let ledger = SimulatedLedger::default();
        let dep = ledger.deploy("0x01", &[], addr(1)).await.unwrap();
        let tx = ledger
            .call(dep.address, "initialize(address)", &[Value::Address(addr(2))], addr(1))
            .await
            .unwrap();
        ledger.await_confirmation(tx).await.unwrap();
        assert_eq!(ledger.current_owner_of(dep.address).await.unwrap(), addr(2));

        let tx = ledger
            .call(dep.address, "setGovernor(address)", &[Value::Address(addr(3))], addr(1))
            .await
            .unwrap();
        assert!(matches!(ledger.await_confirmation(tx).await, Err(LedgerError::Reverted(_))));

        let tx = ledger
            .call(dep.address, "setGovernor(address)", &[Value::Address(addr(3))], addr(2))
            .await
            .unwrap();
        assert!(ledger.await_confirmation(tx).await.is_ok());
    }

    #[tokio::test]
    async fn proxy_upgrade_requires_admin_owner() {
        let ledger = SimulatedLedger::default();
        let admin = ledger.deploy("admin", &[Value::Address(addr(1))], addr(1)).await.unwrap().address;
        let v1 = ledger.deploy("v1", &[], addr(1)).await.unwrap().address;
        let v2 = ledger.deploy("v2", &[], addr(1)).await.unwrap().address;
        let init = codec::encode_call("initialize(address)", &[Value::Address(addr(1))]).unwrap();
        let proxy = ledger
            .deploy("proxy", &[Value::Address(v1), Value::Address(admin), Value::Bytes(init.into())], addr(1))
            .await
            .unwrap()
            .address;
        assert_eq!(ledger.owner_of(proxy), Some(addr(1)));

        let slot = ledger.read_storage_at(proxy, ADMIN_SLOT).await.unwrap();
        assert_eq!(Address::from_word(slot), admin);

        let args = [Value::Address(proxy), Value::Address(v2)];
        let tx = ledger.call(admin, "upgrade(address,address)", &args, addr(9)).await.unwrap();
        assert!(ledger.await_confirmation(tx).await.is_err());
        assert_eq!(ledger.implementation_of(proxy), Some(v1));

        let tx = ledger.call(admin, "upgrade(address,address)", &args, addr(1)).await.unwrap();
        ledger.await_confirmation(tx).await.unwrap();
        assert_eq!(ledger.implementation_of(proxy), Some(v2));
    }

    #[tokio::test]
    async fn template_approval_flow() {
        let ledger = SimulatedLedger::default();
        let tsm = ledger.deploy("tsm", &[Value::Address(addr(1))], addr(1)).await.unwrap().address;
        let template = [Value::Address(addr(7))];

        let approve = ledger.call(tsm, "approveTemplate(address)", &template, addr(1)).await.unwrap();
        assert!(ledger.await_confirmation(approve).await.is_err());

        let propose = ledger.call(tsm, "proposeTemplate(address)", &template, addr(5)).await.unwrap();
        ledger.await_confirmation(propose).await.unwrap();
        let again = ledger.call(tsm, "proposeTemplate(address)", &template, addr(5)).await.unwrap();
        assert!(ledger.await_confirmation(again).await.is_err());

        let approve = ledger.call(tsm, "approveTemplate(address)", &template, addr(1)).await.unwrap();
        ledger.await_confirmation(approve).await.unwrap();
        let data = ledger.query(tsm, "isTemplateApproved(address)", &template).await.unwrap();
        assert!(codec::decode_bool(&data).unwrap());
    }

    #[tokio::test]
    async fn custody_needs_two_approvals() {
        let ledger = Arc::new(SimulatedLedger::default());
        let safe = addr(0x5a);
        let target = ledger.deploy("t", &[Value::Address(safe)], addr(1)).await.unwrap().address;
        let custody = SimulatedCustody::new(Arc::clone(&ledger));
        let tx = PendingTransaction::call(target, "pause()", vec![]).unwrap();
        let approvers = [addr(2), addr(3)];

        assert!(custody.execute(safe, &tx, &approvers, addr(3)).await.is_err());

        let hash = custody.transaction_hash(safe, &tx).await.unwrap();
        custody.approve_hash(safe, hash, addr(2)).await.unwrap();
        custody.execute(safe, &tx, &approvers, addr(3)).await.unwrap();
        let last = ledger.calls().pop().unwrap();
        assert_eq!(last.from, safe);
        assert!(last.success);
    }

    #[tokio::test]
    async fn custody_rejects_unapproved_signer_ahead_in_order() {
        let ledger = Arc::new(SimulatedLedger::default());
        let safe = addr(0x5a);
        let target = ledger.deploy("t", &[Value::Address(safe)], addr(1)).await.unwrap().address;
        let custody = SimulatedCustody::new(Arc::clone(&ledger));
        let tx = PendingTransaction::call(target, "pause()", vec![]).unwrap();

        let hash = custody.transaction_hash(safe, &tx).await.unwrap();
        custody.approve_hash(safe, hash, addr(4)).await.unwrap();

        // addr(2) sorts first and never approved
        let err = custody.execute(safe, &tx, &[addr(2), addr(4)], addr(5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Custody(_)));
        assert!(ledger.calls_named("pause").is_empty());

        custody.execute(safe, &tx, &[addr(4)], addr(5)).await.unwrap();
        assert_eq!(ledger.calls_named("pause").len(), 1);
    }

    #[tokio::test]
    async fn halt_signals_after_count() {
        let ledger = SimulatedLedger::default();
        let mut signal = ledger.halt_after_deploys(1);
        assert!(signal.try_recv().is_err());
        ledger.deploy("a", &[], addr(1)).await.unwrap();
        assert!(signal.try_recv().is_ok());
        assert_eq!(ledger.deployment_count(), 1);
    }
}
