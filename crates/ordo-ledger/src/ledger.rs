//! Collaborator traits
//!
//! The orchestrator reaches the chain and the multi-party custody service
//! only through these traits. Backends: [`crate::RpcLedger`],
//! [`crate::SafeCustody`], and the in-memory [`crate::SimulatedLedger`] /
//! [`crate::SimulatedCustody`].

use ordo_artifact::{Address, B256};

use crate::codec;
use crate::error::LedgerError;
use crate::types::{Deployment, PendingTransaction, Receipt, TxHash, Value};

/// Transaction submission and state reads against one network
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    /// Chain identifier of the connected network
    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Submit a contract creation; the returned address is where the code will live
    async fn deploy(
        &self,
        bytecode: &str,
        constructor_args: &[Value],
        from: Address,
    ) -> Result<Deployment, LedgerError>;

    /// Submit a state-changing call
    async fn call(
        &self,
        to: Address,
        signature: &str,
        args: &[Value],
        from: Address,
    ) -> Result<TxHash, LedgerError>;

    /// Wait until the transaction is mined
    ///
    /// A mined but reverted transaction is an error.
    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Receipt, LedgerError>;

    /// Read one raw storage slot
    async fn read_storage_at(&self, address: Address, slot: B256) -> Result<B256, LedgerError>;

    /// Run a view call and return the raw return data
    async fn query(&self, to: Address, signature: &str, args: &[Value]) -> Result<Vec<u8>, LedgerError>;

    /// Current `owner()` of an ownable contract
    async fn current_owner_of(&self, address: Address) -> Result<Address, LedgerError> {
        let data = self.query(address, "owner()", &[]).await?;
        codec::decode_address(&data)
    }
}

/// A 2-of-N approval service holding upgrade authority
#[async_trait::async_trait]
pub trait MultisigCustody: Send + Sync {
    /// Hash the approvers sign for `tx` executed by `safe`
    async fn transaction_hash(&self, safe: Address, tx: &PendingTransaction) -> Result<B256, LedgerError>;

    /// Record `approver`'s approval of `hash`
    async fn approve_hash(&self, safe: Address, hash: B256, approver: Address) -> Result<(), LedgerError>;

    /// Execute `tx` from `safe`, submitted by `executor` whose own approval is implied
    ///
    /// `approvers` must hold only signers whose `approve_hash` has confirmed.
    async fn execute(
        &self,
        safe: Address,
        tx: &PendingTransaction,
        approvers: &[Address],
        executor: Address,
    ) -> Result<TxHash, LedgerError>;
}
