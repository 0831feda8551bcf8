//! Safe-style multi-party custody driven through any [`Ledger`]
//!
//! The first approver registers the transaction hash on-chain with
//! `approveHash`; the executor submits `execTransaction` with pre-validated
//! signatures for the recorded approvers and itself. Safe checks the first
//! `threshold` signatures in signer order, so only signers that really
//! approved may appear in the list.

use std::sync::Arc;

use alloy_sol_types::{sol, SolCall};
use ordo_artifact::{Address, Bytes, B256, U256};

use crate::codec;
use crate::error::LedgerError;
use crate::ledger::{Ledger, MultisigCustody};
use crate::types::{PendingTransaction, TxHash, Value};

sol! {
    interface ISafe {
        function nonce() external view returns (uint256);
        function getTransactionHash(
            address to,
            uint256 value,
            bytes data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32);
        function approveHash(bytes32 hashToApprove) external;
        function execTransaction(
            address to,
            uint256 value,
            bytes data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes signatures
        ) external payable returns (bool success);
    }
}

/// Custody backed by a deployed Safe contract
#[derive(Clone)]
pub struct SafeCustody {
    ledger: Arc<dyn Ledger>,
}

impl std::fmt::Debug for SafeCustody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeCustody").finish_non_exhaustive()
    }
}

impl SafeCustody {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Transaction fields shared by hashing and execution, without the trailing nonce/signatures
    fn call_fields(tx: &PendingTransaction) -> Vec<Value> {
        let zero = Value::Uint(U256::ZERO);
        vec![
            Value::Address(tx.to),
            Value::Uint(tx.value),
            Value::Bytes(tx.data.clone()),
            zero.clone(),
            zero.clone(),
            zero.clone(),
            zero,
            Value::Address(Address::ZERO),
            Value::Address(Address::ZERO),
        ]
    }

    /// Pre-validated signatures: `r = signer`, `s = 0`, `v = 1`, ordered by signer
    fn prevalidated_signatures(signers: &[Address]) -> Bytes {
        let mut sorted = signers.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut out = Vec::with_capacity(sorted.len() * 65);
        for signer in sorted {
            out.extend_from_slice(signer.into_word().as_slice());
            out.extend_from_slice(B256::ZERO.as_slice());
            out.push(1);
        }
        out.into()
    }
}

#[async_trait::async_trait]
impl MultisigCustody for SafeCustody {
    async fn transaction_hash(&self, safe: Address, tx: &PendingTransaction) -> Result<B256, LedgerError> {
        let nonce = codec::decode_uint(&self.ledger.query(safe, ISafe::nonceCall::SIGNATURE, &[]).await?)?;
        let mut args = Self::call_fields(tx);
        args.push(Value::Uint(nonce));
        let data = self
            .ledger
            .query(safe, ISafe::getTransactionHashCall::SIGNATURE, &args)
            .await?;
        codec::decode_word(&data)
    }

    async fn approve_hash(&self, safe: Address, hash: B256, approver: Address) -> Result<(), LedgerError> {
        let tx_hash = self
            .ledger
            .call(safe, ISafe::approveHashCall::SIGNATURE, &[Value::Bytes32(hash)], approver)
            .await?;
        self.ledger.await_confirmation(tx_hash).await?;
        Ok(())
    }

    async fn execute(
        &self,
        safe: Address,
        tx: &PendingTransaction,
        approvers: &[Address],
        executor: Address,
    ) -> Result<TxHash, LedgerError> {
        let mut signers = approvers.to_vec();
        signers.push(executor);
        let mut args = Self::call_fields(tx);
        args.push(Value::Bytes(Self::prevalidated_signatures(&signers)));
        let tx_hash = self
            .ledger
            .call(safe, ISafe::execTransactionCall::SIGNATURE, &args, executor)
            .await?;
        self.ledger.await_confirmation(tx_hash).await?;
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use ordo_artifact::canonical_signature;

    use super::*;

    #[test]
    fn signatures_sorted_and_deduplicated() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        let sigs = SafeCustody::prevalidated_signatures(&[b, a, b]);
        assert_eq!(sigs.len(), 130);
        assert_eq!(&sigs[12..32], a.as_slice());
        assert_eq!(sigs[64], 1);
        assert_eq!(&sigs[65 + 12..65 + 32], b.as_slice());
    }

    #[test]
    fn signatures_cover_only_the_given_signers() {
        let approver = Address::new([9; 20]);
        let executor = Address::new([3; 20]);
        let sigs = SafeCustody::prevalidated_signatures(&[approver, executor]);
        assert_eq!(sigs.len(), 130);
        assert_eq!(&sigs[12..32], executor.as_slice());
        assert_eq!(&sigs[65 + 12..65 + 32], approver.as_slice());
    }

    #[test]
    fn interface_signatures_are_canonical() {
        assert_eq!(ISafe::nonceCall::SIGNATURE, "nonce()");
        assert_eq!(ISafe::approveHashCall::SIGNATURE, "approveHash(bytes32)");
        assert_eq!(
            canonical_signature("execTransaction", &["address", "uint256", "bytes", "uint8", "uint256", "uint256", "uint256", "address", "address", "bytes"]),
            ISafe::execTransactionCall::SIGNATURE
        );
    }
}
