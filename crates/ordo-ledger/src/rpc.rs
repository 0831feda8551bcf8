//! JSON-RPC ledger over an alloy HTTP provider
//!
//! Transactions are sent with `eth_sendTransaction`, so signing is done by
//! the node for its managed accounts. Contract addresses are derived from
//! the sender and its pending nonce.

use std::time::{Duration, Instant};

use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use ordo_artifact::{Address, B256, U256};

use crate::codec;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::types::{Deployment, Receipt, TxHash, Value};

/// Ledger speaking Ethereum JSON-RPC
#[derive(Debug, Clone)]
pub struct RpcLedger {
    provider: RootProvider,
    poll_interval: Duration,
    timeout: Duration,
}

impl RpcLedger {
    /// Connect to the node at `url`
    ///
    /// # Errors
    /// Returns error if `url` is not a valid URL
    pub fn connect(url: &str) -> Result<Self, LedgerError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| LedgerError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            provider: RootProvider::new_http(parsed),
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(300),
        })
    }

    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(&self, tx: TransactionRequest) -> Result<TxHash, LedgerError> {
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }
}

#[async_trait::async_trait]
impl Ledger for RpcLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn deploy(
        &self,
        bytecode: &str,
        constructor_args: &[Value],
        from: Address,
    ) -> Result<Deployment, LedgerError> {
        let nonce = self.provider.get_transaction_count(from).pending().await?;

        let mut code = hex::decode(bytecode.trim_start_matches("0x"))
            .map_err(|e| LedgerError::Decode(format!("bytecode: {e}")))?;
        code.extend(codec::encode_args(constructor_args));
        let tx_hash = self
            .send(TransactionRequest::default().with_from(from).with_deploy_code(code))
            .await?;

        Ok(Deployment {
            address: from.create(nonce),
            tx_hash,
        })
    }

    async fn call(
        &self,
        to: Address,
        signature: &str,
        args: &[Value],
        from: Address,
    ) -> Result<TxHash, LedgerError> {
        let data = codec::encode_call(signature, args)?;
        self.send(TransactionRequest::default().with_from(from).with_to(to).with_input(data))
            .await
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Receipt, LedgerError> {
        let started = Instant::now();
        loop {
            if let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? {
                if !ReceiptResponse::status(&receipt) {
                    return Err(LedgerError::Reverted(tx_hash));
                }
                return Ok(Receipt {
                    tx_hash,
                    success: true,
                    block_number: ReceiptResponse::block_number(&receipt).unwrap_or_default(),
                    contract_address: ReceiptResponse::contract_address(&receipt),
                });
            }
            if started.elapsed() >= self.timeout {
                return Err(LedgerError::Timeout {
                    tx_hash,
                    secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn read_storage_at(&self, address: Address, slot: B256) -> Result<B256, LedgerError> {
        let key = U256::from_be_bytes(slot.0);
        let value = self.provider.get_storage_at(address, key).await?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    async fn query(&self, to: Address, signature: &str, args: &[Value]) -> Result<Vec<u8>, LedgerError> {
        let data = codec::encode_call(signature, args)?;
        let output = self
            .provider
            .call(TransactionRequest::default().with_to(to).with_input(data))
            .await?;
        Ok(output.to_vec())
    }
}
