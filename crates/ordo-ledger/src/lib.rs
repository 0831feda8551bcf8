//! Ordo Ledger Collaborators
//!
//! Narrow interfaces to everything outside the orchestrator, plus backends.
//!
//! # Core Concepts
//!
//! - [`Ledger`]: submit deployments and calls, await confirmation, read storage
//! - [`ComponentRegistry`]: compiled interface and bytecode by unit name
//! - [`MultisigCustody`]: 2-of-N approval and execution of a pending transaction
//! - [`Value`]: typed call argument, encoded by [`codec`]
//!
//! # Backends
//!
//! - [`RpcLedger`] / [`SafeCustody`] / [`BuildDirRegistry`] for real networks
//! - [`SimulatedLedger`] / [`SimulatedCustody`] / [`InMemoryRegistry`] for
//!   local dry runs and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use ordo_ledger::{Ledger, RpcLedger, Value};
//!
//! let ledger = RpcLedger::connect("http://localhost:8545")?;
//! let tx = ledger.call(config, "setGovernor(address)", &[Value::Address(gov)], owner).await?;
//! ledger.await_confirmation(tx).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod codec;
mod error;
mod ledger;
mod registry;
mod rpc;
mod safe;
mod simulator;
mod types;

// Re-exports
pub use error::{LedgerError, RegistryError};
pub use ledger::{Ledger, MultisigCustody};
pub use registry::{BuildDirRegistry, Component, ComponentRegistry, InMemoryRegistry, LinkOffset};
pub use rpc::RpcLedger;
pub use safe::SafeCustody;
pub use simulator::{RecordedCall, SimulatedCustody, SimulatedLedger, SIMULATED_CHAIN_ID};
pub use types::{display_args, Deployment, PendingTransaction, Receipt, TxHash, Value};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use super::*;
    use ordo_artifact::{Address, Bytes};

    #[tokio::test]
    async fn custody_executes_admin_upgrade_through_simulated_ledger() {
        let ledger = Arc::new(SimulatedLedger::default());
        let deployer = Address::new([1; 20]);
        let safe = Address::new([0x5a; 20]);
        let approvers = [Address::new([2; 20]), Address::new([3; 20])];

        let admin = ledger.deploy("admin", &[Value::Address(safe)], deployer).await.unwrap().address;
        let v1 = ledger.deploy("v1", &[], deployer).await.unwrap().address;
        let v2 = ledger.deploy("v2", &[], deployer).await.unwrap().address;
        let proxy = ledger
            .deploy("proxy", &[Value::Address(v1), Value::Address(admin), Value::Bytes(Bytes::new())], deployer)
            .await
            .unwrap()
            .address;

        let tx = PendingTransaction::call(
            admin,
            "upgrade(address,address)",
            vec![Value::Address(proxy), Value::Address(v2)],
        )
        .unwrap();
        let custody = SimulatedCustody::new(Arc::clone(&ledger));
        let hash = custody.transaction_hash(safe, &tx).await.unwrap();
        custody.approve_hash(safe, hash, approvers[0]).await.unwrap();
        custody.execute(safe, &tx, &approvers, approvers[1]).await.unwrap();

        assert_eq!(ledger.implementation_of(proxy), Some(v2));
    }
}
