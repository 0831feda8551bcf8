//! Error types for ledger, registry and custody collaborators

use std::path::PathBuf;

use ordo_artifact::Address;

use crate::types::TxHash;

/// Errors raised by a ledger or custody backend
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Node endpoint is not a valid URL
    #[error("invalid rpc url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// JSON-RPC transport failure or error response
    #[error("rpc error: {0}")]
    Transport(#[from] alloy::transports::TransportError),

    /// Transaction was mined but reverted
    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    /// Submission was rejected before inclusion
    #[error("call {function} on {to} rejected: {reason}")]
    Rejected {
        to: Address,
        function: String,
        reason: String,
    },

    /// No receipt within the confirmation timeout
    #[error("transaction {tx_hash} not confirmed after {secs}s")]
    Timeout { tx_hash: TxHash, secs: u64 },

    /// Target exposes no owner
    #[error("contract {0} has no owner")]
    NoOwner(Address),

    /// Unknown transaction hash
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxHash),

    /// Arguments do not fit the function signature
    #[error("cannot encode {signature}: {reason}")]
    Encode { signature: String, reason: String },

    /// Return data could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Multi-party approval flow failed
    #[error("custody error: {0}")]
    Custody(String),
}

/// Errors raised while resolving component interfaces and bytecode
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No component with this name
    #[error("component not found: {0}")]
    NotFound(String),

    /// Filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed compiler output
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Bytecode references a library whose address was not supplied
    #[error("component {component} needs library {library}")]
    MissingLibrary { component: String, library: String },

    /// A link reference points outside the bytecode
    #[error("component {component} has an invalid link reference at byte {start}")]
    InvalidLinkReference { component: String, start: usize },
}
