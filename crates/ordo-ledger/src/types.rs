//! Values exchanged with the ledger

use std::fmt::{self, Display, Formatter};

use alloy_dyn_abi::DynSolValue;
use ordo_artifact::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Transaction hash
pub type TxHash = B256;

/// A typed call or constructor argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes32(B256),
    String(String),
    Bytes(Bytes),
    /// Dynamic array; elements share one type
    Array(Vec<Value>),
}

impl Value {
    /// Canonical ABI type name of this value
    ///
    /// An empty array carries no element type and is named `uint256[]`.
    #[must_use]
    pub fn abi_type(&self) -> String {
        match self {
            Self::Address(_) => "address".to_string(),
            Self::Uint(_) => "uint256".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Bytes32(_) => "bytes32".to_string(),
            Self::String(_) => "string".to_string(),
            Self::Bytes(_) => "bytes".to_string(),
            Self::Array(items) => {
                let element = items.first().map_or_else(|| "uint256".to_string(), Self::abi_type);
                format!("{element}[]")
            }
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// The dynamic ABI value this argument encodes as
    #[must_use]
    pub fn to_sol(&self) -> DynSolValue {
        match self {
            Self::Address(a) => DynSolValue::Address(*a),
            Self::Uint(v) => DynSolValue::Uint(*v, 256),
            Self::Bool(b) => DynSolValue::Bool(*b),
            Self::Bytes32(w) => DynSolValue::FixedBytes(*w, 32),
            Self::String(s) => DynSolValue::String(s.clone()),
            Self::Bytes(b) => DynSolValue::Bytes(b.to_vec()),
            Self::Array(items) => DynSolValue::Array(items.iter().map(Self::to_sol).collect()),
        }
    }
}

impl From<Address> for Value {
    fn from(a: Address) -> Self {
        Self::Address(a)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<U256> for Value {
    fn from(v: U256) -> Self {
        Self::Uint(v)
    }
}

impl From<u128> for Value {
    fn from(v: u128) -> Self {
        Self::Uint(U256::from(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(a) => write!(f, "{a}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Bytes32(w) => write!(f, "{w}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "{b}"),
            Self::Array(items) => f.write_str(&display_args(items)),
        }
    }
}

/// Render an argument list as `[a, b, c]` for log lines
#[must_use]
pub fn display_args(args: &[Value]) -> String {
    let parts: Vec<String> = args.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Result of submitting a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub tx_hash: TxHash,
}

/// Confirmed transaction outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub success: bool,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
}

/// A transaction left for external signers
///
/// `data` is complete calldata so the entry can be submitted unchanged;
/// `function` and `args` keep it reviewable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub description: String,
}

impl PendingTransaction {
    /// Build a pending call, encoding its calldata
    ///
    /// # Errors
    /// Returns error if the arguments do not match the signature
    pub fn call(to: Address, function: &str, args: Vec<Value>) -> Result<Self, LedgerError> {
        Ok(Self {
            to,
            data: crate::codec::encode_call(function, &args)?.into(),
            value: U256::ZERO,
            function: function.to_string(),
            args,
            description: String::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
