//! Calldata encoding and return-data decoding
//!
//! Calls are encoded against their canonical signature, so an argument list
//! that does not match the declared parameter types is rejected before it
//! reaches the ledger.

use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::Function;
use ordo_artifact::{Address, B256, U256};

use crate::error::LedgerError;
use crate::types::Value;

fn encode_error(signature: &str, reason: impl ToString) -> LedgerError {
    LedgerError::Encode {
        signature: signature.to_string(),
        reason: reason.to_string(),
    }
}

/// Fit an integer argument to the declared width of its parameter
fn narrow(ty: &DynSolType, value: DynSolValue) -> Result<DynSolValue, String> {
    match (ty, value) {
        (DynSolType::Uint(bits), DynSolValue::Uint(v, _)) => {
            if v.bit_len() > *bits {
                return Err(format!("{v} does not fit uint{bits}"));
            }
            Ok(DynSolValue::Uint(v, *bits))
        }
        (DynSolType::Array(inner), DynSolValue::Array(items)) => items
            .into_iter()
            .map(|item| narrow(inner, item))
            .collect::<Result<_, _>>()
            .map(DynSolValue::Array),
        (_, value) => Ok(value),
    }
}

/// Encode `selector(signature) ++ args`
///
/// # Errors
/// Returns error if the signature is malformed or the arguments do not
/// match its parameter types
pub fn encode_call(signature: &str, args: &[Value]) -> Result<Vec<u8>, LedgerError> {
    let function = Function::parse(signature).map_err(|e| encode_error(signature, e))?;
    if function.inputs.len() != args.len() {
        return Err(encode_error(
            signature,
            format!("expected {} arguments, got {}", function.inputs.len(), args.len()),
        ));
    }
    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param.resolve().map_err(|e| encode_error(signature, e))?;
            narrow(&ty, arg.to_sol()).map_err(|reason| encode_error(signature, reason))
        })
        .collect::<Result<Vec<_>, _>>()?;
    function.abi_encode_input(&values).map_err(|e| encode_error(signature, e))
}

/// Encode an argument tuple, as appended to creation bytecode
#[must_use]
pub fn encode_args(args: &[Value]) -> Vec<u8> {
    DynSolValue::Tuple(args.iter().map(Value::to_sol).collect()).abi_encode_params()
}

/// Encode a single return value, the shape view functions answer with
#[must_use]
pub fn encode_return(value: &Value) -> Vec<u8> {
    value.to_sol().abi_encode()
}

fn decode(data: &[u8], ty: &DynSolType) -> Result<DynSolValue, LedgerError> {
    ty.abi_decode(data)
        .map_err(|e| LedgerError::Decode(format!("{ty} from {} bytes: {e}", data.len())))
}

fn mismatch(ty: &str) -> LedgerError {
    LedgerError::Decode(format!("return data is not a {ty}"))
}

/// Decode return data holding an address
///
/// # Errors
/// Returns error if the data is empty or malformed
pub fn decode_address(data: &[u8]) -> Result<Address, LedgerError> {
    decode(data, &DynSolType::Address)?.as_address().ok_or_else(|| mismatch("address"))
}

/// Decode return data holding a bool
///
/// # Errors
/// Returns error if the data is empty or malformed
pub fn decode_bool(data: &[u8]) -> Result<bool, LedgerError> {
    decode(data, &DynSolType::Bool)?.as_bool().ok_or_else(|| mismatch("bool"))
}

/// Decode return data holding a `uint256`
///
/// # Errors
/// Returns error if the data is empty or malformed
pub fn decode_uint(data: &[u8]) -> Result<U256, LedgerError> {
    decode(data, &DynSolType::Uint(256))?
        .as_uint()
        .map(|(value, _)| value)
        .ok_or_else(|| mismatch("uint256"))
}

/// Decode return data holding a `bytes32`
///
/// # Errors
/// Returns error if the data is empty or malformed
pub fn decode_word(data: &[u8]) -> Result<B256, LedgerError> {
    let value = decode(data, &DynSolType::FixedBytes(32))?;
    let (bytes, _) = value.as_fixed_bytes().ok_or_else(|| mismatch("bytes32"))?;
    B256::try_from(bytes).map_err(|_| mismatch("bytes32"))
}

#[cfg(test)]
mod tests {
    use ordo_artifact::Bytes;

    use super::*;

    #[test]
    fn transfer_calldata() {
        let to = Address::new([0xaa; 20]);
        let data = encode_call("transfer(address,uint256)", &[Value::Address(to), Value::from(1u128)]).unwrap();
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(hex::encode(&data[..4]), "a9059cbb");
        assert_eq!(&data[4 + 12..4 + 32], to.as_slice());
        assert_eq!(data[4 + 63], 1);
    }

    #[test]
    fn string_goes_to_tail() {
        let data = encode_args(&[Value::from(7u128), Value::from("NVM")]);
        // head: uint, offset; tail: length, padded content
        assert_eq!(data.len(), 4 * 32);
        assert_eq!(data[63], 64);
        assert_eq!(data[95], 3);
        assert_eq!(&data[96..99], b"NVM");
        assert!(data[99..].iter().all(|b| *b == 0));
    }

    #[test]
    fn full_width_uint_round_trips() {
        let data = encode_return(&Value::Uint(U256::MAX));
        assert_eq!(decode_uint(&data).unwrap(), U256::MAX);
    }

    #[test]
    fn address_arrays_are_encoded() {
        let members = Value::Array(vec![Value::Address(Address::new([1; 20])), Value::Address(Address::new([2; 20]))]);
        let data = encode_call("setMembers(address[])", &[members]).unwrap();
        // selector, offset, length, two elements
        assert_eq!(data.len(), 4 + 4 * 32);
        assert_eq!(data[4 + 63], 2);
    }

    #[test]
    fn arguments_must_match_the_signature() {
        let err = encode_call("initialize(address)", &[Value::from(1u128)]).unwrap_err();
        assert!(matches!(err, LedgerError::Encode { .. }));
        assert!(encode_call("initialize(address)", &[]).is_err());
        assert!(encode_call("not a signature", &[]).is_err());
    }

    #[test]
    fn narrow_integer_parameters() {
        let data = encode_call("setOperation(uint8)", &[Value::from(1u128)]).unwrap();
        assert_eq!(data[4 + 31], 1);
        let err = encode_call("setOperation(uint8)", &[Value::from(256u128)]).unwrap_err();
        assert!(matches!(err, LedgerError::Encode { .. }));
    }

    #[test]
    fn decode_helpers() {
        let addr = Address::new([7; 20]);
        assert_eq!(decode_address(&encode_return(&Value::Address(addr))).unwrap(), addr);
        assert!(decode_bool(&encode_return(&Value::Bool(true))).unwrap());
        assert_eq!(decode_uint(&encode_return(&Value::from(1_000_000u128))).unwrap(), U256::from(1_000_000));
        assert!(decode_address(&[]).is_err());
        assert!(decode_bool(&[0u8; 5]).is_err());
        assert!(encode_args(&[Value::Bytes(Bytes::new())]).len() == 64);
    }
}
