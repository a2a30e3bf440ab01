//! Runtime calldata encoding from JSON ABI fragments.
//!
//! Workflow authors attach an `abiFragment` (one function item of a JSON
//! ABI) and an `argsMapping` keyed by the fragment's declared input names.
//! Encoding happens lazily at step execution, after the mapping has been
//! resolved against the run context.

use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt};
use alloy_json_abi::Function;
use serde_json::{Map, Value};

use crate::types::Selector;

#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error("abi fragment is malformed: {0}")]
    BadFragment(String),
    #[error("unsupported abi type: {0}")]
    UnsupportedType(String),
    #[error("argument '{name}' is invalid: {reason}")]
    BadArgument { name: String, reason: String },
    #[error("abi encoding failed: {0}")]
    Encode(String),
}

/// Selector-prefixed calldata for one resolved call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCall {
    pub selector: Selector,
    pub calldata: Vec<u8>,
}

/// Check that a fragment parses as a JSON ABI function item without
/// encoding anything. Dry runs use this so a malformed ABI still fails even
/// when the arguments are unresolved.
pub fn validate_fragment(fragment: &Value) -> Result<(), AbiError> {
    serde_json::from_value::<Function>(fragment.clone())
        .map(|_| ())
        .map_err(|e| AbiError::BadFragment(e.to_string()))
}

/// Encode `fragment(argsMapping)` into calldata. Arguments are taken from
/// `args` by the fragment's declared input names, in declaration order.
pub fn encode_fragment_call(
    fragment: &Value,
    args: &Map<String, Value>,
) -> Result<EncodedCall, AbiError> {
    let function: Function = serde_json::from_value(fragment.clone())
        .map_err(|e| AbiError::BadFragment(e.to_string()))?;

    let mut values = Vec::with_capacity(function.inputs.len());
    for input in &function.inputs {
        let name = if input.name.is_empty() {
            return Err(AbiError::BadFragment(
                "fragment inputs must be named for argsMapping".to_string(),
            ));
        } else {
            input.name.as_str()
        };
        let value = args.get(name).ok_or_else(|| AbiError::BadArgument {
            name: name.to_string(),
            reason: "missing".to_string(),
        })?;
        let sol_type: DynSolType = input
            .selector_type()
            .parse()
            .map_err(|_| AbiError::UnsupportedType(input.selector_type().into_owned()))?;
        values.push(json_to_sol(&sol_type, value).map_err(|reason| AbiError::BadArgument {
            name: name.to_string(),
            reason,
        })?);
    }

    let calldata = function
        .abi_encode_input(&values)
        .map_err(|e| AbiError::Encode(e.to_string()))?;
    let selector = Selector(function.selector().0);
    Ok(EncodedCall { selector, calldata })
}

fn json_to_sol(sol_type: &DynSolType, value: &Value) -> Result<DynSolValue, String> {
    match sol_type {
        DynSolType::Array(inner) => {
            let items = value.as_array().ok_or("expected an array")?;
            let converted: Result<Vec<_>, _> =
                items.iter().map(|item| json_to_sol(inner, item)).collect();
            Ok(DynSolValue::Array(converted?))
        }
        DynSolType::FixedArray(inner, len) => {
            let items = value.as_array().ok_or("expected an array")?;
            if items.len() != *len {
                return Err(format!("expected {len} elements, got {}", items.len()));
            }
            let converted: Result<Vec<_>, _> =
                items.iter().map(|item| json_to_sol(inner, item)).collect();
            Ok(DynSolValue::FixedArray(converted?))
        }
        DynSolType::Tuple(members) => {
            let items = value.as_array().ok_or("expected an array for tuple")?;
            if items.len() != members.len() {
                return Err(format!(
                    "expected {} tuple members, got {}",
                    members.len(),
                    items.len()
                ));
            }
            let converted: Result<Vec<_>, _> = members
                .iter()
                .zip(items)
                .map(|(member, item)| json_to_sol(member, item))
                .collect();
            Ok(DynSolValue::Tuple(converted?))
        }
        DynSolType::Bool => match value {
            Value::Bool(b) => Ok(DynSolValue::Bool(*b)),
            Value::String(s) => sol_type.coerce_str(s).map_err(|e| e.to_string()),
            _ => Err("expected a boolean".to_string()),
        },
        DynSolType::String => match value {
            Value::String(s) => Ok(DynSolValue::String(s.clone())),
            other => Ok(DynSolValue::String(other.to_string())),
        },
        // Addresses, integers, and byte strings coerce from their canonical
        // string forms; bare JSON numbers are stringified first.
        _ => match value {
            Value::String(s) => sol_type.coerce_str(s).map_err(|e| e.to_string()),
            Value::Number(n) => sol_type
                .coerce_str(&n.to_string())
                .map_err(|e| e.to_string()),
            _ => Err(format!("cannot coerce {value} to {sol_type}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transfer_fragment() -> Value {
        json!({
            "type": "function",
            "name": "transfer",
            "stateMutability": "nonpayable",
            "inputs": [
                { "name": "to", "type": "address" },
                { "name": "amount", "type": "uint256" }
            ],
            "outputs": [{ "name": "", "type": "bool" }]
        })
    }

    #[test]
    fn encodes_transfer_with_expected_selector_and_layout() {
        let mut args = Map::new();
        args.insert(
            "to".to_string(),
            json!("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
        );
        args.insert("amount".to_string(), json!("1000000"));

        let encoded = encode_fragment_call(&transfer_fragment(), &args).unwrap();
        assert_eq!(encoded.selector.as_lower(), "0xa9059cbb");
        assert_eq!(encoded.calldata.len(), 4 + 32 + 32);
        assert_eq!(&encoded.calldata[..4], &encoded.selector.0);
        // Address is right-aligned in its word.
        assert_eq!(
            hex::encode(&encoded.calldata[16..36]),
            "f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        // 1_000_000 = 0x0f4240 at the end of the second word.
        assert_eq!(&encoded.calldata[65..], &[0x0f, 0x42, 0x40]);
    }

    #[test]
    fn numbers_coerce_from_json_numbers() {
        let mut args = Map::new();
        args.insert(
            "to".to_string(),
            json!("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
        );
        args.insert("amount".to_string(), json!(42));
        let encoded = encode_fragment_call(&transfer_fragment(), &args).unwrap();
        assert_eq!(encoded.calldata[67], 42);
    }

    #[test]
    fn missing_argument_is_reported_by_name() {
        let args = Map::new();
        match encode_fragment_call(&transfer_fragment(), &args) {
            Err(AbiError::BadArgument { name, .. }) => assert_eq!(name, "to"),
            other => panic!("expected BadArgument, got {other:?}"),
        }
    }

    #[test]
    fn malformed_fragment_is_rejected() {
        let fragment = json!({ "inputs": "not-an-array" });
        assert!(matches!(
            encode_fragment_call(&fragment, &Map::new()),
            Err(AbiError::BadFragment(_))
        ));
    }

    #[test]
    fn bad_address_argument_is_rejected() {
        let mut args = Map::new();
        args.insert("to".to_string(), json!("not-an-address"));
        args.insert("amount".to_string(), json!("1"));
        assert!(matches!(
            encode_fragment_call(&transfer_fragment(), &args),
            Err(AbiError::BadArgument { .. })
        ));
    }

    #[test]
    fn encodes_array_arguments() {
        let fragment = json!({
            "type": "function",
            "name": "batchSend",
            "stateMutability": "nonpayable",
            "inputs": [{ "name": "amounts", "type": "uint256[]" }],
            "outputs": []
        });
        let mut args = Map::new();
        args.insert("amounts".to_string(), json!(["1", "2", "3"]));
        let encoded = encode_fragment_call(&fragment, &args).unwrap();
        // selector + offset word + length word + 3 elements
        assert_eq!(encoded.calldata.len(), 4 + 32 + 32 + 3 * 32);
    }
}
