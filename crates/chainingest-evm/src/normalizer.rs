//! Converts alloy-core `DynSolValue` into [`NormalizedValue`].

use alloy_core::dyn_abi::DynSolValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A decoded ABI value in a chain-neutral shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NormalizedValue {
    Uint(u128),
    /// Uints wider than u128, as a decimal string.
    BigUint(String),
    Int(i128),
    /// Ints wider than i128, as a decimal string.
    BigInt(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// EIP-55 checksummed address.
    Address(String),
    Array(Vec<NormalizedValue>),
    Tuple(Vec<(String, NormalizedValue)>),
}

impl NormalizedValue {
    pub fn as_address(&self) -> Option<&str> {
        match self {
            NormalizedValue::Address(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            NormalizedValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Plain JSON rendering for persisted records. Integers become decimal
    /// strings so no consumer loses precision; bytes become `0x` hex.
    pub fn to_json(&self) -> Value {
        match self {
            NormalizedValue::Uint(v) => json!(v.to_string()),
            NormalizedValue::Int(v) => json!(v.to_string()),
            NormalizedValue::BigUint(s) | NormalizedValue::BigInt(s) => json!(s),
            NormalizedValue::Bool(b) => json!(b),
            NormalizedValue::Bytes(b) => json!(format!("0x{}", hex::encode(b))),
            NormalizedValue::Str(s) | NormalizedValue::Address(s) => json!(s),
            NormalizedValue::Array(vals) => Value::Array(vals.iter().map(|v| v.to_json()).collect()),
            NormalizedValue::Tuple(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl std::fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizedValue::Uint(v) => write!(f, "{v}"),
            NormalizedValue::Int(v) => write!(f, "{v}"),
            NormalizedValue::BigUint(v) | NormalizedValue::BigInt(v) => write!(f, "{v}"),
            NormalizedValue::Bool(v) => write!(f, "{v}"),
            NormalizedValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            NormalizedValue::Str(s) | NormalizedValue::Address(s) => write!(f, "{s}"),
            NormalizedValue::Array(v) => {
                let parts: Vec<_> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            NormalizedValue::Tuple(fields) => {
                let parts: Vec<_> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Convert a decoded `DynSolValue` into a `NormalizedValue`.
pub fn normalize(val: DynSolValue) -> NormalizedValue {
    match val {
        DynSolValue::Bool(b) => NormalizedValue::Bool(b),

        // Width is ignored: a uint256 amount that fits in 128 bits stays numeric.
        DynSolValue::Int(i, _bits) => match i128::try_from(i) {
            Ok(v) => NormalizedValue::Int(v),
            Err(_) => NormalizedValue::BigInt(i.to_string()),
        },

        DynSolValue::Uint(u, _bits) => match u128::try_from(u) {
            Ok(v) => NormalizedValue::Uint(v),
            Err(_) => NormalizedValue::BigUint(u.to_string()),
        },

        DynSolValue::FixedBytes(word, size) => NormalizedValue::Bytes(word[..size].to_vec()),
        DynSolValue::Bytes(b) => NormalizedValue::Bytes(b),
        DynSolValue::String(s) => NormalizedValue::Str(s),
        DynSolValue::Address(a) => NormalizedValue::Address(a.to_checksum(None)),

        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) => {
            NormalizedValue::Array(vals.into_iter().map(normalize).collect())
        }

        DynSolValue::Tuple(fields) => NormalizedValue::Tuple(
            fields
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), normalize(v)))
                .collect(),
        ),

        DynSolValue::Function(f) => NormalizedValue::Bytes(f.to_vec()),
    }
}
