//! `AbiEventRule`: a [`DecodeRule`] driven by an event signature.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use chainingest_core::{DecodeError, DecodeRule, LogRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::normalizer::{normalize, NormalizedValue};
use crate::signature::{EventParam, EventSignature, SignatureError};

/// The payload produced by [`AbiEventRule`]: the event name and its
/// parameters in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEvent {
    pub event: String,
    pub fields: Vec<(String, NormalizedValue)>,
}

impl AbiEvent {
    pub fn field(&self, name: &str) -> Option<&NormalizedValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// JSON object of the fields, keyed by parameter name.
    pub fn to_json(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(fields)
    }
}

/// Decodes logs of one event declaration.
#[derive(Debug, Clone)]
pub struct AbiEventRule {
    name: String,
    signature: EventSignature,
    topic0: String,
}

impl AbiEventRule {
    /// Build a rule from a human-readable declaration. The rule is named
    /// after the event unless renamed with [`AbiEventRule::named`].
    pub fn new(signature: &str) -> Result<Self, SignatureError> {
        let signature = EventSignature::parse(signature)?;
        Ok(Self {
            name: signature.name.clone(),
            topic0: signature.topic0(),
            signature,
        })
    }

    /// ERC-20 `Transfer(address indexed from, address indexed to, uint256 value)`.
    pub fn erc20_transfer() -> Self {
        let param = |name: &str, ty: DynSolType, indexed: bool| EventParam {
            name: name.to_string(),
            ty,
            indexed,
        };
        let signature = EventSignature {
            name: "Transfer".into(),
            params: vec![
                param("from", DynSolType::Address, true),
                param("to", DynSolType::Address, true),
                param("value", DynSolType::Uint(256), false),
            ],
        };
        Self {
            name: signature.name.clone(),
            topic0: signature.topic0(),
            signature,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn signature(&self) -> &EventSignature {
        &self.signature
    }

    fn decode_topic(param: &EventParam, topic: &str) -> Result<NormalizedValue, DecodeError> {
        let hex_str = topic.strip_prefix("0x").unwrap_or(topic);
        let bytes = hex::decode(hex_str).map_err(|e| DecodeError::InvalidHex(format!("topic '{}': {e}", param.name)))?;
        if bytes.len() != 32 {
            return Err(DecodeError::Malformed(format!(
                "topic '{}' is {} bytes, expected 32",
                param.name,
                bytes.len()
            )));
        }
        if param.is_hashed_in_topic() {
            return Ok(NormalizedValue::Bytes(bytes));
        }
        param
            .ty
            .abi_decode(&bytes)
            .map(normalize)
            .map_err(|e| DecodeError::Malformed(format!("topic '{}': {e}", param.name)))
    }

    fn decode_data(&self, data: &[u8]) -> Result<Vec<NormalizedValue>, DecodeError> {
        let types: Vec<DynSolType> = self.signature.non_indexed().map(|p| p.ty.clone()).collect();
        if types.is_empty() {
            return Ok(vec![]);
        }
        let decoded = DynSolType::Tuple(types)
            .abi_decode_params(data)
            .map_err(|e| DecodeError::Malformed(format!("data: {e}")))?;
        Ok(match decoded {
            DynSolValue::Tuple(vals) => vals.into_iter().map(normalize).collect(),
            other => vec![normalize(other)],
        })
    }
}

impl DecodeRule<AbiEvent> for AbiEventRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic0(&self) -> &str {
        &self.topic0
    }

    fn decode(&self, log: &LogRecord) -> Result<AbiEvent, DecodeError> {
        let expected = self.signature.indexed().count() + 1;
        if log.topics.len() != expected {
            return Err(DecodeError::TopicCount {
                expected,
                got: log.topics.len(),
            });
        }

        let mut indexed = Vec::with_capacity(expected - 1);
        for (param, topic) in self.signature.indexed().zip(&log.topics[1..]) {
            indexed.push(Self::decode_topic(param, topic)?);
        }
        let mut data = self.decode_data(&log.data)?.into_iter();
        let mut indexed = indexed.into_iter();

        let mut fields = Vec::with_capacity(self.signature.params.len());
        for param in &self.signature.params {
            let value = if param.indexed { indexed.next() } else { data.next() };
            let value = value.ok_or_else(|| DecodeError::Malformed(format!("no value for '{}'", param.name)))?;
            fields.push((param.name.clone(), value));
        }

        Ok(AbiEvent {
            event: self.signature.name.clone(),
            fields,
        })
    }
}
