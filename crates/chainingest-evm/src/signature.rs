//! Human-readable event signatures.
//!
//! Parses declarations such as
//! `Transfer(address indexed from, address indexed to, uint256 value)` and
//! derives the canonical form used for `topic0`:
//!   keccak256("Transfer(address,address,uint256)")
//!   → 0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef

use alloy_core::dyn_abi::DynSolType;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed event signature '{0}'")]
    Malformed(String),

    #[error("unknown type '{ty}' in '{signature}'")]
    UnknownType { ty: String, signature: String },
}

/// One event parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    /// Declared name, or the positional index when unnamed.
    pub name: String,
    pub ty: DynSolType,
    pub indexed: bool,
}

impl EventParam {
    /// Reference types are stored as a keccak hash when indexed, so the
    /// original value cannot be recovered from the topic.
    pub fn is_hashed_in_topic(&self) -> bool {
        self.indexed
            && matches!(
                self.ty,
                DynSolType::String
                    | DynSolType::Bytes
                    | DynSolType::Array(_)
                    | DynSolType::FixedArray(..)
                    | DynSolType::Tuple(_)
            )
    }
}

/// A parsed event declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    pub name: String,
    pub params: Vec<EventParam>,
}

impl EventSignature {
    pub fn parse(signature: &str) -> Result<Self, SignatureError> {
        let malformed = || SignatureError::Malformed(signature.to_string());
        let signature = signature.trim();
        let sig = signature.strip_prefix("event ").unwrap_or(signature).trim();

        let open = sig.find('(').ok_or_else(malformed)?;
        let body = sig[open..]
            .strip_prefix('(')
            .and_then(|s| s.trim_end_matches(';').trim_end().strip_suffix(')'))
            .ok_or_else(malformed)?;
        let name = sig[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed());
        }

        let mut params = Vec::new();
        for (i, decl) in split_top_level(body).ok_or_else(malformed)?.into_iter().enumerate() {
            let mut tokens = decl.split_whitespace();
            let ty_str = tokens.next().ok_or_else(malformed)?;
            let mut indexed = false;
            let mut param_name = None;
            for tok in tokens {
                match tok {
                    "indexed" if !indexed && param_name.is_none() => indexed = true,
                    _ if param_name.is_none() => param_name = Some(tok.to_string()),
                    _ => return Err(malformed()),
                }
            }
            let ty = DynSolType::parse(ty_str).map_err(|_| SignatureError::UnknownType {
                ty: ty_str.to_string(),
                signature: signature.to_string(),
            })?;
            params.push(EventParam {
                name: param_name.unwrap_or_else(|| i.to_string()),
                ty,
                indexed,
            });
        }

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub fn canonical(&self) -> String {
        let types: Vec<String> = self.params.iter().map(|p| p.ty.sol_type_name().to_string()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// `topic0` for this event, `0x`-prefixed lowercase hex.
    pub fn topic0(&self) -> String {
        keccak256_hex(&self.canonical())
    }

    pub fn indexed(&self) -> impl Iterator<Item = &EventParam> {
        self.params.iter().filter(|p| p.indexed)
    }

    pub fn non_indexed(&self) -> impl Iterator<Item = &EventParam> {
        self.params.iter().filter(|p| !p.indexed)
    }
}

/// keccak256 of `input`, `0x`-prefixed.
pub fn keccak256_hex(input: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(input.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// Split on commas that are not nested inside parentheses. `None` on
/// unbalanced parentheses or an empty element.
fn split_top_level(body: &str) -> Option<Vec<&str>> {
    if body.trim().is_empty() {
        return Some(vec![]);
    }
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(body[start..].trim());
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}
