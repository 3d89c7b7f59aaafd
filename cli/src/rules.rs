//! YAML stream configuration: which contracts and events to ingest.
//!
//! ```yaml
//! stream_id: usdc-transfers
//! decode_errors: skip
//! rules:
//!   - address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
//!     events:
//!       - "Transfer(address indexed from, address indexed to, uint256 value)"
//!       - signature: "Approval(address indexed owner, address indexed spender, uint256 value)"
//!         name: approvals
//! logging:
//!   level: info
//!   components:
//!     chainingest-rpc: debug
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use chainingest_core::ErrorMode;
use chainingest_evm::AbiEventRule;
use serde::Deserialize;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamFile {
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub decode_errors: Option<ErrorMode>,
    #[serde(default)]
    pub rules: Vec<ContractRules>,
    #[serde(default)]
    pub logging: Option<LogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractRules {
    pub address: String,
    pub events: Vec<EventEntry>,
}

/// An event declaration, optionally renamed (the name is the record
/// collection).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventEntry {
    Signature(String),
    Named { signature: String, name: String },
}

impl StreamFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid stream file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Build `(address, rule)` pairs for the pipeline builder.
    pub fn build_rules(&self) -> Result<Vec<(String, AbiEventRule)>> {
        let mut out = Vec::new();
        for contract in &self.rules {
            if !is_address(&contract.address) {
                bail!("'{}' is not a contract address", contract.address);
            }
            if contract.events.is_empty() {
                bail!("no events listed for {}", contract.address);
            }
            for entry in &contract.events {
                let rule = match entry {
                    EventEntry::Signature(sig) => AbiEventRule::new(sig)?,
                    EventEntry::Named { signature, name } => AbiEventRule::new(signature)?.named(name),
                };
                out.push((contract.address.clone(), rule));
            }
        }
        Ok(out)
    }
}

/// `0x` followed by 40 hex digits.
pub fn is_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}
