//! Filter/decode stage.
//!
//! Logs are routed to a [`DecodeRule`] by their `(address, topic0)` pair.
//! Rules are pure: a rule sees exactly one log and either produces a typed
//! payload or a [`DecodeError`]. The stage never reorders its input.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, IngestError};
use crate::types::{DecodedEvent, LogFilter, LogRecord};

/// Decodes one kind of log into a typed payload `E`.
///
/// Implementations must be `Send + Sync` so a registry can be shared with
/// the pipeline task.
pub trait DecodeRule<E>: Send + Sync {
    /// Human-readable rule name; used as the record collection name.
    fn name(&self) -> &str;

    /// The `topic0` value (event signature hash) this rule decodes.
    fn topic0(&self) -> &str;

    fn decode(&self, log: &LogRecord) -> Result<E, DecodeError>;
}

/// How the stage reacts to a matched log that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Record the failure in [`DecodeOutcome::skipped`] and continue.
    Skip,
    /// Fail the whole batch on the first error.
    #[default]
    Abort,
}

impl std::str::FromStr for ErrorMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(IngestError::Config(format!("unknown decode error mode '{other}'"))),
        }
    }
}

/// Output of one decode pass.
#[derive(Debug)]
pub struct DecodeOutcome<E> {
    /// Decoded events, in input order.
    pub events: Vec<DecodedEvent<E>>,
    /// Matched logs that failed to decode (only populated in `Skip` mode).
    pub skipped: Vec<IngestError>,
    /// Logs that matched no rule.
    pub unmatched: usize,
}

impl<E> Default for DecodeOutcome<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            skipped: Vec::new(),
            unmatched: 0,
        }
    }
}

/// Rules keyed by lowercase `(address, topic0)`.
pub struct RuleRegistry<E> {
    rules: HashMap<(String, String), Arc<dyn DecodeRule<E>>>,
}

impl<E> Default for RuleRegistry<E> {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }
}

impl<E> RuleRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `rule` to logs emitted by `address` with the rule's topic0.
    ///
    /// Returns an error if another rule is already bound to the same pair.
    pub fn register(
        &mut self,
        address: &str,
        rule: Arc<dyn DecodeRule<E>>,
    ) -> Result<(), IngestError> {
        let key = (address.to_ascii_lowercase(), rule.topic0().to_ascii_lowercase());
        if let Some(existing) = self.rules.get(&key) {
            return Err(IngestError::Config(format!(
                "rule '{}' conflicts with '{}' for {} / {}",
                rule.name(),
                existing.name(),
                key.0,
                key.1
            )));
        }
        self.rules.insert(key, rule);
        Ok(())
    }

    pub fn get(&self, address: &str, topic0: &str) -> Option<&Arc<dyn DecodeRule<E>>> {
        self.rules
            .get(&(address.to_ascii_lowercase(), topic0.to_ascii_lowercase()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of all registered rules, sorted and deduplicated.
    pub fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.values().map(|r| r.name().to_string()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// The union of all rules as a server-side log filter.
    pub fn log_filter(&self) -> LogFilter {
        let mut filter = LogFilter::default();
        let mut keys: Vec<&(String, String)> = self.rules.keys().collect();
        keys.sort();
        for (address, topic0) in keys {
            if !filter.addresses.contains(address) {
                filter.addresses.push(address.clone());
            }
            if !filter.topic0_values.contains(topic0) {
                filter.topic0_values.push(topic0.clone());
            }
        }
        filter
    }
}

/// Decode `logs` against `registry`.
///
/// Logs must already be in ascending `(block, log_index)` order; the output
/// keeps that order.
pub fn decode<'a, E>(
    logs: impl IntoIterator<Item = &'a LogRecord>,
    registry: &RuleRegistry<E>,
    mode: ErrorMode,
) -> Result<DecodeOutcome<E>, IngestError> {
    let mut out = DecodeOutcome::default();

    for log in logs {
        let Some(rule) = log.topic0().and_then(|t| registry.get(&log.address, t)) else {
            out.unmatched += 1;
            continue;
        };

        match rule.decode(log) {
            Ok(payload) => out.events.push(DecodedEvent {
                block: log.block.clone(),
                tx_hash: log.tx_hash.clone(),
                address: log.address.clone(),
                log_index: log.log_index,
                rule: rule.name().to_string(),
                payload,
            }),
            Err(e) => {
                let err = IngestError::Decode {
                    rule: rule.name().to_string(),
                    block_number: log.block.number,
                    log_index: log.log_index,
                    reason: e.to_string(),
                };
                match mode {
                    ErrorMode::Skip => {
                        tracing::warn!(error = %err, tx = %log.tx_hash, "skipping undecodable log");
                        out.skipped.push(err);
                    }
                    ErrorMode::Abort => return Err(err),
                }
            }
        }
    }

    Ok(out)
}
