//! chainingest-evm: EVM event decode rules built on alloy-rs.
//!
//! An [`AbiEventRule`] is created from a human-readable event declaration,
//! derives its `topic0` (keccak256 of the canonical signature), and decodes
//! indexed topics and the ABI-encoded data payload with `DynSolType`.
//! Decoded values are normalized into [`NormalizedValue`].
//!
//! ```rust,ignore
//! let rule = AbiEventRule::new("Transfer(address indexed from, address indexed to, uint256 value)")?;
//! builder.rule(contract, Arc::new(rule));
//! ```

pub mod normalizer;
pub mod rule;
pub mod signature;

pub use normalizer::{normalize, NormalizedValue};
pub use rule::{AbiEvent, AbiEventRule};
pub use signature::{keccak256_hex, EventParam, EventSignature, SignatureError};
