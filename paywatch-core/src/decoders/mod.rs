//! Log decoders.
//!
//! Each watched contract is registered with one [`LogDecoder`] in a
//! [`HandlerRegistry`]. Decoders are pure: they never touch the store or the
//! network, and a failure only affects the log being decoded.

pub mod abi;
pub mod lock;
pub mod membership;
pub mod registry;
pub mod transfer;

pub use lock::TokenLockDecoder;
pub use membership::MembershipDecoder;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, RegistryError};
pub use transfer::Erc20TransferDecoder;

use crate::events::{ChainEvent, LogPosition};
use crate::payment::AmountError;
use alloy::primitives::{B256, U256};
use alloy::rpc::types::Log;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingSignature,

    #[error("unknown event signature {0}")]
    UnknownSignature(B256),

    #[error("expected {expected} topics, got {actual}")]
    TopicCount { expected: usize, actual: usize },

    #[error("log is missing {0}")]
    MissingMetadata(&'static str),

    #[error("{field} does not fit in 64 bits: {value}")]
    Overflow { field: &'static str, value: U256 },

    #[error("invalid membership duration code {0}")]
    InvalidDuration(u8),

    #[error("amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("ABI decode error: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

/// Turns a raw log from one contract into a typed event.
pub trait LogDecoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn decode(&self, log: &Log) -> Result<ChainEvent, DecodeError>;
}

/// Read the first topic, the event signature hash.
pub(crate) fn signature(log: &Log) -> Result<B256, DecodeError> {
    log.topics()
        .first()
        .copied()
        .ok_or(DecodeError::MissingSignature)
}

pub(crate) fn expect_topics(log: &Log, expected: usize) -> Result<(), DecodeError> {
    let actual = log.topics().len();
    if actual != expected {
        return Err(DecodeError::TopicCount { expected, actual });
    }
    Ok(())
}

/// Block, transaction and index of a log. Pending logs have none of these
/// and cannot be processed.
pub(crate) fn position(log: &Log) -> Result<LogPosition, DecodeError> {
    Ok(LogPosition {
        contract: log.address(),
        tx_hash: log
            .transaction_hash
            .ok_or(DecodeError::MissingMetadata("transaction hash"))?,
        log_index: log
            .log_index
            .ok_or(DecodeError::MissingMetadata("log index"))?,
        block_number: log
            .block_number
            .ok_or(DecodeError::MissingMetadata("block number"))?,
    })
}

pub(crate) fn u256_to_u64(value: U256, field: &'static str) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::Overflow { field, value })
}

/// Decode a numeric id stored in a topic. The zero word is id 0.
pub(crate) fn topic_to_u64(topic: &B256, field: &'static str) -> Result<u64, DecodeError> {
    u256_to_u64(U256::from_be_bytes(topic.0), field)
}
