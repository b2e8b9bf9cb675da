use super::abi::{Deposit, Withdraw};
use super::{DecodeError, LogDecoder, expect_topics, position, signature, u256_to_u64};
use crate::entities::ChainNetwork;
use crate::entities::contract_events::LockEventKind;
use crate::events::{ChainEvent, LockEvent};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

/// Decodes `Deposit` and `Withdraw` logs of the token lock contract.
#[derive(Debug, Clone)]
pub struct TokenLockDecoder {
    network: ChainNetwork,
}

impl TokenLockDecoder {
    pub fn new(network: ChainNetwork) -> Self {
        Self { network }
    }
}

impl LogDecoder for TokenLockDecoder {
    fn name(&self) -> &'static str {
        "token-lock"
    }

    fn decode(&self, log: &Log) -> Result<ChainEvent, DecodeError> {
        let topic0 = signature(log)?;
        let event = if topic0 == Deposit::SIGNATURE_HASH {
            expect_topics(log, 3)?;
            let position = position(log)?;
            let deposit = Deposit::decode_log(&log.inner)?.data;
            LockEvent {
                network: self.network,
                kind: LockEventKind::Deposit,
                user: deposit.user,
                lock_id: u256_to_u64(deposit.lockId, "lock id")?,
                amount: deposit.amount,
                current_balance: deposit.currentBalance,
                timestamp: u256_to_u64(deposit.timestamp, "timestamp")?,
                lock_duration: Some(u256_to_u64(deposit.lockDuration, "lock duration")?),
                position,
            }
        } else if topic0 == Withdraw::SIGNATURE_HASH {
            expect_topics(log, 3)?;
            let position = position(log)?;
            let withdraw = Withdraw::decode_log(&log.inner)?.data;
            LockEvent {
                network: self.network,
                kind: LockEventKind::Withdraw,
                user: withdraw.user,
                lock_id: u256_to_u64(withdraw.lockId, "lock id")?,
                amount: withdraw.amount,
                current_balance: withdraw.currentBalance,
                timestamp: u256_to_u64(withdraw.timestamp, "timestamp")?,
                lock_duration: None,
                position,
            }
        } else {
            return Err(DecodeError::UnknownSignature(topic0));
        };
        Ok(ChainEvent::Lock(event))
    }
}
