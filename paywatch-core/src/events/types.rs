//! Event type definitions for the chain-to-matcher pipeline.
//!
//! Chain events are decoded once by the poller and carried by value through
//! the channel; the consumer matches on [`ChainEvent`] exhaustively.

use crate::entities::contract_events::{LockEventKind, LockEventRecord, MembershipEventRecord};
use crate::entities::{ChainNetwork, OrderStatus, TokenSymbol};
use crate::store::{StoreError, block_to_db};
use alloy::primitives::{Address, B256, U256};
use rust_decimal::Decimal;

/// Position of a log on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub contract: Address,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

impl LogPosition {
    pub fn tx_hash_hex(&self) -> String {
        format!("{:#x}", self.tx_hash)
    }

    pub fn contract_hex(&self) -> String {
        format!("{:#x}", self.contract)
    }

    fn db_log_index(&self) -> Result<i64, StoreError> {
        i64::try_from(self.log_index)
            .map_err(|_| StoreError::OutOfRange(format!("log index {}", self.log_index)))
    }
}

/// An ERC-20 transfer into or out of any address, on a watched token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub network: ChainNetwork,
    pub symbol: TokenSymbol,
    /// Token decimals, used to round payment thresholds.
    pub decimals: u8,
    pub from: Address,
    pub to: Address,
    pub raw_value: U256,
    /// `raw_value` scaled by the token decimals.
    pub amount: Decimal,
    pub position: LogPosition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub network: ChainNetwork,
    pub kind: LockEventKind,
    pub user: Address,
    pub lock_id: u64,
    pub amount: U256,
    pub current_balance: U256,
    pub timestamp: u64,
    /// Only present on deposits.
    pub lock_duration: Option<u64>,
    pub position: LogPosition,
}

impl LockEvent {
    pub fn to_record(&self) -> Result<LockEventRecord, StoreError> {
        let to_i64 = |value: u64, field: &str| {
            i64::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{field} {value}")))
        };
        Ok(LockEventRecord {
            network: self.network,
            contract_address: self.position.contract_hex(),
            kind: self.kind,
            user_address: format!("{:#x}", self.user),
            lock_id: to_i64(self.lock_id, "lock id")?,
            amount: self.amount.to_string(),
            current_balance: self.current_balance.to_string(),
            event_timestamp: to_i64(self.timestamp, "timestamp")?,
            lock_duration: self
                .lock_duration
                .map(|d| to_i64(d, "lock duration"))
                .transpose()?,
            tx_hash: self.position.tx_hash_hex(),
            log_index: self.position.db_log_index()?,
            block_number: block_to_db(self.position.block_number)?,
        })
    }
}

/// Membership plan bought on chain, encoded as a `uint8` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipDuration {
    OneYear,
    ThreeYears,
}

impl MembershipDuration {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MembershipDuration::OneYear),
            1 => Some(MembershipDuration::ThreeYears),
            _ => None,
        }
    }

    pub fn days(self) -> i32 {
        match self {
            MembershipDuration::OneYear => 365,
            MembershipDuration::ThreeYears => 1095,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub network: ChainNetwork,
    pub user: Address,
    pub order_id: u64,
    pub amount: U256,
    pub duration: MembershipDuration,
    pub position: LogPosition,
}

impl MembershipEvent {
    pub fn to_record(&self) -> Result<MembershipEventRecord, StoreError> {
        Ok(MembershipEventRecord {
            network: self.network,
            contract_address: self.position.contract_hex(),
            user_address: format!("{:#x}", self.user),
            order_id: i64::try_from(self.order_id)
                .map_err(|_| StoreError::OutOfRange(format!("order id {}", self.order_id)))?,
            amount: self.amount.to_string(),
            duration_days: self.duration.days(),
            tx_hash: self.position.tx_hash_hex(),
            log_index: self.position.db_log_index()?,
            block_number: block_to_db(self.position.block_number)?,
        })
    }
}

/// Every event kind the poller can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Transfer(TransferEvent),
    Lock(LockEvent),
    Membership(MembershipEvent),
}

impl ChainEvent {
    pub fn position(&self) -> &LogPosition {
        match self {
            ChainEvent::Transfer(e) => &e.position,
            ChainEvent::Lock(e) => &e.position,
            ChainEvent::Membership(e) => &e.position,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::Transfer(_) => "transfer",
            ChainEvent::Lock(_) => "lock",
            ChainEvent::Membership(_) => "membership",
        }
    }
}

/// Emitted when an order reaches a terminal status.
///
/// Carries the id only; the webhook sender re-reads the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderStatusChanged {
    pub order_id: i64,
    pub status: OrderStatus,
}
