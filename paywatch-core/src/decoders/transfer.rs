use super::abi::Transfer;
use super::{DecodeError, LogDecoder, expect_topics, position, signature};
use crate::entities::{ChainNetwork, TokenSymbol};
use crate::events::{ChainEvent, TransferEvent};
use crate::payment::token_amount;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

/// Decodes `Transfer` logs of one ERC-20 token contract.
#[derive(Debug, Clone)]
pub struct Erc20TransferDecoder {
    network: ChainNetwork,
    symbol: TokenSymbol,
    decimals: u8,
}

impl Erc20TransferDecoder {
    pub fn new(network: ChainNetwork, symbol: TokenSymbol, decimals: u8) -> Self {
        Self {
            network,
            symbol,
            decimals,
        }
    }
}

impl LogDecoder for Erc20TransferDecoder {
    fn name(&self) -> &'static str {
        "erc20-transfer"
    }

    fn decode(&self, log: &Log) -> Result<ChainEvent, DecodeError> {
        let topic0 = signature(log)?;
        if topic0 != Transfer::SIGNATURE_HASH {
            return Err(DecodeError::UnknownSignature(topic0));
        }
        expect_topics(log, 3)?;
        let position = position(log)?;
        let event = Transfer::decode_log(&log.inner)?.data;
        let amount = token_amount(event.value, self.decimals)?;

        Ok(ChainEvent::Transfer(TransferEvent {
            network: self.network,
            symbol: self.symbol,
            decimals: self.decimals,
            from: event.from,
            to: event.to,
            raw_value: event.value,
            amount,
            position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::scripted::log_at;
    use alloy::primitives::{Address, B256, LogData, U256, address};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const TOKEN: Address = address!("0x55d398326f99059ff775485246999027b3197955");

    fn decoder() -> Erc20TransferDecoder {
        Erc20TransferDecoder::new(ChainNetwork::Bsc, TokenSymbol::Usdt, 18)
    }

    fn transfer_log(value: U256) -> Log {
        let data = Transfer {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value,
        }
        .encode_log_data();
        log_at(TOKEN, data, 120, B256::repeat_byte(0xab), 4)
    }

    #[test]
    fn test_decode_transfer() {
        let raw = U256::from(12_500_000_000_000_000_000u128);
        let event = decoder().decode(&transfer_log(raw)).unwrap();
        let ChainEvent::Transfer(transfer) = event else {
            panic!("expected a transfer");
        };
        assert_eq!(transfer.to, Address::repeat_byte(0x22));
        assert_eq!(transfer.symbol, TokenSymbol::Usdt);
        assert_eq!(transfer.raw_value, raw);
        assert_eq!(transfer.amount, Decimal::from_str("12.5").unwrap());
        assert_eq!(transfer.position.block_number, 120);
        assert_eq!(transfer.position.log_index, 4);
        assert_eq!(transfer.position.contract, TOKEN);
    }

    #[test]
    fn test_rejects_wrong_topic_count() {
        let mut log = transfer_log(U256::from(1u8));
        let topics = log.topics()[..2].to_vec();
        log.inner.data = LogData::new_unchecked(topics, log.inner.data.data.clone());
        assert!(matches!(
            decoder().decode(&log),
            Err(DecodeError::TopicCount {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_rejects_unknown_signature() {
        let mut log = transfer_log(U256::from(1u8));
        let mut topics = log.topics().to_vec();
        topics[0] = B256::repeat_byte(0x01);
        log.inner.data = LogData::new_unchecked(topics, log.inner.data.data.clone());
        assert!(matches!(
            decoder().decode(&log),
            Err(DecodeError::UnknownSignature(_))
        ));
    }

    #[test]
    fn test_rejects_value_out_of_decimal_range() {
        assert!(matches!(
            decoder().decode(&transfer_log(U256::MAX)),
            Err(DecodeError::Amount(_))
        ));
    }

    #[test]
    fn test_rejects_pending_log() {
        let mut log = transfer_log(U256::from(1u8));
        log.transaction_hash = None;
        assert!(matches!(
            decoder().decode(&log),
            Err(DecodeError::MissingMetadata(_))
        ));
    }
}
