use super::abi::MembershipPurchased;
use super::{DecodeError, LogDecoder, expect_topics, position, signature, topic_to_u64};
use crate::entities::ChainNetwork;
use crate::events::{ChainEvent, MembershipDuration, MembershipEvent};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

/// Decodes `MembershipPurchased` logs.
#[derive(Debug, Clone)]
pub struct MembershipDecoder {
    network: ChainNetwork,
}

impl MembershipDecoder {
    pub fn new(network: ChainNetwork) -> Self {
        Self { network }
    }
}

impl LogDecoder for MembershipDecoder {
    fn name(&self) -> &'static str {
        "membership"
    }

    fn decode(&self, log: &Log) -> Result<ChainEvent, DecodeError> {
        let topic0 = signature(log)?;
        if topic0 != MembershipPurchased::SIGNATURE_HASH {
            return Err(DecodeError::UnknownSignature(topic0));
        }
        expect_topics(log, 3)?;
        // Checked against the raw word so an oversized id is reported rather
        // than truncated.
        let order_id = topic_to_u64(&log.topics()[2], "order id")?;
        let position = position(log)?;
        let event = MembershipPurchased::decode_log(&log.inner)?.data;
        let duration = MembershipDuration::from_code(event.duration)
            .ok_or(DecodeError::InvalidDuration(event.duration))?;

        Ok(ChainEvent::Membership(MembershipEvent {
            network: self.network,
            user: event.user,
            order_id,
            amount: event.amount,
            duration,
            position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::scripted::log_at;
    use alloy::primitives::{Address, B256, LogData, U256};

    fn membership_log(order_id: u64, duration: u8) -> Log {
        let data = MembershipPurchased {
            user: Address::repeat_byte(0x44),
            orderId: order_id,
            amount: U256::from(99_000_000u64),
            duration,
        }
        .encode_log_data();
        log_at(Address::repeat_byte(0x88), data, 77, B256::repeat_byte(0x02), 1)
    }

    #[test]
    fn test_decode_membership() {
        let ChainEvent::Membership(event) = MembershipDecoder::new(ChainNetwork::AvaxCChain)
            .decode(&membership_log(42, 1))
            .unwrap()
        else {
            panic!("expected a membership event");
        };
        assert_eq!(event.order_id, 42);
        assert_eq!(event.duration, MembershipDuration::ThreeYears);
        assert_eq!(event.duration.days(), 1095);
        assert_eq!(event.network, ChainNetwork::AvaxCChain);
    }

    #[test]
    fn test_rejects_unknown_duration() {
        assert!(matches!(
            MembershipDecoder::new(ChainNetwork::Bsc).decode(&membership_log(1, 2)),
            Err(DecodeError::InvalidDuration(2))
        ));
    }

    #[test]
    fn test_rejects_oversized_order_id() {
        let mut log = membership_log(1, 0);
        let mut topics = log.topics().to_vec();
        topics[2] = B256::from(U256::MAX);
        log.inner.data = LogData::new_unchecked(topics, log.inner.data.data.clone());
        assert!(matches!(
            MembershipDecoder::new(ChainNetwork::Bsc).decode(&log),
            Err(DecodeError::Overflow {
                field: "order id",
                ..
            })
        ));
    }
}
