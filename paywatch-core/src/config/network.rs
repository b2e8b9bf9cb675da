use crate::decoders::{
    Erc20TransferDecoder, HandlerRegistry, MembershipDecoder, RegistryError, TokenLockDecoder,
};
use crate::entities::{ChainNetwork, TokenSymbol};
use alloy::primitives::Address;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContract {
    pub symbol: TokenSymbol,
    pub address: Address,
    pub decimals: u8,
}

/// One watched chain and its contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network: ChainNetwork,
    pub rpc_url: Url,
    pub confirmation_depth: u64,
    pub start_block: Option<u64>,
    pub tokens: Vec<TokenContract>,
    pub lock_contract: Option<Address>,
    pub membership_contract: Option<Address>,
}

impl NetworkConfig {
    pub fn token(&self, symbol: TokenSymbol) -> Option<&TokenContract> {
        self.tokens.iter().find(|t| t.symbol == symbol)
    }

    /// Register a decoder for every configured contract.
    pub fn registry(&self) -> Result<HandlerRegistry, RegistryError> {
        let mut builder = HandlerRegistry::builder();
        for token in &self.tokens {
            builder = builder.register(
                token.address,
                Erc20TransferDecoder::new(self.network, token.symbol, token.decimals),
            )?;
        }
        if let Some(address) = self.lock_contract {
            builder = builder.register(address, TokenLockDecoder::new(self.network))?;
        }
        if let Some(address) = self.membership_contract {
            builder = builder.register(address, MembershipDecoder::new(self.network))?;
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bsc() -> NetworkConfig {
        NetworkConfig {
            network: ChainNetwork::Bsc,
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
            confirmation_depth: 0,
            start_block: None,
            tokens: vec![TokenContract {
                symbol: TokenSymbol::Usdt,
                address: Address::repeat_byte(0x01),
                decimals: 18,
            }],
            lock_contract: Some(Address::repeat_byte(0x02)),
            membership_contract: None,
        }
    }

    #[test]
    fn test_registry_covers_all_contracts() {
        let registry = bsc().registry().unwrap();
        assert_eq!(
            registry.addresses(),
            vec![Address::repeat_byte(0x01), Address::repeat_byte(0x02)]
        );
    }

    #[test]
    fn test_registry_rejects_shared_address() {
        let mut config = bsc();
        config.membership_contract = Some(Address::repeat_byte(0x01));
        assert_eq!(
            config.registry().unwrap_err(),
            RegistryError::DuplicateAddress(Address::repeat_byte(0x01))
        );
    }

    #[test]
    fn test_token_lookup() {
        let config = bsc();
        assert_eq!(config.token(TokenSymbol::Usdt).unwrap().decimals, 18);
        assert!(config.token(TokenSymbol::Usdc).is_none());
    }
}
