use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// All EVM networks watched by paywatch
pub enum Network {
    #[serde(rename = "BSC")]
    Bsc,
    #[serde(rename = "AVAX C-Chain")]
    AvaxCChain,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Bsc => write!(f, "BSC"),
            Network::AvaxCChain => write!(f, "AVAX C-Chain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Tokens accepted as payment
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    Usdt,
    Usdc,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Usdt => write!(f, "USDT"),
            Token::Usdc => write!(f, "USDC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_wire_names() {
        assert_eq!(serde_json::to_string(&Network::Bsc).unwrap(), "\"BSC\"");
        let parsed: Network = serde_json::from_str("\"AVAX C-Chain\"").unwrap();
        assert_eq!(parsed, Network::AvaxCChain);
        assert_eq!(Network::AvaxCChain.to_string(), "AVAX C-Chain");
    }

    #[test]
    fn test_token_wire_names() {
        let parsed: Token = serde_json::from_str("\"USDT\"").unwrap();
        assert_eq!(parsed, Token::Usdt);
        assert!(serde_json::from_str::<Token>("\"usdt\"").is_err());
    }
}
