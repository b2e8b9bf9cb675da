use super::WalletPoolError;
use alloy::primitives::Address;
use alloy::signers::local::MnemonicBuilder;
use alloy::signers::local::coins_bip39::English;
use sha2::{Digest, Sha256};

/// Highest index allowed for a hardened BIP-32 path component.
const MAX_HARDENED_INDEX: i64 = 0x7fff_ffff;

/// First four bytes of SHA-256, big endian, with the hardened bit cleared.
pub fn hash_to_u32(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff
}

/// Derives deposit addresses from the master mnemonic.
///
/// Wallet `id` lives at
/// `m/44'/60'/{id}'/{hash(wallet_type + id)}/{hash(salt)}`, so the same
/// mnemonic, salt and id always produce the same address.
#[derive(Clone)]
pub struct WalletDeriver {
    mnemonic: String,
    passphrase: String,
    wallet_type: String,
    salt_index: u32,
}

impl std::fmt::Debug for WalletDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletDeriver")
            .field("wallet_type", &self.wallet_type)
            .field("salt_index", &self.salt_index)
            .finish_non_exhaustive()
    }
}

impl WalletDeriver {
    pub fn new(
        mnemonic: impl Into<String>,
        passphrase: impl Into<String>,
        wallet_type: impl Into<String>,
        salt: &str,
    ) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            passphrase: passphrase.into(),
            wallet_type: wallet_type.into(),
            salt_index: hash_to_u32(salt),
        }
    }

    pub fn derivation_path(&self, id: i64) -> Result<String, WalletPoolError> {
        if !(0..=MAX_HARDENED_INDEX).contains(&id) {
            return Err(WalletPoolError::IdOutOfRange(id));
        }
        let account_index = hash_to_u32(&format!("{}{}", self.wallet_type, id));
        Ok(format!(
            "m/44'/60'/{id}'/{account_index}/{}",
            self.salt_index
        ))
    }

    pub fn derive_address(&self, id: i64) -> Result<Address, WalletPoolError> {
        let path = self.derivation_path(id)?;
        let signer = MnemonicBuilder::<English>::default()
            .phrase(self.mnemonic.as_str())
            .password(self.passphrase.as_str())
            .derivation_path(path.as_str())?
            .build()?;
        Ok(signer.address())
    }

    /// Fail early on a bad mnemonic by deriving wallet 0.
    pub fn validate(&self) -> Result<Address, WalletPoolError> {
        self.derive_address(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "test test test test test test test test test test test junk";

    #[test]
    fn test_hash_to_u32() {
        // sha256("test input") starts with 9dfe6f15
        assert_eq!(hash_to_u32("test input"), 0x1dfe_6f15);
    }

    #[test]
    fn test_derivation_path_layout() {
        let deriver = WalletDeriver::new(PHRASE, "", "payment", "salt");
        let path = deriver.derivation_path(7).unwrap();
        let expected = format!(
            "m/44'/60'/7'/{}/{}",
            hash_to_u32("payment7"),
            hash_to_u32("salt")
        );
        assert_eq!(path, expected);
        assert!(matches!(
            deriver.derivation_path(-1),
            Err(WalletPoolError::IdOutOfRange(-1))
        ));
        assert!(matches!(
            deriver.derivation_path(MAX_HARDENED_INDEX + 1),
            Err(WalletPoolError::IdOutOfRange(_))
        ));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let first = WalletDeriver::new(PHRASE, "", "payment", "salt");
        let second = WalletDeriver::new(PHRASE, "", "payment", "salt");
        assert_eq!(
            first.derive_address(3).unwrap(),
            second.derive_address(3).unwrap()
        );
        assert_ne!(
            first.derive_address(3).unwrap(),
            first.derive_address(4).unwrap()
        );

        let salted = WalletDeriver::new(PHRASE, "", "payment", "pepper");
        assert_ne!(
            first.derive_address(3).unwrap(),
            salted.derive_address(3).unwrap()
        );
    }

    #[test]
    fn test_invalid_mnemonic_fails_validation() {
        let deriver = WalletDeriver::new("not a mnemonic", "", "payment", "salt");
        assert!(deriver.validate().is_err());
    }

    #[test]
    fn test_debug_hides_mnemonic() {
        let deriver = WalletDeriver::new(PHRASE, "secret", "payment", "salt");
        let debug = format!("{deriver:?}");
        assert!(!debug.contains("junk"));
        assert!(!debug.contains("secret"));
    }
}
