use std::fmt;

use anyhow::{Context, Result};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use super::{ADDRESS_BYTES, Address, keccak256, strip_hex_prefix};

pub const SIGNATURE_BYTES: usize = 65;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),
    #[error("signature must be {SIGNATURE_BYTES} bytes, got {0}")]
    Length(usize),
    #[error("unsupported recovery id {0}")]
    RecoveryId(u8),
    #[error("public key recovery failed: {0}")]
    Recovery(#[from] k256::ecdsa::Error),
}

/// Hash signed by `personal_sign` / `eth_sign` wallets.
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut payload = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    payload.extend_from_slice(message.as_bytes());
    keccak256(&payload)
}

/// Recovers the address that produced `signature` over the personal-message
/// hash of `message`. The trailing recovery byte may be `0/1` or `27/28`.
pub fn recover_personal_signer(message: &str, signature: &str) -> Result<Address, SignatureError> {
    let mut bytes = hex::decode(strip_hex_prefix(signature.trim()))?;
    if bytes.len() != SIGNATURE_BYTES {
        return Err(SignatureError::Length(bytes.len()));
    }
    let last = SIGNATURE_BYTES - 1;
    if bytes[last] > 4 {
        bytes[last] = bytes[last].wrapping_sub(27);
    }
    let recovery_id =
        RecoveryId::from_byte(bytes[last]).ok_or(SignatureError::RecoveryId(bytes[last]))?;
    let signature = Signature::from_slice(&bytes[..last])?;
    let hash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id)?;
    Ok(address_of(&key))
}

pub fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[32 - ADDRESS_BYTES..])
}

/// A locally held secp256k1 key: the faucet funding account or the reward admin.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(private_key.trim()))
            .context("Private key is not valid hex")?;
        let key = SigningKey::from_slice(&bytes).context("Private key is not a valid scalar")?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte digest, returning `(r || s, recovery id)`.
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<([u8; 64], u8)> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash)
            .context("ECDSA signing failed")?;
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());
        Ok((compact, recovery_id.to_byte()))
    }

    /// `personal_sign` compatible signature with a `27/28` trailing byte.
    pub fn sign_personal_message(&self, message: &str) -> Result<String> {
        let (compact, recovery_id) = self.sign_hash(&personal_message_hash(message))?;
        let mut bytes = compact.to_vec();
        bytes.push(recovery_id + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &super::format_address(&self.address))
            .finish_non_exhaustive()
    }
}
