//! Ethereum primitives used by the auth and disbursement flows.
//!
//! - Address parsing and lowercase normalization
//! - Personal-message signature recovery (`personal_sign`)
//! - Local key signing and legacy EIP-155 transactions
//! - Calldata for the reward token contract

pub mod contract;
pub mod signature;
pub mod transaction;

pub use ethabi::{Address, Uint as U256};
pub use signature::{Signer, recover_personal_signer};
pub use transaction::{LegacyTransaction, SignedTransaction};

use anyhow::{Result, anyhow};

pub const ADDRESS_BYTES: usize = 20;
pub const ADDRESS_HEX_LEN: usize = 2 + ADDRESS_BYTES * 2;

/// Wei per gwei.
pub const GWEI: u64 = 1_000_000_000;

/// Checks the `0x` + 40 hex digits shape, in any letter case.
pub fn is_valid_address(value: &str) -> bool {
    value.len() == ADDRESS_HEX_LEN
        && value.starts_with("0x")
        && value[2..].bytes().all(|byte| byte.is_ascii_hexdigit())
}

/// Lowercase form used as the storage key for users and challenges.
pub fn normalize_address(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

pub fn parse_address(value: &str) -> Result<Address> {
    let trimmed = value.trim();
    let bytes = hex::decode(strip_hex_prefix(trimmed))
        .map_err(|err| anyhow!("Failed to decode address {trimmed} as hex: {err}"))?;
    if bytes.len() != ADDRESS_BYTES {
        return Err(anyhow!(
            "Address must be {ADDRESS_BYTES} bytes, got {}",
            bytes.len()
        ));
    }
    Ok(Address::from_slice(&bytes))
}

pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

pub fn format_hash(hash: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(hash))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    keccak_hash::keccak(data).0
}

/// Big-endian bytes with leading zeros stripped, as RLP expects for integers.
pub fn uint_to_minimal_bytes(value: &U256) -> Vec<u8> {
    let mut buffer = [0u8; 32];
    value.to_big_endian(&mut buffer);
    trim_leading_zeros(&buffer)
}

pub(crate) fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes
        .iter()
        .position(|byte| *byte != 0)
        .unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

pub fn parse_quantity(value: &str) -> Result<U256> {
    let digits = strip_hex_prefix(value.trim());
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|err| anyhow!("Failed to parse quantity {value}: {err:?}"))
}

pub fn format_quantity(value: &U256) -> String {
    format!("0x{value:x}")
}

pub(crate) fn strip_hex_prefix(value: &str) -> &str {
    if value.starts_with("0x") || value.starts_with("0X") {
        &value[2..]
    } else {
        value
    }
}
