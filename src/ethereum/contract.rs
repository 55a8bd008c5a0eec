//! Calldata for the reward token contract.
//!
//! Only the two entry points the reconciler needs are encoded here:
//! `canMint(uint256 eventId, uint256 count) returns (uint256)` and
//! `mintGamingAwardForMultiple(uint256 eventId, address[] to)`.

use anyhow::{Result, anyhow};
use ethabi::{ParamType, Token};

use super::{Address, U256};

pub const CAN_MINT: &str = "canMint";
pub const MINT_FOR_MULTIPLE: &str = "mintGamingAwardForMultiple";

pub fn encode_can_mint(event_id: U256, count: U256) -> Vec<u8> {
    let selector = ethabi::short_signature(CAN_MINT, &[ParamType::Uint(256), ParamType::Uint(256)]);
    let mut data = selector.to_vec();
    data.extend(ethabi::encode(&[Token::Uint(event_id), Token::Uint(count)]));
    data
}

pub fn decode_can_mint(output: &[u8]) -> Result<U256> {
    let mut tokens = ethabi::decode(&[ParamType::Uint(256)], output)
        .map_err(|err| anyhow!("Failed to decode canMint output: {err}"))?;
    tokens
        .pop()
        .and_then(Token::into_uint)
        .ok_or_else(|| anyhow!("canMint returned no uint256"))
}

pub fn encode_mint_for_multiple(event_id: U256, recipients: &[Address]) -> Vec<u8> {
    let selector = ethabi::short_signature(
        MINT_FOR_MULTIPLE,
        &[
            ParamType::Uint(256),
            ParamType::Array(Box::new(ParamType::Address)),
        ],
    );
    let addresses = recipients.iter().copied().map(Token::Address).collect();
    let mut data = selector.to_vec();
    data.extend(ethabi::encode(&[
        Token::Uint(event_id),
        Token::Array(addresses),
    ]));
    data
}
