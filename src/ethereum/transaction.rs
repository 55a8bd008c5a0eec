use anyhow::Result;
use rlp::RlpStream;

use super::{Address, Signer, U256, format_hash, keccak256, trim_leading_zeros, uint_to_minimal_bytes};

/// Gas for a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Pre-EIP-1559 transaction, signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    /// keccak256 of `raw`, the id the node reports back
    pub hash: String,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl LegacyTransaction {
    pub fn transfer(nonce: u64, gas_price: U256, to: Address, value: U256) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to,
            value,
            data: Vec::new(),
        }
    }

    /// Digest the sender signs: rlp of the six fields plus `chain_id, 0, 0`.
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak256(&stream.out())
    }

    pub fn sign(&self, signer: &Signer, chain_id: u64) -> Result<SignedTransaction> {
        let (compact, recovery_id) = signer.sign_hash(&self.signing_hash(chain_id))?;
        let v = chain_id * 2 + 35 + u64::from(recovery_id);

        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(&compact[..32]));
        stream.append(&trim_leading_zeros(&compact[32..]));
        let raw = stream.out().to_vec();
        let hash = format_hash(&keccak256(&raw));
        Ok(SignedTransaction { raw, hash })
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&uint_to_minimal_bytes(&self.gas_price));
        stream.append(&self.gas_limit);
        stream.append(&self.to.as_bytes().to_vec());
        stream.append(&uint_to_minimal_bytes(&self.value));
        stream.append(&self.data);
    }
}
