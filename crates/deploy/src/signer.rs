//! Local signer and EIP-155 legacy transaction encoding.

use alloy_core::{
    primitives::{Address, Bytes, TxHash, U256, keccak256},
    rlp::{self, Header},
};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

/// Private key held in memory, used to sign every transaction of the run.
#[derive(Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.inner.address())
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Create a signer from a `0x`-prefixed, 32-byte hex private key.
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, anyhow::Error> {
        let hex_part = private_key_hex
            .strip_prefix("0x")
            .context("Private key must be 0x-prefixed")?;
        if hex_part.len() != 64 {
            anyhow::bail!("Private key must be exactly 32 bytes");
        }

        let private_key_bytes = hex::decode(hex_part).context("Private key is not valid hex")?;
        let inner = PrivateKeySigner::from_slice(&private_key_bytes)
            .context("Invalid secp256k1 private key")?;

        Ok(Self { inner })
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign `tx` and return the raw transaction bytes with their hash.
    pub fn sign_transaction(
        &self,
        tx: &LegacyTransaction,
    ) -> Result<(Bytes, TxHash), anyhow::Error> {
        let signature = self
            .inner
            .sign_hash_sync(&tx.signing_hash())
            .context("Failed to sign transaction")?;
        // EIP-155: v = {0,1} + chain_id * 2 + 35.
        let v = u64::from(signature.v()) + 35 + tx.chain_id * 2;

        let mut fields = tx.payload_fields();
        fields.push(rlp::encode(v));
        fields.push(rlp::encode(signature.r()));
        fields.push(rlp::encode(signature.s()));

        let raw = encode_list(&fields);
        let hash = keccak256(&raw);
        Ok((Bytes::from(raw), hash))
    }
}

/// Pre-EIP-1559 transaction, replay-protected with the chain id (EIP-155).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

impl LegacyTransaction {
    /// Hash signed by the sender: `keccak(rlp([..fields, chain_id, 0, 0]))`.
    pub fn signing_hash(&self) -> TxHash {
        let mut fields = self.payload_fields();
        fields.push(rlp::encode(self.chain_id));
        fields.push(rlp::encode(0u8));
        fields.push(rlp::encode(0u8));
        keccak256(encode_list(&fields))
    }

    fn payload_fields(&self) -> Vec<Vec<u8>> {
        let to = match &self.to {
            Some(to) => rlp::encode(to),
            None => vec![rlp::EMPTY_STRING_CODE],
        };

        vec![
            rlp::encode(self.nonce),
            rlp::encode(self.gas_price),
            rlp::encode(self.gas_limit),
            to,
            rlp::encode(self.value),
            rlp::encode(&self.input),
        ]
    }
}

fn encode_list(fields: &[Vec<u8>]) -> Vec<u8> {
    let payload_length = fields.iter().map(Vec::len).sum();
    let header = Header {
        list: true,
        payload_length,
    };

    let mut out = Vec::with_capacity(header.length() + payload_length);
    header.encode(&mut out);
    for field in fields {
        out.extend_from_slice(field);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{address, b256};

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn eip155_example() -> LegacyTransaction {
        LegacyTransaction {
            chain_id: 1,
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(address!("3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u128),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_address_from_private_key() {
        let signer = LocalSigner::from_private_key(ANVIL_KEY).unwrap();
        assert_eq!(signer.address(), address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(LocalSigner::from_private_key(&ANVIL_KEY[2..]).is_err());
        assert!(LocalSigner::from_private_key("0x1234").is_err());
        assert!(LocalSigner::from_private_key(&format!("0x{}", "zz".repeat(32))).is_err());
        assert!(LocalSigner::from_private_key(&format!("0x{}", "00".repeat(32))).is_err());
    }

    #[test]
    fn test_eip155_signing_hash() {
        assert_eq!(
            eip155_example().signing_hash(),
            b256!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53")
        );
    }

    #[test]
    fn test_eip155_signed_transaction() {
        let signer = LocalSigner::from_private_key(&format!("0x{}", "46".repeat(32))).unwrap();
        let (raw, hash) = signer.sign_transaction(&eip155_example()).unwrap();

        let expected = hex::decode(
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83",
        )
        .unwrap();
        assert_eq!(&raw[..], expected.as_slice());
        assert_eq!(hash, keccak256(&expected));
    }

    #[test]
    fn test_contract_creation_uses_empty_to() {
        let tx = LegacyTransaction {
            to: None,
            input: Bytes::from(vec![0x60, 0x80]),
            ..eip155_example()
        };
        let fields = tx.payload_fields();
        assert_eq!(fields[3], vec![0x80]);
        assert_eq!(fields[5], vec![0x82, 0x60, 0x80]);
    }
}
