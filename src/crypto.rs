//! Hashing, Merkle trees and transaction signatures

use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use num_bigint::BigUint;
use ripemd::Ripemd160;
use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::{ConsensusError, Result};
use crate::serialization::{serialize_block_header, serialize_unsigned_transaction};
use crate::types::*;

/// SHA256(SHA256(data))
pub fn sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> Address {
    let sha = Sha256::digest(data);
    let digest = Ripemd160::digest(sha);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest);
    address
}

pub fn transaction_hash(tx: &Transaction) -> Hash {
    sha256d(&serialize_unsigned_transaction(tx))
}

pub fn block_hash(block: &Block) -> Hash {
    sha256d(&serialize_block_header(block))
}

/// Interior Merkle node: sha256d(left || right)
pub fn merkle_node(left: &Hash, right: &Hash) -> Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(left);
    engine.input(right);
    sha256d::Hash::from_engine(engine).into_inner()
}

/// Merkle root over `hashes`
///
/// Odd levels duplicate their last element. The root of a single leaf is the
/// leaf itself and the root of an empty list is the zero hash.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return ZERO_HASH;
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => merkle_node(left, right),
                [single] => merkle_node(single, single),
                _ => unreachable!("chunks(2) yields one or two elements"),
            })
            .collect();
    }
    level[0]
}

/// Numeric value of a hash, read as a big-endian unsigned integer
pub fn hash_to_biguint(hash: &Hash) -> BigUint {
    BigUint::from_bytes_be(hash)
}

/// Address owning outputs spendable by `public_key`
pub fn address_of(public_key: &[u8]) -> Address {
    hash160(public_key)
}

/// ECDSA signing and verification over transaction hashes
pub struct Signer {
    secp: Secp256k1<All>,
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    pub fn public_key(&self, secret_key: &SecretKey) -> ByteString {
        PublicKey::from_secret_key(&self.secp, secret_key)
            .serialize()
            .to_vec()
    }

    pub fn address(&self, secret_key: &SecretKey) -> Address {
        address_of(&self.public_key(secret_key))
    }

    /// Sign the hash of `tx` with `secret_key`
    pub fn sign(&self, tx_hash: &Hash, secret_key: &SecretKey) -> Result<Signature> {
        let message = Message::from_digest_slice(tx_hash)
            .map_err(|e| ConsensusError::InvalidSignature(e.to_string()))?;
        let signature = self.secp.sign_ecdsa(&message, secret_key);
        Ok(Signature {
            public_key: self.public_key(secret_key),
            signature: signature.serialize_der().to_vec(),
        })
    }

    /// Sign every input of `tx`, one key per input
    pub fn sign_transaction(&self, tx: &mut Transaction, keys: &[SecretKey]) -> Result<()> {
        if keys.len() != tx.inputs.len() {
            return Err(ConsensusError::InvalidSignature(format!(
                "{} keys for {} inputs",
                keys.len(),
                tx.inputs.len()
            )));
        }
        let tx_hash = tx.hash();
        for (input, key) in tx.inputs.iter_mut().zip(keys) {
            input.signature = self.sign(&tx_hash, key)?;
        }
        Ok(())
    }

    /// Check that `signature` spends an output locked to `address`
    ///
    /// Malformed keys or signatures verify as false.
    pub fn verify(&self, tx_hash: &Hash, signature: &Signature, address: &Address) -> bool {
        if address_of(&signature.public_key) != *address {
            return false;
        }

        let public_key = match PublicKey::from_slice(&signature.public_key) {
            Ok(pk) => pk,
            Err(_) => return false,
        };

        let ecdsa = match EcdsaSignature::from_der(&signature.signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        let message = match Message::from_digest_slice(tx_hash) {
            Ok(msg) => msg,
            Err(_) => return false,
        };

        self.secp.verify_ecdsa(&message, &ecdsa, &public_key).is_ok()
    }
}
