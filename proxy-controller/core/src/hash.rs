//! Deterministic content hashes of API values.
//!
//! Values are hashed over their protobuf encoding. Maps are encoded as `BTreeMap`s, so equal
//! values always produce equal encodings.

use sha2::{Digest, Sha256};

pub fn hash_of<M: prost::Message>(msg: &M) -> u64 {
    hash_bytes(&msg.encode_to_vec())
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

/// Formats a hash as a store key.
pub fn key_of(hash: u64) -> String {
    format!("{hash:x}")
}
