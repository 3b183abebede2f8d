//! Random identifier generation for requests, connections and callback objects.

use rand::RngCore;

/// Generate a 32-character lowercase hex id (128 bits of randomness).
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a short id with a fixed prefix, used for connection ids.
pub fn random_id_with_prefix(prefix: &str) -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}-{}", prefix, hex::encode(bytes))
}
