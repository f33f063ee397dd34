//! Content-addressed message identity.
//!
//! A message id is the SHA-256 of `channel|address|body|timestamp`, hex
//! encoded. Re-extracting the same logical event always yields the same id,
//! so stores can ignore duplicate inserts instead of checking for existence
//! first. Collisions are treated as duplicates.

use sha2::{Digest, Sha256};

use crate::models::Channel;

/// Length of an id in hex characters.
pub const ID_LEN: usize = 64;

/// Derive the stable identifier of a message from its content.
///
/// Missing address or body hash as the empty string.
pub fn identify(
    channel: Channel,
    address: Option<&str>,
    body: Option<&str>,
    timestamp: i64,
) -> String {
    let ts = timestamp.to_string();
    let input = [
        channel.as_str(),
        address.unwrap_or_default(),
        body.unwrap_or_default(),
        ts.as_str(),
    ]
    .join("|");
    hex::encode(Sha256::digest(input.as_bytes()))
}
