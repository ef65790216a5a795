// src/codec.rs

//! Counter values are stored the way Redis stores integers: ASCII decimal text.
//! That keeps them compatible with the store's native INCR family.

use crate::error::{KvError, Result};

/// Encodes an integer as decimal text
pub fn encode_i64(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decodes decimal text stored under `key`
///
/// Anything that is not a plain base-10 i64 is a parse error; nothing is coerced to zero.
pub fn decode_i64(key: &str, bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| KvError::Parse {
            key: key.to_string(),
            value: String::from_utf8_lossy(bytes).into_owned(),
        })
}
