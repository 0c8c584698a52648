// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The 1-byte tag-prefixed value format shared by `agent_metadata.value`
//! (§6 "Value format"): `0x00` = raw, `0x01` = zstd. Readers must
//! tag-dispatch; this module is the single place that does.

use crate::errors::{IndexerError, Result};

pub const TAG_RAW: u8 = 0x00;
pub const TAG_ZSTD: u8 = 0x01;

/// Fields larger than this are zstd-compressed before storage (§4.B
/// "All other fields pass through ZSTD when larger than 256 bytes").
pub const ZSTD_THRESHOLD_BYTES: usize = 256;

/// Tag-prefixes `bytes`, compressing with zstd when it exceeds the
/// threshold. Standard URI fields (§4.B) always pass `force_raw = true` so
/// they stay uncompressed for fast reads regardless of size.
pub fn encode(bytes: &[u8], force_raw: bool) -> Result<Vec<u8>> {
    if force_raw || bytes.len() <= ZSTD_THRESHOLD_BYTES {
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(TAG_RAW);
        out.extend_from_slice(bytes);
        Ok(out)
    } else {
        let compressed =
            zstd::encode_all(bytes, 0).map_err(|e| IndexerError::Store(e.to_string()))?;
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(TAG_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(out)
    }
}

/// Decodes a tag-prefixed value back to its raw bytes.
pub fn decode(stored: &[u8]) -> Result<Vec<u8>> {
    match stored.split_first() {
        None => Ok(Vec::new()),
        Some((&TAG_RAW, rest)) => Ok(rest.to_vec()),
        Some((&TAG_ZSTD, rest)) => {
            zstd::decode_all(rest).map_err(|e| IndexerError::Store(e.to_string()))
        }
        Some((tag, _)) => Err(IndexerError::Decode(format!("unknown value tag {tag:#x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_value_stays_raw() {
        let encoded = encode(b"hello", false).unwrap();
        assert_eq!(encoded[0], TAG_RAW);
        assert_eq!(decode(&encoded).unwrap(), b"hello");
    }

    #[test]
    fn large_value_is_compressed() {
        let payload = vec![b'x'; ZSTD_THRESHOLD_BYTES + 1];
        let encoded = encode(&payload, false).unwrap();
        assert_eq!(encoded[0], TAG_ZSTD);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn force_raw_skips_compression_regardless_of_size() {
        let payload = vec![b'y'; ZSTD_THRESHOLD_BYTES * 4];
        let encoded = encode(&payload, true).unwrap();
        assert_eq!(encoded[0], TAG_RAW);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bad = vec![0xffu8, 1, 2, 3];
        assert!(decode(&bad).is_err());
    }
}
