//! Value encoding: JSON, optionally gzipped.

use crate::error::{CacheError, CacheResult};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `bytes` start with the gzip magic number.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Serialize `value` to JSON, gzipping it when `compress` is set.
pub fn encode<T: Serialize + ?Sized>(value: &T, compress: bool) -> CacheResult<Vec<u8>> {
    let json = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    if !compress {
        return Ok(json);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Compression(e.to_string()))
}

/// Decode bytes produced by [`encode`]. Gzip is detected by magic number.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    if is_gzip(bytes) {
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| CacheError::Compression(e.to_string()))?;
        return parse(&json);
    }
    parse(bytes)
}

fn parse<T: DeserializeOwned>(json: &[u8]) -> CacheResult<T> {
    serde_json::from_slice(json).map_err(|e| CacheError::Deserialization(e.to_string()))
}
