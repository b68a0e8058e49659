use crate::error::{DocShelfError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ZSTD_LEVEL: i32 = 3;

/// Lossless compressor applied to binary field payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Store the encoded bytes as they are.
    #[default]
    None,
    /// LZ4 block format with the uncompressed size prepended.
    Lz4,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Compression::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| DocShelfError::Compression(e.to_string())),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| DocShelfError::Compression(e.to_string())),
            Compression::Zstd => {
                zstd::decode_all(data).map_err(|e| DocShelfError::Compression(e.to_string()))
            }
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = DocShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(DocShelfError::Config(format!("unknown compression '{other}'"))),
        }
    }
}
