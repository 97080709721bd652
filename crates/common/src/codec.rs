//! 值编解码
//!
//! 超过阈值的值使用 gzip 压缩存储，读取时透明解压

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use mdcache_errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// 默认压缩阈值（字节）
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// 压缩配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// 是否启用压缩
    pub enabled: bool,
    /// 压缩阈值，超过该大小的值才压缩
    pub threshold_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl CompressionConfig {
    pub fn enabled(threshold_bytes: usize) -> Self {
        Self {
            enabled: true,
            threshold_bytes,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// 编码一个值，必要时压缩
    pub fn encode(&self, raw: &[u8]) -> AppResult<EncodedValue> {
        if self.enabled && raw.len() > self.threshold_bytes {
            Ok(EncodedValue {
                bytes: compress(raw)?,
                compressed: true,
            })
        } else {
            Ok(EncodedValue {
                bytes: raw.to_vec(),
                compressed: false,
            })
        }
    }
}

/// 已编码的值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

/// 解码一个值
pub fn decode(bytes: &[u8], compressed: bool) -> AppResult<Vec<u8>> {
    if compressed {
        decompress(bytes)
    } else {
        Ok(bytes.to_vec())
    }
}

/// gzip 压缩
pub fn compress(data: &[u8]) -> AppResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| AppError::compression(format!("gzip write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| AppError::compression(format!("gzip finish failed: {}", e)))
}

/// gzip 解压
pub fn decompress(data: &[u8]) -> AppResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AppError::compression(format!("gzip read failed: {}", e)))?;
    Ok(out)
}
