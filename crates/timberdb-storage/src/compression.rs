//! Payload compression envelope.
//!
//! Payloads at rest carry a one-byte algorithm tag. Tag zero means the raw
//! payload follows directly; any other tag is followed by a little-endian
//! `u32` holding the original length and then the compressed bytes.
//! Compression is a pure storage concern: callers of the WAL store never see
//! the envelope.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use timberdb_core::{CompressionConfig, TimberError, TimberResult};

/// Compression algorithm tag stored in the envelope's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionAlgorithm {
    /// No compression; raw bytes follow the tag.
    None = 0,
    /// DEFLATE via gzip.
    Gzip = 1,
    /// Zstandard (the default).
    Zstd = 2,
    /// Snappy (no level knob).
    Snappy = 3,
}

impl CompressionAlgorithm {
    /// Decodes an envelope tag.
    ///
    /// # Errors
    ///
    /// Returns `Deserialization` for an unknown tag byte.
    pub fn from_tag(value: u8) -> TimberResult<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Zstd),
            3 => Ok(Self::Snappy),
            other => Err(TimberError::Deserialization(format!(
                "unknown compression tag: {other}"
            ))),
        }
    }

    /// Parses a configuration algorithm name.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unrecognized name.
    pub fn from_name(name: &str) -> TimberResult<Self> {
        match name {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "snappy" => Ok(Self::Snappy),
            other => Err(TimberError::validation(format!(
                "unknown compression algorithm `{other}`"
            ))),
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Snappy => "snappy",
        }
    }
}

/// Configured codec applying the envelope on write and stripping it on read.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    algorithm: CompressionAlgorithm,
    min_size: usize,
    level: i32,
}

impl PayloadCodec {
    /// Builds a codec from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the configured algorithm name is unknown.
    pub fn from_config(config: &CompressionConfig) -> TimberResult<Self> {
        Ok(Self {
            algorithm: CompressionAlgorithm::from_name(&config.algorithm)?,
            min_size: config.min_size,
            level: config.level,
        })
    }

    /// Codec that never compresses; used by in-memory stores and tests.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            min_size: usize::MAX,
            level: 0,
        }
    }

    /// Wraps payload bytes in the storage envelope, compressing when the
    /// payload meets the size threshold.
    ///
    /// Incompressible payloads fall back to the raw envelope so the stored
    /// form never exceeds original size by more than the tag byte.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the compressor itself fails.
    pub fn encode(&self, payload: &[u8]) -> TimberResult<Bytes> {
        if self.algorithm == CompressionAlgorithm::None || payload.len() < self.min_size {
            return Ok(raw_envelope(payload));
        }

        let compressed = match self.algorithm {
            CompressionAlgorithm::None => unreachable!("handled above"),
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(self.level.clamp(0, 9) as u32),
                );
                encoder
                    .write_all(payload)
                    .and_then(|()| encoder.finish())
                    .map_err(|e| TimberError::storage("gzip compress", e.to_string()))?
            }
            CompressionAlgorithm::Zstd => zstd::encode_all(payload, self.level)
                .map_err(|e| TimberError::storage("zstd compress", e.to_string()))?,
            CompressionAlgorithm::Snappy => snap::raw::Encoder::new()
                .compress_vec(payload)
                .map_err(|e| TimberError::storage("snappy compress", e.to_string()))?,
        };

        // 5-byte envelope header; raw fallback when compression does not pay.
        if compressed.len() + 5 >= payload.len() + 1 {
            return Ok(raw_envelope(payload));
        }

        let original_len = u32::try_from(payload.len()).map_err(|_| {
            TimberError::validation(format!("payload of {} bytes exceeds 4 GiB", payload.len()))
        })?;

        let mut out = Vec::with_capacity(compressed.len() + 5);
        out.push(self.algorithm as u8);
        out.write_u32::<LittleEndian>(original_len)
            .map_err(|e| TimberError::storage("envelope header", e.to_string()))?;
        out.extend_from_slice(&compressed);
        Ok(Bytes::from(out))
    }

    /// Strips the envelope, decompressing when needed.
    ///
    /// # Errors
    ///
    /// Returns `Deserialization` on a truncated envelope, an unknown tag, or
    /// an original-length mismatch.
    pub fn decode(data: &[u8]) -> TimberResult<Bytes> {
        let Some((&tag, rest)) = data.split_first() else {
            return Err(TimberError::Deserialization(
                "empty payload envelope".to_string(),
            ));
        };

        let algorithm = CompressionAlgorithm::from_tag(tag)?;
        if algorithm == CompressionAlgorithm::None {
            return Ok(Bytes::copy_from_slice(rest));
        }

        let mut cursor = std::io::Cursor::new(rest);
        let original_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| TimberError::Deserialization(format!("envelope header: {e}")))?
            as usize;
        let body = &rest[4..];

        let decompressed = match algorithm {
            CompressionAlgorithm::None => unreachable!("handled above"),
            CompressionAlgorithm::Gzip => {
                let mut decoder = GzDecoder::new(body);
                let mut out = Vec::with_capacity(original_len);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| TimberError::Deserialization(format!("gzip: {e}")))?;
                out
            }
            CompressionAlgorithm::Zstd => zstd::decode_all(body)
                .map_err(|e| TimberError::Deserialization(format!("zstd: {e}")))?,
            CompressionAlgorithm::Snappy => snap::raw::Decoder::new()
                .decompress_vec(body)
                .map_err(|e| TimberError::Deserialization(format!("snappy: {e}")))?,
        };

        if decompressed.len() != original_len {
            return Err(TimberError::Deserialization(format!(
                "payload length mismatch: envelope says {original_len}, got {}",
                decompressed.len()
            )));
        }

        Ok(Bytes::from(decompressed))
    }
}

fn raw_envelope(payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(CompressionAlgorithm::None as u8);
    out.extend_from_slice(payload);
    Bytes::from(out)
}
