//! Versioned snapshot envelope.
//!
//! ```text
//! v1, v2:  [0x01|0x02][wallet snapshot ...]            whole buffer is the wallet snapshot
//! v3:      [0x03][varint len][config JSON][wallet snapshot ...]
//! ```
//!
//! The varint is unsigned LEB128: 7 bits per byte, least significant group
//! first, bit 7 set on every byte but the last. Older envelopes stay readable;
//! new ones are always written as version 3. For the key-value slot the bytes
//! are carried as standard base64.

use crate::config::WalletConfig;
use crate::error::SnapshotError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value as JsonValue;

pub const LEGACY_VERSIONS: [u8; 2] = [1, 2];
pub const CURRENT_VERSION: u8 = 3;

const MAX_VARINT_BYTES: usize = 10;

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decodes a varint starting at `offset`. Returns the value and the offset of
/// the first byte after it.
pub fn decode_varint(bytes: &[u8], offset: usize) -> Result<(u64, usize), SnapshotError> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let pos = offset + i;
        let byte = *bytes.get(pos).ok_or(SnapshotError::TruncatedVarint(pos))?;
        let bits = u64::from(byte & 0x7f);
        let shift = 7 * i as u32;
        if shift == 63 && bits > 1 {
            return Err(SnapshotError::VarintOverflow);
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok((value, pos + 1));
        }
    }
    Err(SnapshotError::VarintOverflow)
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEnvelope {
    pub version: u8,
    /// Present only for version 3.
    pub config: Option<JsonValue>,
    pub wallet_snapshot: Vec<u8>,
}

impl SnapshotEnvelope {
    /// Writes a version 3 envelope.
    pub fn serialize<C: Serialize>(
        config: &C,
        wallet_snapshot: &[u8],
    ) -> Result<Vec<u8>, SnapshotError> {
        let config_json =
            serde_json::to_vec(config).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(1 + MAX_VARINT_BYTES + config_json.len() + wallet_snapshot.len());
        out.push(CURRENT_VERSION);
        encode_varint(config_json.len() as u64, &mut out);
        out.extend_from_slice(&config_json);
        out.extend_from_slice(wallet_snapshot);
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let version = *bytes.first().ok_or(SnapshotError::Empty)?;
        if LEGACY_VERSIONS.contains(&version) {
            return Ok(Self {
                version,
                config: None,
                wallet_snapshot: bytes.to_vec(),
            });
        }
        if version != CURRENT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let (declared, start) = decode_varint(bytes, 1)?;
        let available = bytes.len() - start;
        let len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= available)
            .ok_or(SnapshotError::ConfigOutOfBounds {
                declared,
                available,
            })?;
        let end = start + len;

        let text = std::str::from_utf8(&bytes[start..end])
            .map_err(|e| SnapshotError::InvalidUtf8(e.to_string()))?;
        let config: JsonValue =
            serde_json::from_str(text).map_err(|e| SnapshotError::InvalidJson(e.to_string()))?;

        Ok(Self {
            version,
            config: Some(config),
            wallet_snapshot: bytes[end..].to_vec(),
        })
    }

    /// Typed view of the stored configuration.
    pub fn wallet_config(&self) -> Result<Option<WalletConfig>, SnapshotError> {
        self.config
            .as_ref()
            .map(|raw| {
                serde_json::from_value(raw.clone())
                    .map_err(|e| SnapshotError::InvalidJson(e.to_string()))
            })
            .transpose()
    }

    pub fn to_storage_string(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn from_storage_string(encoded: &str) -> Result<Self, SnapshotError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SnapshotError::InvalidBase64(e.to_string()))?;
        Self::parse(&bytes)
    }
}
