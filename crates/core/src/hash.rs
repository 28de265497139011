//! SHA-256 checksums for node files and version digests.

use sha2::{Digest, Sha256};
use std::fmt;

/// Algorithm name used as the key in `FileInfo::checksum`.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// A SHA-256 digest represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Compute the SHA-256 digest of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ChecksumHasher {
        ChecksumHasher(Sha256::new())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(crate::Error::Serialization(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|e| crate::Error::Serialization(format!("invalid hex: {e}")))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ChecksumHasher(Sha256);

impl ChecksumHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Checksum {
        Checksum(self.0.finalize().into())
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Checksum::hasher()
    }
}

/// Hex SHA-256 of a string, used for version digests.
pub fn digest_hex(data: impl AsRef<[u8]>) -> String {
    Checksum::compute(data.as_ref()).to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_hex_roundtrip() {
        let sum = Checksum::compute(b"hello world");
        let hex = sum.to_hex();
        assert_eq!(
            hex,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(Checksum::from_hex(&hex).unwrap(), sum);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Checksum::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Checksum::compute(b"hello world"));
    }

    #[test]
    fn test_from_hex_rejects_short_input() {
        assert!(Checksum::from_hex("abcd").is_err());
    }
}
