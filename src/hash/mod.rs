// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Content and metadata hashing.
//!
//! Everything in the cache is keyed by BLAKE3: file contents through the
//! size-tiered hasher in [`content`], and composite action fingerprints
//! through [`input_hash`]. BLAKE3 picks its SIMD implementation once at
//! first use behind its own thread-safe gate, so the core carries no
//! dispatch state of its own.

mod content;
mod fingerprint;

pub use content::{hash_bytes, hash_file, metadata_probe};
pub use fingerprint::{input_hash, FileHasher};

use std::fmt;
use std::str::FromStr;

use crate::errors::ParseError;

/// A 32-byte BLAKE3 digest.
///
/// Thin newtype over `[u8; 32]`; the `Display` impl renders lowercase hex
/// for logging and for the on-disk object-store layout.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// The all-zero digest, used as a placeholder before resolution.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for Digest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(ParseError::new(s, "digest must be 64 hex characters"));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char)
                .to_digit(16)
                .ok_or_else(|| ParseError::new(s, "digest contains non-hex character"))?;
            let lo = (chunk[1] as char)
                .to_digit(16)
                .ok_or_else(|| ParseError::new(s, "digest contains non-hex character"))?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_round_trips() {
        let digest = Digest(*blake3::hash(b"round trip").as_bytes());
        let parsed: Digest = digest.to_string().parse().unwrap();
        assert_eq!(parsed, digest);
    }

    #[test]
    fn digest_rejects_bad_hex() {
        assert!("abc".parse::<Digest>().is_err());
        assert!("zz".repeat(32).parse::<Digest>().is_err());
    }
}
