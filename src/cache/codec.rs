// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Binary codec for `entries.bin`.
//!
//! Layout: magic `"BCA1"`, format version (u32 LE), entry count (u64 LE),
//! then one frame per entry. A frame is a sentinel `"ENT0"`, the body
//! length (u32 LE), and the entry's canonical serialization followed by its
//! 32-byte signature. All integers are little-endian and all strings are
//! length-prefixed, so encoding is byte-deterministic.
//!
//! The per-entry sentinel exists so damage stays local: a corrupt frame is
//! skipped by scanning forward to the next sentinel, and a truncated tail
//! is dropped. Either way the surviving entries load normally; signature
//! verification above this layer catches corruption that leaves the framing
//! intact.

use crate::cache::entry::{CacheEntry, OutputFile};
use crate::errors::CacheError;
use crate::hash::Digest;

pub(crate) const MAGIC: [u8; 4] = *b"BCA1";
pub(crate) const FORMAT_VERSION: u32 = 1;
const ENTRY_SENTINEL: [u8; 4] = *b"ENT0";

/// Upper bound on a single frame; anything larger is framing corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// Upper bound on any embedded string.
const MAX_STR_LEN: usize = 64 * 1024;

/// Serialize entries in the order given. Callers sort by action id first so
/// the file is byte-identical for identical cache contents.
pub fn encode_entries(entries: &[CacheEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + entries.len() * 160);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        let mut body = entry.canonical_bytes();
        body.extend_from_slice(&entry.signature);
        buf.extend_from_slice(&ENTRY_SENTINEL);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
    }
    buf
}

/// Decode as many entries as the buffer yields.
///
/// Returns the surviving entries plus the count of frames dropped to
/// corruption or truncation. Each lost frame counts exactly once, however
/// it died — the count feeds user-facing cache-health stats. Signature
/// verification is the caller's job.
pub fn decode_entries(bytes: &[u8]) -> Result<(Vec<CacheEntry>, usize), CacheError> {
    if bytes.len() < 16 {
        return Err(CacheError::CorruptEntry {
            detail: "file shorter than header".to_string(),
        });
    }
    if bytes[0..4] != MAGIC {
        return Err(CacheError::CorruptEntry {
            detail: "bad magic".to_string(),
        });
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().expect("sliced 4 bytes"));
    if version != FORMAT_VERSION {
        return Err(CacheError::CorruptEntry {
            detail: format!("unsupported format version {}", version),
        });
    }
    let declared = u64::from_le_bytes(bytes[8..16].try_into().expect("sliced 8 bytes")) as usize;

    let mut entries = Vec::with_capacity(declared.min(1024));
    let mut dropped = 0usize;
    let mut pos = 16usize;
    // A failed frame is charged to `dropped` exactly once, at the point of
    // failure. The bytes skipped while resynchronizing to the next
    // sentinel belong to that same frame, so the skip itself only counts
    // when nothing charged it yet (a flipped sentinel, for instance).
    let mut skip_charged = false;

    while pos < bytes.len() {
        let Some(frame_start) = find_sentinel(bytes, pos) else {
            // No further sentinel: whatever remains is a truncated or
            // corrupt tail.
            if !skip_charged {
                dropped += 1;
            }
            break;
        };
        if frame_start != pos && !skip_charged {
            dropped += 1;
        }
        skip_charged = false;
        pos = frame_start + 4;

        if pos + 4 > bytes.len() {
            dropped += 1;
            break;
        }
        let body_len =
            u32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("sliced 4 bytes")) as usize;
        pos += 4;
        if body_len > MAX_FRAME_LEN || pos + body_len > bytes.len() {
            // Length corrupt or frame truncated: resync after the sentinel.
            dropped += 1;
            skip_charged = true;
            continue;
        }

        match decode_body(&bytes[pos..pos + body_len]) {
            Some(entry) => {
                entries.push(entry);
                pos += body_len;
            }
            None => {
                // Body unparseable; leave `pos` where it is and let the
                // sentinel scan find the next frame.
                dropped += 1;
                skip_charged = true;
            }
        }
    }

    Ok((entries, dropped))
}

fn find_sentinel(bytes: &[u8], from: usize) -> Option<usize> {
    bytes[from..]
        .windows(4)
        .position(|w| w == ENTRY_SENTINEL)
        .map(|offset| from + offset)
}

fn decode_body(body: &[u8]) -> Option<CacheEntry> {
    let mut reader = Reader { body, pos: 0 };

    let action_id = reader.take_str()?;
    let output_count = reader.take_u32()? as usize;
    if output_count > MAX_FRAME_LEN / 44 {
        return None;
    }
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let path = reader.take_str()?;
        let hash = reader.take_digest()?;
        let size = reader.take_u64()?;
        outputs.push(OutputFile {
            path: path.into(),
            hash,
            size,
        });
    }
    let output_hash = reader.take_digest()?;
    let created_at = reader.take_i64()?;
    let last_access = reader.take_i64()?;
    let hit_count = reader.take_u64()?;
    let size_bytes = reader.take_u64()?;
    let signature = *reader.take_digest()?.as_bytes();

    if reader.pos != body.len() {
        return None; // trailing bytes inside the frame
    }

    Some(CacheEntry {
        action_id,
        outputs,
        output_hash,
        created_at,
        last_access,
        hit_count,
        size_bytes,
        signature,
    })
}

struct Reader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.pos + n > self.body.len() {
            return None;
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn take_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn take_u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn take_i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn take_digest(&mut self) -> Option<Digest> {
        Some(Digest(self.take(32)?.try_into().ok()?))
    }

    fn take_str(&mut self) -> Option<String> {
        let len = self.take_u32()? as usize;
        if len > MAX_STR_LEN {
            return None;
        }
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::SigningKey;
    use std::path::PathBuf;

    fn entry(key: &SigningKey, name: &str, hit_count: u64) -> CacheEntry {
        let mut entry = CacheEntry {
            action_id: format!("//pkg:{}@compile.0+{}", name, "0".repeat(64)),
            outputs: vec![OutputFile {
                path: PathBuf::from(format!("out/{}.o", name)),
                hash: Digest([3u8; 32]),
                size: 512,
            }],
            output_hash: Digest([4u8; 32]),
            created_at: 1_700_000_000_000_000_000,
            last_access: 1_700_000_100_000_000_000,
            hit_count,
            size_bytes: 512,
            signature: [0u8; 32],
        };
        entry.resign(key);
        entry
    }

    #[test]
    fn encode_decode_round_trips() {
        let key = SigningKey::for_workspace("/w");
        let entries = vec![entry(&key, "a", 0), entry(&key, "b", 7)];
        let bytes = encode_entries(&entries);
        let (decoded, dropped) = decode_entries(&bytes).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(decoded, entries);
    }

    #[test]
    fn encoding_is_byte_deterministic() {
        let key = SigningKey::for_workspace("/w");
        let entries = vec![entry(&key, "a", 0), entry(&key, "b", 7)];
        assert_eq!(encode_entries(&entries), encode_entries(&entries));
    }

    #[test]
    fn truncated_file_drops_only_the_tail() {
        let key = SigningKey::for_workspace("/w");
        let entries = vec![entry(&key, "a", 0), entry(&key, "b", 1), entry(&key, "c", 2)];
        let bytes = encode_entries(&entries);

        // Chop into the middle of the last frame.
        let cut = bytes.len() - 10;
        let (decoded, dropped) = decode_entries(&bytes[..cut]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], entries[0]);
        assert_eq!(decoded[1], entries[1]);
        // One truncated frame, one drop; the lost tail must not be
        // double-counted by the resync path.
        assert_eq!(dropped, 1);
    }

    #[test]
    fn corrupt_frame_length_resyncs_to_next_entry() {
        let key = SigningKey::for_workspace("/w");
        let entries = vec![entry(&key, "a", 0), entry(&key, "b", 1)];
        let mut bytes = encode_entries(&entries);

        // Smash the first frame's length prefix hard.
        bytes[20] = 0xff;
        bytes[21] = 0xff;
        let (decoded, dropped) = decode_entries(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], entries[1]);
        // The bad length and the skip to the next sentinel are the same
        // lost frame: exactly one drop.
        assert_eq!(dropped, 1);
    }

    #[test]
    fn corrupt_sentinel_resyncs_and_counts_one() {
        let key = SigningKey::for_workspace("/w");
        let entries = vec![entry(&key, "a", 0), entry(&key, "b", 1)];
        let mut bytes = encode_entries(&entries);

        // Byte 17 (index 16) is the first byte of the first frame's
        // sentinel; the decoder must skip to the second frame and charge
        // one lost entry for the skipped stretch.
        bytes[16] ^= 0xff;
        let (decoded, dropped) = decode_entries(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], entries[1]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let key = SigningKey::for_workspace("/w");
        let mut bytes = encode_entries(&[entry(&key, "a", 0)]);
        bytes[0] ^= 0xff;
        assert!(decode_entries(&bytes).is_err());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let key = SigningKey::for_workspace("/w");
        let mut bytes = encode_entries(&[entry(&key, "a", 0)]);
        bytes[4] = 99;
        assert!(decode_entries(&bytes).is_err());
    }

    #[test]
    fn empty_cache_round_trips() {
        let bytes = encode_entries(&[]);
        let (decoded, dropped) = decode_entries(&bytes).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(dropped, 0);
    }
}
