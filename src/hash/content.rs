// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Size-tiered file content hashing.
//!
//! Small files are hashed whole and medium files are streamed, both exact.
//! Large files are sample-hashed: the file size plus fixed-size reads from
//! the head, the tail, and evenly-spaced interior offsets. Sampling accepts
//! a random-collision risk inside a single workspace in exchange for not
//! reading hundreds of megabytes per probe; the file size is always mixed
//! in first so same-prefix files of different lengths can never collide.
//!
//! | File size  | Method                                              |
//! |------------|-----------------------------------------------------|
//! | ≤ 4 KiB    | whole contents                                      |
//! | ≤ 1 MiB    | streamed in chunks                                  |
//! | ≤ 100 MiB  | size ‖ first 256 KiB ‖ last 256 KiB ‖ 8 × 16 KiB    |
//! | > 100 MiB  | size ‖ first 512 KiB ‖ last 512 KiB ‖ 16 × 32 KiB   |

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::Digest;

const SMALL_FILE_MAX: u64 = 4 * 1024;
const MEDIUM_FILE_MAX: u64 = 1024 * 1024;
const LARGE_FILE_MAX: u64 = 100 * 1024 * 1024;

const STREAM_CHUNK: usize = 64 * 1024;

const LARGE_EDGE: usize = 256 * 1024;
const LARGE_SAMPLES: u64 = 8;
const LARGE_SAMPLE_LEN: usize = 16 * 1024;

const HUGE_EDGE: usize = 512 * 1024;
const HUGE_SAMPLES: u64 = 16;
const HUGE_SAMPLE_LEN: usize = 32 * 1024;

/// Hash an in-memory buffer. Used for canonical serializations, not files.
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    Digest(*blake3::hash(bytes).as_bytes())
}

/// Tier-1 metadata probe: `H(path ‖ size ‖ mtime_ns)`.
///
/// Collisions here only cause a content hash to be reused or recomputed,
/// never an incorrect fingerprint, so the probe trades exactness for a
/// microsecond-scale stat.
pub fn metadata_probe(path: &Path) -> std::io::Result<Digest> {
    let meta = std::fs::metadata(path)?;
    let mtime_ns: i64 = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);

    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(&meta.len().to_le_bytes());
    hasher.update(&mtime_ns.to_le_bytes());
    Ok(Digest(*hasher.finalize().as_bytes()))
}

/// Tier-2 content hash with size-tiered sampling.
pub fn hash_file(path: &Path) -> std::io::Result<Digest> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&len.to_le_bytes());

    if len <= SMALL_FILE_MAX {
        let mut contents = Vec::with_capacity(len as usize);
        file.read_to_end(&mut contents)?;
        hasher.update(&contents);
    } else if len <= MEDIUM_FILE_MAX {
        stream_into(&mut hasher, &mut file)?;
    } else if len <= LARGE_FILE_MAX {
        sample_into(&mut hasher, &mut file, len, LARGE_EDGE, LARGE_SAMPLES, LARGE_SAMPLE_LEN)?;
    } else {
        sample_into(&mut hasher, &mut file, len, HUGE_EDGE, HUGE_SAMPLES, HUGE_SAMPLE_LEN)?;
    }

    Ok(Digest(*hasher.finalize().as_bytes()))
}

fn stream_into(hasher: &mut blake3::Hasher, file: &mut File) -> std::io::Result<()> {
    let mut buf = vec![0u8; STREAM_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

/// Head, tail, and `samples` interior reads at evenly-spaced offsets.
fn sample_into(
    hasher: &mut blake3::Hasher,
    file: &mut File,
    len: u64,
    edge: usize,
    samples: u64,
    sample_len: usize,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; edge];
    read_exact_at(file, 0, &mut buf)?;
    hasher.update(&buf);

    // Interior samples span the region between the two edges.
    let interior_start = edge as u64;
    let interior_len = len - 2 * edge as u64;
    let mut sample_buf = vec![0u8; sample_len];
    for i in 0..samples {
        let offset = interior_start + (interior_len * i) / samples;
        let take = sample_len.min((len - offset) as usize);
        read_exact_at(file, offset, &mut sample_buf[..take])?;
        hasher.update(&sample_buf[..take]);
    }

    read_exact_at(file, len - edge as u64, &mut buf)?;
    hasher.update(&buf);
    Ok(())
}

fn read_exact_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn small_file_hash_is_content_sensitive() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"hello");
        let b = write_file(&dir, "b", b"hello");
        let c = write_file(&dir, "c", b"world");
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
        assert_ne!(hash_file(&a).unwrap(), hash_file(&c).unwrap());
    }

    #[test]
    fn medium_file_streams_deterministically() {
        let dir = TempDir::new().unwrap();
        let contents = vec![0xabu8; 300 * 1024];
        let a = write_file(&dir, "a", &contents);
        let b = write_file(&dir, "b", &contents);
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn size_is_always_mixed_in() {
        let dir = TempDir::new().unwrap();
        // Same prefix, different lengths: must not collide even though the
        // shorter file is a prefix of the longer one.
        let a = write_file(&dir, "a", b"prefix");
        let b = write_file(&dir, "b", b"prefixmore");
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn large_file_sampling_sees_interior_changes() {
        let dir = TempDir::new().unwrap();
        let mut contents = vec![0u8; 2 * 1024 * 1024];
        let a = write_file(&dir, "a", &contents);
        // Flip a byte inside the first interior sample window.
        contents[LARGE_EDGE + 1] ^= 0xff;
        let b = write_file(&dir, "b", &contents);
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn metadata_probe_tracks_mtime_and_size() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a", b"contents");
        let first = metadata_probe(&path).unwrap();
        assert_eq!(metadata_probe(&path).unwrap(), first);

        // Rewriting with different contents changes size, so the probe moves.
        std::fs::write(&path, b"different length contents").unwrap();
        assert_ne!(metadata_probe(&path).unwrap(), first);
    }
}
