// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Content-addressed artifact storage.
//!
//! One file per artifact under `objects/<first-two-hex>/<full-hex>`. The
//! hash is the identity: installing the same bytes twice is a no-op, and
//! two cache entries whose outputs share bytes share the object file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::CacheError;
use crate::hash::Digest;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// `root` is the cache namespace directory; objects live in
    /// `root/objects/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, hash: &Digest) -> PathBuf {
        let hex = hash.to_string();
        self.root.join("objects").join(&hex[..2]).join(&hex)
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.object_path(hash).is_file()
    }

    /// Copy `source` into the store under `hash`.
    ///
    /// The copy goes to a temp file in the target directory first and is
    /// renamed into place, so readers never observe a partial object. An
    /// already-present object is left alone.
    pub fn install(&self, source: &Path, hash: &Digest) -> Result<(), CacheError> {
        let dest = self.object_path(hash);
        if dest.is_file() {
            return Ok(());
        }
        let parent = dest.parent().expect("object path always has a parent");
        fs::create_dir_all(parent)?;

        let temp = tempfile::NamedTempFile::new_in(parent)?;
        fs::copy(source, temp.path())?;
        temp.persist(&dest)
            .map_err(|e| CacheError::IoFailed(e.error))?;
        Ok(())
    }

    /// Copy the object for `hash` out to `dest`, creating parent
    /// directories as needed.
    pub fn materialize(&self, hash: &Digest, dest: &Path) -> Result<(), CacheError> {
        let source = self.object_path(hash);
        if !source.is_file() {
            return Err(CacheError::IoFailed(io::Error::new(
                io::ErrorKind::NotFound,
                format!("object {} is not in the store", hash),
            )));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, dest)?;
        Ok(())
    }

    /// Delete the object for `hash` if present. Missing objects are fine;
    /// eviction races with nothing.
    pub fn remove(&self, hash: &Digest) -> Result<(), CacheError> {
        match fs::remove_file(self.object_path(hash)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::IoFailed(e)),
        }
    }

    /// Remove the whole object tree. Used by `clear()`.
    pub fn clear(&self) -> Result<(), CacheError> {
        let objects = self.root.join("objects");
        match fs::remove_dir_all(&objects) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::IoFailed(e)),
        }
    }
}
