//! SHA-256 content fingerprinting.
//!
//! Every cache key, content hash, and provenance identity in this crate goes
//! through these four functions — no ad-hoc hashing exists elsewhere.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const STREAM_CHUNK: usize = 64 * 1024;

/// Hex-encoded, lowercase, 32-byte SHA-256 digest.
pub type Hex32 = String;

#[must_use]
pub fn hash_bytes(buf: &[u8]) -> Hex32 {
    let mut hasher = Sha256::new();
    hasher.update(buf);
    hex::encode(hasher.finalize())
}

/// Streams the file in bounded chunks so large generator/library files never
/// need to be loaded whole into memory.
pub fn hash_file(path: &Path) -> Result<Hex32> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io("-", None, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_CHUNK];
    loop {
        let read = file.read(&mut buf).map_err(|e| Error::io("-", None, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes an ordered map by sorting its keys ascending and feeding
/// `"$k=$v\n"` for each pair. `BTreeMap` already iterates in sorted key
/// order, so callers that start from one get this ordering for free.
#[must_use]
pub fn hash_ordered_map(map: &BTreeMap<String, String>) -> Hex32 {
    let mut hasher = Sha256::new();
    for (k, v) in map {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Hashes a sequence by feeding a length prefix then each element's own
/// hash, so `["ab"]` and `["a", "b"]` never collide.
#[must_use]
pub fn hash_sequence<I, S>(items: I) -> Hex32
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    let mut count: u64 = 0;
    let mut body = Vec::new();
    for item in items {
        let item_hash = hash_bytes(item.as_ref());
        body.push(item_hash);
        count += 1;
    }
    hasher.update(count.to_le_bytes());
    for h in body {
        hasher.update(h.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Minimal hex encoding, kept local so this module has no dependency beyond
/// `sha2` for its one real job.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let bytes = bytes.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}
