//! Properties Codec: reads/writes the sorted `key=value` file format used by
//! `.content-hashes`, `.source-plan`, and the global cache's
//! `template-hashes.properties` (§6). Bit-exact where compatibility matters,
//! so this is a small direct implementation rather than routed through a
//! templating engine.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Renders `entries` as a sorted `key=value\n` document, UTF-8, LF endings.
/// `BTreeMap` already iterates in sorted key order, so no explicit sort step
/// is needed.
#[must_use]
pub fn encode(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in entries {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Parses a `key=value` document, one entry per line. Blank lines are
/// skipped; a line without `=` is a `SchemaError`.
///
/// # Errors
/// `Error::SchemaError` on a malformed line.
pub fn decode(text: &str, spec: &str, file: &Path) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for (i, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            return Err(Error::SchemaError {
                spec: spec.to_string(),
                template: String::new(),
                file: file.to_path_buf(),
                line: i + 1,
                reason: format!("malformed properties line (no `=`): {line}"),
            });
        };
        map.insert(k.to_string(), v.to_string());
    }
    Ok(map)
}

/// Writes `entries` to `path` atomically: write to a sibling temp file,
/// flush, then rename, so readers never observe a torn file (§5, §6).
pub fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let content = encode(entries);
    write_atomic_raw(path, &content)
}

/// Same atomicity guarantee as [`write_atomic`] but for single-line or
/// otherwise non-properties content (e.g. `.cache-key`).
pub fn write_atomic_raw(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::io("-", None, e))?;

    let tmp_path = parent.join(format!(
        ".tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("properties")
    ));
    {
        let mut file = std::fs::File::create(&tmp_path).map_err(|e| Error::io("-", None, e))?;
        file.write_all(content.as_bytes()).map_err(|e| Error::io("-", None, e))?;
        file.sync_all().map_err(|e| Error::io("-", None, e))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io("-", None, e))?;
    Ok(())
}

/// Parses a `cache_key=comma-separated,sorted,hash,list` document, the
/// shape of `template-hashes.properties`.
pub fn decode_hash_sets(text: &str, spec: &str, file: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let flat = decode(text, spec, file)?;
    Ok(flat
        .into_iter()
        .map(|(k, v)| {
            let mut hashes: Vec<String> = if v.is_empty() {
                Vec::new()
            } else {
                v.split(',').map(std::string::ToString::to_string).collect()
            };
            hashes.sort();
            (k, hashes)
        })
        .collect())
}

#[must_use]
pub fn encode_hash_sets(entries: &BTreeMap<String, Vec<String>>) -> String {
    let joined: BTreeMap<String, String> = entries
        .iter()
        .map(|(k, v)| {
            let mut sorted = v.clone();
            sorted.sort();
            (k.clone(), sorted.join(","))
        })
        .collect();
    encode(&joined)
}
