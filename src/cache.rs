//! Cache Manager (§4.9): session/local/global cache tiers, the
//! working-directory cache key, and local cache validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use semver::Version;

use crate::config::TemplateSourceTag;
use crate::error::{Error, Result};
use crate::hash::{hash_bytes, hash_file, hash_ordered_map, hash_sequence, Hex32};
use crate::properties;

/// Session cache (§5): process-lifetime, concurrent. Memoizes expensive
/// loads — here, applied-customization results keyed by
/// `hash(base_text) ⊕ hash(descriptor_stack)` — and hands out a per-archive
/// lock so library extraction stays single-writer.
#[derive(Default)]
pub struct SessionCache {
    applied_customizations: DashMap<String, String>,
    extraction_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for memoizing one `(base_text, descriptor_stack)` application.
    #[must_use]
    pub fn applied_key(base_text_hash: &str, stack_hash: &str) -> String {
        format!("{base_text_hash}\u{0}{stack_hash}")
    }

    /// Compute-if-absent over the applied-customization memo: `compute` runs
    /// at most once per key even under concurrent callers, because
    /// `DashMap::entry` holds the shard lock for the key across the
    /// read-or-insert.
    pub fn get_or_compute_applied(&self, key: &str, compute: impl FnOnce() -> String) -> String {
        self.applied_customizations.entry(key.to_string()).or_insert_with(compute).clone()
    }

    /// The keyed lock guarding extraction of one archive, identified by its
    /// content hash. Concurrent callers for the same archive share the same
    /// `Mutex`; callers for different archives never block each other.
    #[must_use]
    pub fn extraction_lock(&self, archive_hash: &str) -> Arc<Mutex<()>> {
        self.extraction_locks.entry(archive_hash.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// The inputs folded into the working-directory cache key, per §4.9's
/// named tuple.
pub struct CacheKeyInputs<'a> {
    pub plugin_version: &'a Version,
    pub generator_name: &'a str,
    pub generator_version: &'a Version,
    pub api_document_path: &'a Path,
    pub template_source_order: &'a [TemplateSourceTag],
    pub apply_plugin_customizations: bool,
    pub user_templates_tree_hash: &'a str,
    pub user_customizations_tree_hash: &'a str,
    pub plugin_customizations_resources_hash: &'a str,
    pub library_manifest_set_hash: &'a str,
    pub library_contents_set_hash: &'a str,
    pub template_variables: &'a BTreeMap<String, String>,
    pub generator_options: &'a BTreeMap<String, String>,
}

/// Computes the working-directory cache key as the hash of the ordered
/// tuple described in §4.9, feeding each component through [`hash_sequence`]
/// so the tuple's own element boundaries can never collide with each
/// other's content.
///
/// # Errors
/// `Error::IoError` if `api_document_path` cannot be read.
pub fn compute_cache_key(inputs: &CacheKeyInputs) -> Result<Hex32> {
    let api_document_hash = hash_file(inputs.api_document_path)?;
    let source_order_repr: Vec<String> = inputs.template_source_order.iter().map(|t| t.as_str().to_string()).collect();

    let components = vec![
        inputs.plugin_version.to_string(),
        inputs.generator_name.to_string(),
        inputs.generator_version.to_string(),
        api_document_hash,
        hash_sequence(&source_order_repr),
        inputs.apply_plugin_customizations.to_string(),
        inputs.user_templates_tree_hash.to_string(),
        inputs.user_customizations_tree_hash.to_string(),
        inputs.plugin_customizations_resources_hash.to_string(),
        inputs.library_manifest_set_hash.to_string(),
        inputs.library_contents_set_hash.to_string(),
        hash_ordered_map(inputs.template_variables),
        hash_ordered_map(inputs.generator_options),
    ];
    Ok(hash_sequence(&components))
}

/// Hashes an on-disk directory tree (e.g. `user_template_dir`) by folding
/// each file's relative path and content hash through [`hash_sequence`] in
/// sorted path order, so the result is independent of filesystem iteration
/// order. Returns the hash of the empty sequence if `dir` is `None` or does
/// not exist — an absent tree is a stable, distinct input, not an error.
pub fn hash_dir_tree(dir: Option<&Path>) -> Hex32 {
    let Some(dir) = dir else { return hash_sequence(Vec::<String>::new()) };
    if !dir.is_dir() {
        return hash_sequence(Vec::<String>::new());
    }
    let mut entries: Vec<(String, PathBuf)> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?.to_string_lossy().replace('\\', "/");
            Some((rel, e.path().to_path_buf()))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let parts: Vec<String> = entries
        .into_iter()
        .map(|(rel, path)| {
            let file_hash = hash_file(&path).unwrap_or_default();
            format!("{rel}={file_hash}")
        })
        .collect();
    hash_sequence(&parts)
}

/// Local cache: the `.cache-key` / `.content-hashes` / `.source-plan` files
/// inside one spec's working directory.
pub struct LocalCache {
    pub working_dir: PathBuf,
}

impl LocalCache {
    #[must_use]
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    fn cache_key_path(&self) -> PathBuf {
        self.working_dir.join(".cache-key")
    }

    fn content_hashes_path(&self) -> PathBuf {
        self.working_dir.join(".content-hashes")
    }

    fn source_plan_path(&self) -> PathBuf {
        self.working_dir.join(".source-plan")
    }

    /// Whether the working directory is reusable as-is: the recomputed
    /// `expected_key` matches the stored `.cache-key`, and every file
    /// listed in `.content-hashes` matches its recorded SHA-256 on disk.
    #[must_use]
    pub fn is_valid(&self, expected_key: &str) -> bool {
        let Ok(stored_key) = std::fs::read_to_string(self.cache_key_path()) else { return false };
        if stored_key.trim() != expected_key {
            return false;
        }
        let Ok(hashes_text) = std::fs::read_to_string(self.content_hashes_path()) else { return false };
        let Ok(hashes) = properties::decode(&hashes_text, "-", &self.content_hashes_path()) else { return false };
        for (logical_name, recorded_hash) in &hashes {
            let file_path = self.working_dir.join(logical_name);
            match hash_file(&file_path) {
                Ok(actual) if &actual == recorded_hash => {}
                _ => return false,
            }
        }
        true
    }

    /// Atomically persists the cache key, content hashes, and source plan,
    /// in that order so a reader can never observe hashes/plan without a
    /// matching key having been written moments before.
    ///
    /// # Errors
    /// `Error::IoError` on any write failure.
    pub fn write(
        &self,
        cache_key: &str,
        content_hashes: &BTreeMap<String, String>,
        source_plan: &BTreeMap<String, String>,
    ) -> Result<()> {
        properties::write_atomic(&self.content_hashes_path(), content_hashes)?;
        properties::write_atomic(&self.source_plan_path(), source_plan)?;
        properties::write_atomic_raw(&self.cache_key_path(), &format!("{cache_key}\n"))?;
        Ok(())
    }

    /// Removes every entry from the working directory except `.cache-key`,
    /// per §4.9's "cleaned except for `.cache-key` placeholder" on a miss.
    ///
    /// # Errors
    /// `Error::IoError` on a filesystem failure other than "not found".
    pub fn clean_except_cache_key(&self) -> Result<()> {
        if !self.working_dir.is_dir() {
            return Ok(());
        }
        let cache_key_name = std::ffi::OsStr::new(".cache-key");
        for entry in std::fs::read_dir(&self.working_dir).map_err(|e| Error::io("-", None, e))? {
            let entry = entry.map_err(|e| Error::io("-", None, e))?;
            if entry.file_name() == cache_key_name {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path).map_err(|e| Error::io("-", None, e))?;
            } else {
                std::fs::remove_file(&path).map_err(|e| Error::io("-", None, e))?;
            }
        }
        Ok(())
    }
}

/// Global cache: `<user-home>/.<tool>-cache/template-hashes.properties`,
/// giving cross-project cache-key → content-hash-set reuse signals.
pub struct GlobalCache {
    pub root: PathBuf,
}

impl GlobalCache {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn hashes_file(&self) -> PathBuf {
        self.root.join("template-hashes.properties")
    }

    #[must_use]
    pub fn library_extracts_dir(&self) -> PathBuf {
        self.root.join("library-extracts")
    }

    /// Reads the content-hash set recorded for `cache_key`, if any.
    ///
    /// # Errors
    /// `Error::SchemaError` if the persisted file is malformed.
    pub fn lookup(&self, cache_key: &str) -> Result<Option<Vec<String>>> {
        let path = self.hashes_file();
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| Error::io("-", None, e))?;
        let sets = properties::decode_hash_sets(&text, "-", &path)?;
        Ok(sets.get(cache_key).cloned())
    }

    /// Records `cache_key => hashes`, merging into the existing file and
    /// rewriting it atomically (write-to-temp, flush, rename).
    ///
    /// # Errors
    /// `Error::IoError`/`Error::SchemaError` per the underlying read/write.
    pub fn record(&self, cache_key: &str, hashes: &[String]) -> Result<()> {
        let path = self.hashes_file();
        let mut sets = if path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(|e| Error::io("-", None, e))?;
            properties::decode_hash_sets(&text, "-", &path)?
        } else {
            BTreeMap::new()
        };
        sets.insert(cache_key.to_string(), hashes.to_vec());
        let content = properties::encode_hash_sets(&sets);
        properties::write_atomic_raw(&path, &content)
    }
}

#[must_use]
pub fn hash_manifest_set(manifests_yaml: &[String]) -> Hex32 {
    hash_sequence(manifests_yaml)
}

#[must_use]
pub fn hash_contents_set(content_hashes: &[String]) -> Hex32 {
    let mut sorted = content_hashes.to_vec();
    sorted.sort();
    hash_bytes(sorted.join(",").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_for_identical_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let api = dir.path().join("api.yaml");
        std::fs::write(&api, "openapi: 3.0.0").unwrap();
        let build = |vars: &BTreeMap<String, String>| {
            compute_cache_key(&CacheKeyInputs {
                plugin_version: &Version::new(1, 0, 0),
                generator_name: "spring",
                generator_version: &Version::new(7, 0, 0),
                api_document_path: &api,
                template_source_order: &[TemplateSourceTag::OpenapiGenerator],
                apply_plugin_customizations: true,
                user_templates_tree_hash: "u",
                user_customizations_tree_hash: "uc",
                plugin_customizations_resources_hash: "p",
                library_manifest_set_hash: "lm",
                library_contents_set_hash: "lc",
                template_variables: vars,
                generator_options: &BTreeMap::new(),
            })
            .unwrap()
        };
        let vars = BTreeMap::new();
        assert_eq!(build(&vars), build(&vars));
    }

    #[test]
    fn cache_key_changes_when_api_document_changes() {
        let dir = tempfile::tempdir().unwrap();
        let api = dir.path().join("api.yaml");
        std::fs::write(&api, "openapi: 3.0.0").unwrap();
        let inputs = |vars: &BTreeMap<String, String>| CacheKeyInputs {
            plugin_version: &Version::new(1, 0, 0),
            generator_name: "spring",
            generator_version: &Version::new(7, 0, 0),
            api_document_path: &api,
            template_source_order: &[TemplateSourceTag::OpenapiGenerator],
            apply_plugin_customizations: true,
            user_templates_tree_hash: "u",
            user_customizations_tree_hash: "uc",
            plugin_customizations_resources_hash: "p",
            library_manifest_set_hash: "lm",
            library_contents_set_hash: "lc",
            template_variables: vars,
            generator_options: &BTreeMap::new(),
        };
        let vars = BTreeMap::new();
        let before = compute_cache_key(&inputs(&vars)).unwrap();
        std::fs::write(&api, "openapi: 3.0.1").unwrap();
        let after = compute_cache_key(&inputs(&vars)).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn local_cache_round_trips_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().to_path_buf();
        std::fs::write(working_dir.join("pojo.mustache"), "HELLO").unwrap();
        let local = LocalCache::new(working_dir.clone());

        let mut hashes = BTreeMap::new();
        hashes.insert("pojo.mustache".to_string(), hash_bytes(b"HELLO"));
        let plan = BTreeMap::new();
        local.write("abc123", &hashes, &plan).unwrap();

        assert!(local.is_valid("abc123"));
        assert!(!local.is_valid("different-key"));
    }

    #[test]
    fn local_cache_is_invalid_when_file_content_drifts() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().to_path_buf();
        std::fs::write(working_dir.join("pojo.mustache"), "HELLO").unwrap();
        let local = LocalCache::new(working_dir.clone());
        let mut hashes = BTreeMap::new();
        hashes.insert("pojo.mustache".to_string(), hash_bytes(b"HELLO"));
        local.write("abc123", &hashes, &BTreeMap::new()).unwrap();

        std::fs::write(working_dir.join("pojo.mustache"), "TAMPERED").unwrap();
        assert!(!local.is_valid("abc123"));
    }

    #[test]
    fn clean_except_cache_key_preserves_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().to_path_buf();
        std::fs::write(working_dir.join(".cache-key"), "k\n").unwrap();
        std::fs::write(working_dir.join("pojo.mustache"), "HELLO").unwrap();
        std::fs::create_dir(working_dir.join("orig")).unwrap();

        let local = LocalCache::new(working_dir.clone());
        local.clean_except_cache_key().unwrap();

        assert!(working_dir.join(".cache-key").is_file());
        assert!(!working_dir.join("pojo.mustache").exists());
        assert!(!working_dir.join("orig").exists());
    }

    #[test]
    fn global_cache_records_and_looks_up() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalCache::new(dir.path().to_path_buf());
        assert_eq!(global.lookup("key1").unwrap(), None);
        global.record("key1", &["aaa".to_string(), "bbb".to_string()]).unwrap();
        assert_eq!(global.lookup("key1").unwrap(), Some(vec!["aaa".to_string(), "bbb".to_string()]));
    }

    #[test]
    fn global_cache_record_merges_without_losing_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalCache::new(dir.path().to_path_buf());
        global.record("key1", &["aaa".to_string()]).unwrap();
        global.record("key2", &["bbb".to_string()]).unwrap();
        assert_eq!(global.lookup("key1").unwrap(), Some(vec!["aaa".to_string()]));
        assert_eq!(global.lookup("key2").unwrap(), Some(vec!["bbb".to_string()]));
    }

    #[test]
    fn session_cache_compute_if_absent_runs_once() {
        let session = SessionCache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let key = SessionCache::applied_key("base-hash", "stack-hash");
        let v1 = session.get_or_compute_applied(&key, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            "computed".to_string()
        });
        let v2 = session.get_or_compute_applied(&key, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            "computed-again".to_string()
        });
        assert_eq!(v1, "computed");
        assert_eq!(v2, "computed");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn extraction_lock_is_shared_across_calls_for_same_hash() {
        let session = SessionCache::new();
        let lock1 = session.extraction_lock("hash-a");
        let lock2 = session.extraction_lock("hash-a");
        assert!(Arc::ptr_eq(&lock1, &lock2));
        let lock3 = session.extraction_lock("hash-b");
        assert!(!Arc::ptr_eq(&lock1, &lock3));
    }

    #[test]
    fn hash_dir_tree_is_stable_and_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "2").unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();
        let h1 = hash_dir_tree(Some(dir.path()));
        let h2 = hash_dir_tree(Some(dir.path()));
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_dir_tree_of_absent_dir_is_stable_sentinel() {
        assert_eq!(hash_dir_tree(None), hash_dir_tree(None));
        assert_eq!(hash_dir_tree(None), hash_dir_tree(Some(Path::new("/does/not/exist"))));
    }
}
