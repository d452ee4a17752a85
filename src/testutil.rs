//! Test toolkit: file/text assertion helpers and fixture builders shared
//! across this crate's unit and integration tests, plus test doubles for
//! the external collaborators this crate only sees through narrow traits.

use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use semver::Version;

use crate::generator_default::GeneratorFacade;

/// A [`GeneratorFacade`] backed by a fixed map, for tests that need a
/// generator with known defaults and a known version without depending on
/// any real code generator.
pub struct StaticGeneratorFacade {
    version: Version,
    defaults: BTreeMap<(String, String), String>,
    calls: AtomicUsize,
}

impl StaticGeneratorFacade {
    #[must_use]
    pub fn new(version: Version) -> Self {
        Self {
            version,
            defaults: BTreeMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_default(mut self, generator_name: &str, logical_name: &str, text: &str) -> Self {
        self.defaults.insert((generator_name.to_string(), logical_name.to_string()), text.to_string());
        self
    }

    /// Number of times [`GeneratorFacade::template_default`] has actually
    /// been invoked (as opposed to served from an extractor's cache).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeneratorFacade for StaticGeneratorFacade {
    fn template_default(&self, generator_name: &str, logical_name: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.defaults.get(&(generator_name.to_string(), logical_name.to_string())).cloned()
    }

    fn generator_version(&self) -> Version {
        self.version.clone()
    }
}

/// A loaded-in-memory piece of generated or on-disk text, with fluent
/// assertion helpers.
pub struct TextContent {
    content: String,
}

impl TextContent {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        Ok(Self { content: std::fs::read_to_string(path)? })
    }

    #[must_use]
    pub fn from_string(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }

    pub fn check_contains(&self, pattern: &str) -> Result<(), Box<dyn Error>> {
        if self.content.contains(pattern) {
            Ok(())
        } else {
            Err(Box::from(format!("content does not contain `{pattern}`")))
        }
    }

    pub fn assert_contains(&self, pattern: &str) {
        self.check_contains(pattern).unwrap_or_else(|e| panic!("{e}"));
    }

    pub fn check_not_contains(&self, pattern: &str) -> Result<(), Box<dyn Error>> {
        if self.content.contains(pattern) {
            Err(Box::from(format!("content should not contain `{pattern}`")))
        } else {
            Ok(())
        }
    }

    pub fn assert_not_contains(&self, pattern: &str) {
        self.check_not_contains(pattern).unwrap_or_else(|e| panic!("{e}"));
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.content
    }
}

pub fn check_file_exists(path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    if path.as_ref().exists() {
        Ok(())
    } else {
        Err(Box::from(format!("{} does not exist", path.as_ref().display())))
    }
}

pub fn assert_file_exists(path: impl AsRef<Path>) {
    check_file_exists(&path).unwrap_or_else(|e| panic!("{e}"));
}

pub fn check_file_not_exists(path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    if path.as_ref().exists() {
        Err(Box::from(format!("{} should not exist", path.as_ref().display())))
    } else {
        Ok(())
    }
}

pub fn assert_file_not_exists(path: impl AsRef<Path>) {
    check_file_not_exists(&path).unwrap_or_else(|e| panic!("{e}"));
}

/// Runs `f` with the process's current directory set to a fresh temporary
/// tree, restoring the previous directory afterward regardless of outcome.
pub fn with_temp_dir<F>(f: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(&Path, &Path),
{
    struct RestoreCwd(PathBuf);
    impl Drop for RestoreCwd {
        fn drop(&mut self) {
            let _ = env::set_current_dir(&self.0);
        }
    }

    let previous = env::current_dir()?;
    let tree = tree_fs::TreeBuilder::default().drop(true).create()?;
    let current: &Path = &tree.root;

    env::set_current_dir(current)?;
    let _restore = RestoreCwd(previous.clone());
    f(previous.as_path(), current);

    Ok(())
}

/// A throwaway working directory under the system temp root, cleaned up on
/// drop, for tests that need a real filesystem path but not a full
/// `tree-fs` layout.
pub fn temp_working_dir() -> Result<tempfile::TempDir, Box<dyn Error>> {
    Ok(tempfile::tempdir()?)
}

#[must_use]
pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(relative)
}
