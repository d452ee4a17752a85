//! Plugin-customizations resource tier (source tag `plugin-customizations`,
//! precedence 5): first-party descriptors shipped *inside this crate*,
//! embedded at compile time the way `loco-gen` embeds its own template
//! bundle (`include_dir!` over its `templates/` tree in `template.rs`).
//!
//! Unlike library bundles (§4.7), these are trusted content baked into the
//! binary — there is no archive, manifest, or extraction step, only a
//! lookup by generator name and logical name.

use std::collections::BTreeMap;

use include_dir::{include_dir, Dir};

use crate::hash::{hash_sequence, Hex32};

static PLUGIN_CUSTOMIZATIONS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/resources/plugin-customizations");

/// Returns every plugin customization descriptor (raw YAML text) bundled
/// for `generator_name`, keyed by logical name (the `.yaml` suffix
/// stripped, matching the on-disk convention in §4.7/§6).
#[must_use]
pub fn load_for_generator(generator_name: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(generator_dir) = PLUGIN_CUSTOMIZATIONS.get_dir(generator_name) else {
        return out;
    };
    for file in generator_dir.files() {
        let Some(name) = file.path().file_name().and_then(|n| n.to_str()) else { continue };
        let Some(logical_name) = name.strip_suffix(".yaml") else { continue };
        if let Some(text) = file.contents_utf8() {
            out.insert(logical_name.to_string(), text.to_string());
        }
    }
    out
}

/// Hashes the entire embedded resource tree, the `plugin_customizations_resources`
/// component of the working-directory cache key (§4.9). Stable across
/// builds of the same crate version; changes whenever a bundled descriptor
/// changes, without touching the filesystem.
#[must_use]
pub fn resources_hash() -> Hex32 {
    let mut parts = Vec::new();
    collect_hash_parts(&PLUGIN_CUSTOMIZATIONS, &mut parts);
    parts.sort();
    hash_sequence(&parts)
}

fn collect_hash_parts(dir: &Dir<'_>, parts: &mut Vec<String>) {
    for file in dir.files() {
        parts.push(format!("{}={}", file.path().display(), crate::hash::hash_bytes(file.contents())));
    }
    for sub in dir.dirs() {
        collect_hash_parts(sub, parts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_bundled_spring_pojo_customization() {
        let loaded = load_for_generator("spring");
        assert!(loaded.contains_key("pojo.mustache"));
    }

    #[test]
    fn unknown_generator_yields_empty_map() {
        assert!(load_for_generator("no-such-generator").is_empty());
    }

    #[test]
    fn resources_hash_is_stable() {
        assert_eq!(resources_hash(), resources_hash());
    }
}
