//! Library Loader (§4.7): reads template/customization bundles from archive
//! dependencies on the customization classpath.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::hash::hash_file;
use crate::error::{Error, Result};

const MANIFEST_ENTRY: &str = "META-INF/openapi-library.yaml";
const TEMPLATES_ROOT: &str = "META-INF/openapi-templates";
const CUSTOMIZATIONS_ROOT: &str = "META-INF/openapi-customizations";

/// `library_manifest.yaml` contents for one archive dependency, per §3.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryManifest {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub supported_generators: Option<Vec<String>>,
    pub min_generator_version: Option<Version>,
    pub max_generator_version: Option<Version>,
    pub min_plugin_version: Option<Version>,
    pub required_features: Option<Vec<String>>,
    pub provided_features: Option<Vec<String>>,
}

/// Everything one library contributed for the active generator: its
/// manifest, full templates keyed by logical name, and customization
/// descriptor *text* keyed by the logical name they target (parsing is the
/// Template Resolver's job, not the loader's).
#[derive(Debug, Clone)]
pub struct LoadedLibrary {
    pub manifest: LibraryManifest,
    pub templates: BTreeMap<String, String>,
    pub customizations: BTreeMap<String, String>,
}

/// Opens `archive_path`, validates its manifest against the running
/// environment, and returns the templates/customizations it contributes for
/// `generator_name`. Reuses a prior extraction under
/// `<global_cache_root>/library-extracts/<archive-hash>/` when present and
/// consistent with the archive's current hash.
///
/// Returns `Ok(None)` when the manifest declares `supported_generators` and
/// it does not include `generator_name` — the library contributes nothing
/// and the caller should log this, not treat it as an error.
///
/// # Errors
/// `Error::LibraryManifestMissing` if the archive has no
/// `META-INF/openapi-library.yaml`. `Error::LibraryIncompatible` if a
/// version constraint is violated. `Error::IoError` for archive/filesystem
/// failures.
pub fn load_library(
    archive_path: &Path,
    generator_name: &str,
    generator_version: &Version,
    plugin_version: &Version,
    global_cache_root: &Path,
) -> Result<Option<LoadedLibrary>> {
    let archive_hash = hash_file(archive_path)?;
    let extract_dir = global_cache_root.join("library-extracts").join(&archive_hash);

    let manifest = read_or_extract_manifest(archive_path, &extract_dir)?;
    check_compatibility(&manifest, generator_version, plugin_version)?;

    if let Some(supported) = &manifest.supported_generators {
        if !supported.iter().any(|g| g == generator_name) {
            tracing::info!(library = %manifest.name, %generator_name, "library does not support this generator; contributing nothing");
            return Ok(None);
        }
    }

    let (templates, customizations) = if extraction_is_valid(&extract_dir) && extraction_has_generator(&extract_dir, generator_name) {
        load_from_extraction(&extract_dir, generator_name)?
    } else {
        extract_and_load(archive_path, &extract_dir, generator_name)?
    };

    Ok(Some(LoadedLibrary { manifest, templates, customizations }))
}

fn check_compatibility(manifest: &LibraryManifest, generator_version: &Version, plugin_version: &Version) -> Result<()> {
    if let Some(min) = &manifest.min_generator_version {
        if generator_version < min {
            return Err(incompatible(manifest, format!("generator {generator_version} is older than minimum {min}")));
        }
    }
    if let Some(max) = &manifest.max_generator_version {
        if generator_version > max {
            return Err(incompatible(manifest, format!("generator {generator_version} is newer than maximum {max}")));
        }
    }
    if let Some(min) = &manifest.min_plugin_version {
        if plugin_version < min {
            return Err(incompatible(manifest, format!("plugin {plugin_version} is older than minimum {min}")));
        }
    }
    Ok(())
}

fn incompatible(manifest: &LibraryManifest, reason: String) -> Error {
    Error::LibraryIncompatible { library: manifest.name.clone(), reason }
}

fn read_or_extract_manifest(archive_path: &Path, extract_dir: &Path) -> Result<LibraryManifest> {
    if extraction_is_valid(extract_dir) {
        let text = fs::read_to_string(extract_dir.join("openapi-library.yaml"))
            .map_err(|e| Error::io("-", Some(archive_path.display().to_string()), e))?;
        return parse_manifest(&text, archive_path);
    }
    let mut zip = open_zip(archive_path)?;
    let text = read_zip_entry_to_string(&mut zip, MANIFEST_ENTRY)
        .ok_or_else(|| Error::LibraryManifestMissing { archive: archive_path.to_path_buf() })?;
    parse_manifest(&text, archive_path)
}

fn parse_manifest(text: &str, archive_path: &Path) -> Result<LibraryManifest> {
    serde_yaml::from_str(text).map_err(|e| Error::SchemaError {
        spec: String::new(),
        template: String::new(),
        file: archive_path.to_path_buf(),
        line: e.location().map_or(0, |l| l.line()),
        reason: e.to_string(),
    })
}

fn open_zip(archive_path: &Path) -> Result<ZipArchive<fs::File>> {
    let file = fs::File::open(archive_path).map_err(|e| Error::io("-", Some(archive_path.display().to_string()), e))?;
    ZipArchive::new(file).map_err(|e| Error::message(format!("{}: not a valid archive: {e}", archive_path.display())))
}

fn read_zip_entry_to_string(zip: &mut ZipArchive<fs::File>, entry_name: &str) -> Option<String> {
    let mut entry = zip.by_name(entry_name).ok()?;
    let mut buf = String::new();
    entry.read_to_string(&mut buf).ok()?;
    Some(buf)
}

/// A prior extraction is considered valid if its manifest marker file is
/// present; re-extraction always overwrites atomically, so a partial
/// extraction never lingers with the marker present.
fn extraction_is_valid(extract_dir: &Path) -> bool {
    extract_dir.join("openapi-library.yaml").is_file()
}

/// Whether `extract_dir` already holds an extraction for `generator_name`
/// specifically — the same archive extracted for one generator says
/// nothing about whether a *different* generator's templates/customizations
/// were ever pulled out of it, since extraction is scoped per generator
/// (`persist_extraction` writes under `openapi-templates/<generator>/` and
/// `openapi-customizations/<generator>/`, not the archive root).
fn extraction_has_generator(extract_dir: &Path, generator_name: &str) -> bool {
    extract_dir.join("openapi-templates").join(generator_name).is_dir()
        && extract_dir.join("openapi-customizations").join(generator_name).is_dir()
}

fn load_from_extraction(extract_dir: &Path, generator_name: &str) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>)> {
    let templates_dir = extract_dir.join("openapi-templates").join(generator_name);
    let customizations_dir = extract_dir.join("openapi-customizations").join(generator_name);

    let mut templates = BTreeMap::new();
    if templates_dir.is_dir() {
        for entry in walkdir::WalkDir::new(&templates_dir).into_iter().filter_map(std::result::Result::ok) {
            if entry.file_type().is_file() {
                let logical_name = entry.path().strip_prefix(&templates_dir).expect("within root").to_string_lossy().replace('\\', "/");
                let text = fs::read_to_string(entry.path()).map_err(|e| Error::io("-", Some(logical_name.clone()), e))?;
                templates.insert(logical_name, text);
            }
        }
    }

    let mut customizations = BTreeMap::new();
    if customizations_dir.is_dir() {
        for entry in walkdir::WalkDir::new(&customizations_dir).into_iter().filter_map(std::result::Result::ok) {
            if entry.file_type().is_file() {
                if let Some(logical_name) = customization_logical_name(entry.path(), &customizations_dir) {
                    let text = fs::read_to_string(entry.path()).map_err(|e| Error::io("-", Some(logical_name.clone()), e))?;
                    customizations.insert(logical_name, text);
                }
            }
        }
    }

    Ok((templates, customizations))
}

fn customization_logical_name(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.to_string_lossy().replace('\\', "/");
    relative.strip_suffix(".yaml").map(std::string::ToString::to_string)
}

fn extract_and_load(
    archive_path: &Path,
    extract_dir: &Path,
    generator_name: &str,
) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>)> {
    let mut zip = open_zip(archive_path)?;
    let manifest_text = read_zip_entry_to_string(&mut zip, MANIFEST_ENTRY)
        .ok_or_else(|| Error::LibraryManifestMissing { archive: archive_path.to_path_buf() })?;

    let templates_prefix = format!("{TEMPLATES_ROOT}/{generator_name}/");
    let customizations_prefix = format!("{CUSTOMIZATIONS_ROOT}/{generator_name}/");

    let mut templates = BTreeMap::new();
    let mut customizations = BTreeMap::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| Error::message(format!("{}: {e}", archive_path.display())))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut buf = String::new();
        if let Some(logical_name) = name.strip_prefix(&templates_prefix) {
            if entry.read_to_string(&mut buf).is_ok() {
                templates.insert(logical_name.to_string(), buf);
            }
        } else if let Some(rest) = name.strip_prefix(&customizations_prefix) {
            if let Some(logical_name) = rest.strip_suffix(".yaml") {
                if entry.read_to_string(&mut buf).is_ok() {
                    customizations.insert(logical_name.to_string(), buf);
                }
            }
        }
    }

    persist_extraction(extract_dir, &manifest_text, generator_name, &templates, &customizations)?;

    Ok((templates, customizations))
}

/// Writes this generator's slice of the extraction into `extract_dir`,
/// merging alongside whatever other generators' subdirectories may already
/// be there from earlier calls against the same archive — `extract_dir` is
/// keyed only on archive content hash (§3's `library-extracts/<libhash>/`),
/// so two specs targeting different generators against the same archive
/// share one `extract_dir` and must not clobber each other's extraction.
/// Each generator's own subdirectory is still written via a sibling temp
/// directory then renamed into place, so a crash mid-extraction never
/// leaves a half-written generator directory that
/// [`extraction_has_generator`] would accept.
fn persist_extraction(
    extract_dir: &Path,
    manifest_text: &str,
    generator_name: &str,
    templates: &BTreeMap<String, String>,
    customizations: &BTreeMap<String, String>,
) -> Result<()> {
    fs::create_dir_all(extract_dir).map_err(|e| Error::io("-", None, e))?;

    let manifest_path = extract_dir.join("openapi-library.yaml");
    if !manifest_path.is_file() {
        fs::write(&manifest_path, manifest_text).map_err(|e| Error::io("-", None, e))?;
    }

    persist_generator_root(extract_dir, "openapi-templates", generator_name, templates, false)?;
    persist_generator_root(extract_dir, "openapi-customizations", generator_name, customizations, true)?;
    Ok(())
}

/// Extracts one `<root_name>/<generator_name>/` subdirectory atomically
/// (temp dir, then rename over any stale prior extraction for this same
/// generator) without touching sibling generators' subdirectories under
/// `<root_name>/`.
fn persist_generator_root(
    extract_dir: &Path,
    root_name: &str,
    generator_name: &str,
    contents: &BTreeMap<String, String>,
    yaml_suffix: bool,
) -> Result<()> {
    let root = extract_dir.join(root_name);
    fs::create_dir_all(&root).map_err(|e| Error::io("-", None, e))?;

    let tmp_dir = root.join(format!(".tmp-{generator_name}"));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir).map_err(|e| Error::io("-", None, e))?;
    }
    fs::create_dir_all(&tmp_dir).map_err(|e| Error::io("-", None, e))?;
    for (logical_name, text) in contents {
        let name = if yaml_suffix { format!("{logical_name}.yaml") } else { logical_name.clone() };
        write_nested(&tmp_dir, &name, text)?;
    }

    let final_dir = root.join(generator_name);
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir).map_err(|e| Error::io("-", None, e))?;
    }
    fs::rename(&tmp_dir, &final_dir).map_err(|e| Error::io("-", None, e))?;
    Ok(())
}

fn write_nested(root: &Path, relative: &str, text: &str) -> Result<()> {
    let path: PathBuf = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io("-", None, e))?;
    }
    fs::write(&path, text).map_err(|e| Error::io("-", None, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    fn build_archive(path: &Path, manifest: &str, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        zip.start_file(MANIFEST_ENTRY, options).unwrap();
        zip.write_all(manifest.as_bytes()).unwrap();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn loads_templates_and_customizations_for_active_generator() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("lib.zip");
        build_archive(
            &archive_path,
            "name: acme-lib\nversion: \"1.0.0\"\n",
            &[
                ("META-INF/openapi-templates/spring/pojo.mustache", "class {{classname}} {}"),
                ("META-INF/openapi-customizations/spring/pojo.mustache.yaml", "insertions: []\n"),
            ],
        );

        let loaded = load_library(
            &archive_path,
            "spring",
            &Version::new(7, 0, 0),
            &Version::new(1, 0, 0),
            dir.path(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(loaded.templates.get("pojo.mustache").map(String::as_str), Some("class {{classname}} {}"));
        assert!(loaded.customizations.contains_key("pojo.mustache"));
    }

    #[test]
    fn missing_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("lib.zip");
        let file = fs::File::create(&archive_path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        zip.start_file("README.txt", options).unwrap();
        zip.write_all(b"no manifest here").unwrap();
        zip.finish().unwrap();

        let err = load_library(&archive_path, "spring", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap_err();
        assert!(matches!(err, Error::LibraryManifestMissing { .. }));
    }

    #[test]
    fn unsupported_generator_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("lib.zip");
        build_archive(&archive_path, "name: acme-lib\nversion: \"1.0.0\"\nsupported_generators: [micronaut]\n", &[]);

        let loaded = load_library(&archive_path, "spring", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn generator_version_below_minimum_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("lib.zip");
        build_archive(&archive_path, "name: acme-lib\nversion: \"1.0.0\"\nmin_generator_version: \"7.0.0\"\n", &[]);

        let err = load_library(&archive_path, "spring", &Version::new(6, 5, 0), &Version::new(1, 0, 0), dir.path()).unwrap_err();
        assert!(matches!(err, Error::LibraryIncompatible { .. }));
    }

    #[test]
    fn second_load_of_unchanged_archive_is_served_from_extraction_not_reparsed() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("lib.zip");
        build_archive(
            &archive_path,
            "name: acme-lib\nversion: \"1.0.0\"\n",
            &[("META-INF/openapi-templates/spring/pojo.mustache", "V1")],
        );

        let first = load_library(&archive_path, "spring", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap().unwrap();
        assert_eq!(first.templates.get("pojo.mustache").map(String::as_str), Some("V1"));

        // Mutate the extraction in place (not the archive) to a sentinel
        // value. If the second load still re-parsed the zip it would see
        // "V1"; seeing the sentinel proves it read the cached extraction.
        let archive_hash = hash_file(&archive_path).unwrap();
        let extracted_file = dir
            .path()
            .join("library-extracts")
            .join(&archive_hash)
            .join("openapi-templates")
            .join("spring")
            .join("pojo.mustache");
        fs::write(&extracted_file, "CACHED-SENTINEL").unwrap();

        let second = load_library(&archive_path, "spring", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap().unwrap();
        assert_eq!(second.templates.get("pojo.mustache").map(String::as_str), Some("CACHED-SENTINEL"));
    }

    #[test]
    fn two_generators_against_the_same_archive_both_load_their_own_templates() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("lib.zip");
        build_archive(
            &archive_path,
            "name: acme-lib\nversion: \"1.0.0\"\n",
            &[
                ("META-INF/openapi-templates/spring/pojo.mustache", "SPRING-POJO"),
                ("META-INF/openapi-templates/micronaut/pojo.mustache", "MICRONAUT-POJO"),
            ],
        );

        let spring = load_library(&archive_path, "spring", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap().unwrap();
        assert_eq!(spring.templates.get("pojo.mustache").map(String::as_str), Some("SPRING-POJO"));

        // Extracting for a second generator against the same archive-hash
        // directory must not wipe out the first generator's extraction nor
        // incorrectly report empty results for the second.
        let micronaut = load_library(&archive_path, "micronaut", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap().unwrap();
        assert_eq!(micronaut.templates.get("pojo.mustache").map(String::as_str), Some("MICRONAUT-POJO"));

        let spring_again = load_library(&archive_path, "spring", &Version::new(7, 0, 0), &Version::new(1, 0, 0), dir.path()).unwrap().unwrap();
        assert_eq!(spring_again.templates.get("pojo.mustache").map(String::as_str), Some("SPRING-POJO"));
    }
}
