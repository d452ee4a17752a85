//! Configuration Validator (§4.11): runs once before any orchestration and
//! accumulates every violation instead of stopping at the first one.

use std::collections::HashSet;

use regex::Regex;

use crate::config::{ResolvedSpecConfig, TemplateSourceTag};
use crate::error::Error;

/// Java reserved keywords, checked against `model_package` segments. Small
/// closed set, so a `HashSet` would be over-engineering for a handful of
/// `contains` checks evaluated once per validation pass.
const JAVA_RESERVED_WORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally", "float",
    "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "package", "private", "protected", "public", "return", "short", "static",
    "strictfp", "super", "switch", "synchronized", "this", "throw", "throws", "transient", "try",
    "void", "volatile", "while", "true", "false", "null", "var", "record", "yield",
];

const ALLOWED_DATE_LIBRARIES: &[&str] = &["java8", "java8-localdatetime", "joda", "legacy"];

fn spec_name_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"))
}

fn identifier_segment_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Validates every resolved spec configuration in one build, accumulating
/// all violations across all specs before returning.
///
/// # Errors
/// `Error::ConfigurationInvalid` carrying every message found, or `Ok(())`
/// if every spec passed.
pub fn validate_all(specs: &[ResolvedSpecConfig]) -> Result<(), Error> {
    let mut messages = Vec::new();

    let mut seen_names = HashSet::new();
    for spec in specs {
        let lower = spec.spec_name.to_lowercase();
        if !seen_names.insert(lower) {
            messages.push(format!("{}: duplicate spec_name (case-insensitive)", spec.spec_name));
        }
    }

    for spec in specs {
        validate_one(spec, &mut messages);
    }

    if messages.is_empty() {
        Ok(())
    } else {
        tracing::warn!(violation_count = messages.len(), "rejecting build: configuration validation failed");
        Err(Error::ConfigurationInvalid { messages })
    }
}

fn validate_one(spec: &ResolvedSpecConfig, messages: &mut Vec<String>) {
    let prefix = |msg: &str| format!("{}: {msg}", spec.spec_name);

    if !spec_name_regex().is_match(&spec.spec_name) {
        messages.push(prefix("spec_name must match ^[A-Za-z][A-Za-z0-9_]*$"));
    }

    match spec.api_document_path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml" | "json") => {}
        _ => messages.push(prefix("api_document_path must have extension .yaml, .yml, or .json")),
    }
    if !spec.api_document_path.is_file() {
        messages.push(prefix(&format!(
            "api_document_path does not exist or is not a regular file: {}",
            spec.api_document_path.display()
        )));
    }

    validate_model_package(&spec.model_package, messages, &prefix);

    let mut seen_tags = HashSet::new();
    for tag in &spec.template_source_order {
        if !seen_tags.insert(*tag) {
            messages.push(prefix(&format!("template_source_order contains duplicate tag: {tag}")));
        }
    }
    if spec.use_library_templates && !spec.template_source_order.contains(&TemplateSourceTag::LibraryTemplates) {
        messages.push(prefix("use_library_templates=true but library-templates not in template_source_order"));
    }
    if spec.use_library_customizations
        && !spec.template_source_order.contains(&TemplateSourceTag::LibraryCustomizations)
    {
        messages.push(prefix("use_library_customizations=true but library-customizations not in template_source_order"));
    }

    for (key, value) in &spec.generator_options {
        if is_boolean_option(key) && value != "true" && value != "false" {
            messages.push(prefix(&format!("generator_options[{key}] must be \"true\" or \"false\", got {value:?}")));
        }
    }

    if let Some(date_library) = spec.additional_properties.get("date_library").or_else(|| spec.generator_options.get("date_library")) {
        if !ALLOWED_DATE_LIBRARIES.contains(&date_library.as_str()) {
            messages.push(prefix(&format!("date_library {date_library:?} is not in the allowed set {ALLOWED_DATE_LIBRARIES:?}")));
        }
    }

    let use_spring_boot_3 = flag_value(spec, "use_spring_boot_3");
    let use_jakarta_ee = flag_value(spec, "use_jakarta_ee");
    if use_spring_boot_3 == Some(false) && use_jakarta_ee == Some(true) {
        messages.push(prefix("use_spring_boot_3=false conflicts with use_jakarta_ee=true"));
    }

    if let Some(dir) = &spec.user_template_dir {
        if !dir.is_dir() {
            messages.push(prefix(&format!("user_template_dir does not exist or is not a directory: {}", dir.display())));
        }
    }
    if let Some(dir) = &spec.user_customizations_dir {
        if !dir.is_dir() {
            messages.push(prefix(&format!("user_customizations_dir does not exist or is not a directory: {}", dir.display())));
        }
    }
}

fn flag_value(spec: &ResolvedSpecConfig, key: &str) -> Option<bool> {
    spec.generator_options
        .get(key)
        .or_else(|| spec.additional_properties.get(key))
        .map(|v| v == "true")
}

fn is_boolean_option(key: &str) -> bool {
    key.starts_with("use_") || key.ends_with("_enabled") || key == "skipDefaultInterface"
}

fn validate_model_package(package: &str, messages: &mut Vec<String>, prefix: &dyn Fn(&str) -> String) {
    if package.is_empty() {
        messages.push(prefix("model_package must not be empty"));
        return;
    }
    for segment in package.split('.') {
        if !identifier_segment_regex().is_match(segment) {
            messages.push(prefix(&format!("model_package segment {segment:?} is not a valid Java identifier")));
            continue;
        }
        if JAVA_RESERVED_WORDS.contains(&segment) {
            messages.push(prefix(&format!("model_package segment {segment:?} is a reserved Java keyword")));
        }
    }
}
