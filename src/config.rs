//! Resolved Spec Configuration and the Template Source Tag enum (§3).
//!
//! `ResolvedSpecConfig` is immutable once constructed — nothing in this
//! crate mutates one after planning starts, matching the "Resolved
//! configurations are created at planning time, never mutated thereafter"
//! lifecycle invariant.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One of the six provenance tiers a template or customization can come
/// from, ordered by precedence (`precedence()` returns the integers from
/// §3: lower wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateSourceTag {
    UserTemplates,
    UserCustomizations,
    LibraryTemplates,
    LibraryCustomizations,
    PluginCustomizations,
    OpenapiGenerator,
}

impl TemplateSourceTag {
    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::UserTemplates => 1,
            Self::UserCustomizations => 2,
            Self::LibraryTemplates => 3,
            Self::LibraryCustomizations => 4,
            Self::PluginCustomizations => 5,
            Self::OpenapiGenerator => 6,
        }
    }

    /// Whether this tag supplies a full base template (as opposed to a
    /// customization descriptor layered atop one).
    #[must_use]
    pub fn is_full_template(self) -> bool {
        matches!(self, Self::UserTemplates | Self::LibraryTemplates | Self::OpenapiGenerator)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserTemplates => "user-templates",
            Self::UserCustomizations => "user-customizations",
            Self::LibraryTemplates => "library-templates",
            Self::LibraryCustomizations => "library-customizations",
            Self::PluginCustomizations => "plugin-customizations",
            Self::OpenapiGenerator => "openapi-generator",
        }
    }

    #[must_use]
    pub fn all() -> [Self; 6] {
        [
            Self::UserTemplates,
            Self::UserCustomizations,
            Self::LibraryTemplates,
            Self::LibraryCustomizations,
            Self::PluginCustomizations,
            Self::OpenapiGenerator,
        ]
    }
}

impl std::fmt::Display for TemplateSourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable input per specification, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSpecConfig {
    pub spec_name: String,
    pub generator_name: String,
    pub api_document_path: PathBuf,
    pub model_package: String,
    pub output_directory: PathBuf,
    pub user_template_dir: Option<PathBuf>,
    pub user_customizations_dir: Option<PathBuf>,
    pub template_source_order: Vec<TemplateSourceTag>,
    pub apply_plugin_customizations: bool,
    pub use_library_templates: bool,
    pub use_library_customizations: bool,
    pub template_variables: BTreeMap<String, String>,
    pub generator_options: BTreeMap<String, String>,
    pub global_properties: BTreeMap<String, String>,
    pub import_mappings: BTreeMap<String, String>,
    pub type_mappings: BTreeMap<String, String>,
    pub additional_properties: BTreeMap<String, String>,
}

impl ResolvedSpecConfig {
    /// Merges `overrides` atop `defaults`, per-key override-by-presence, for
    /// the five string→string mapping fields §3 names
    /// (`generator_options`, `global_properties`, `import_mappings`,
    /// `type_mappings`, `additional_properties`).
    #[must_use]
    pub fn merge_map(
        defaults: &BTreeMap<String, String>,
        overrides: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut merged = defaults.clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_ordering_matches_spec() {
        assert_eq!(TemplateSourceTag::UserTemplates.precedence(), 1);
        assert_eq!(TemplateSourceTag::OpenapiGenerator.precedence(), 6);
        assert!(TemplateSourceTag::UserTemplates < TemplateSourceTag::UserCustomizations);
    }

    #[test]
    fn full_template_tags() {
        assert!(TemplateSourceTag::UserTemplates.is_full_template());
        assert!(TemplateSourceTag::LibraryTemplates.is_full_template());
        assert!(TemplateSourceTag::OpenapiGenerator.is_full_template());
        assert!(!TemplateSourceTag::UserCustomizations.is_full_template());
        assert!(!TemplateSourceTag::LibraryCustomizations.is_full_template());
        assert!(!TemplateSourceTag::PluginCustomizations.is_full_template());
    }

    #[test]
    fn merge_map_overrides_by_key() {
        let defaults = BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        let overrides = BTreeMap::from([("b".to_string(), "20".to_string())]);
        let merged = ResolvedSpecConfig::merge_map(&defaults, &overrides);
        assert_eq!(merged.get("a").map(String::as_str), Some("1"));
        assert_eq!(merged.get("b").map(String::as_str), Some("20"));
    }

    #[test]
    fn serde_round_trips_kebab_case_tags() {
        let json = serde_json::to_string(&TemplateSourceTag::UserCustomizations).unwrap();
        assert_eq!(json, "\"user-customizations\"");
        let back: TemplateSourceTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TemplateSourceTag::UserCustomizations);
    }
}
