//! Template Resolver (§4.8): implements the 6-source precedence model.
//!
//! For each required template, walks `template_source_order` from lowest to
//! highest precedence (i.e. generator defaults first, user templates last),
//! tracking which source last supplied a full base text and which
//! customization descriptors accumulated on top of it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::{ResolvedSpecConfig, TemplateSourceTag};
use crate::descriptor::{CustomizationDescriptor, DescriptorContext};
use crate::error::{Error, Result};
use crate::generator_default::GeneratorDefaultExtractor;
use crate::library::LoadedLibrary;

/// Everything the resolver found for one logical template name.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub logical_name: String,
    pub base_source_tag: TemplateSourceTag,
    pub base_text: String,
    pub customization_stack: Vec<CustomizationDescriptor>,
    pub provenance_trail: Vec<TemplateSourceTag>,
}

impl TemplateEntry {
    #[must_use]
    pub fn has_customizations(&self) -> bool {
        !self.customization_stack.is_empty()
    }

    /// Renders the provenance trail the way `.source-plan` records it:
    /// `tag1>tag2>...`.
    #[must_use]
    pub fn provenance_string(&self) -> String {
        self.provenance_trail.iter().map(TemplateSourceTag::as_str).collect::<Vec<_>>().join(">")
    }
}

#[derive(Debug, Default)]
pub struct TemplatePlan {
    pub entries: BTreeMap<String, TemplateEntry>,
}

/// Everything the resolver needs to look things up, gathered by the caller
/// (the Orchestrator) before planning starts. Libraries are listed in their
/// dependency order; among libraries sharing a precedence tier, later
/// entries in this slice dominate earlier ones (see `DESIGN.md` for the
/// pinned resolution of the open question on cross-library ordering).
pub struct ResolverInputs<'a> {
    pub config: &'a ResolvedSpecConfig,
    pub user_templates: &'a BTreeMap<String, String>,
    pub user_customizations: &'a BTreeMap<String, String>,
    pub libraries: &'a [LoadedLibrary],
    pub plugin_customizations: &'a BTreeMap<String, String>,
    pub generator_defaults: &'a GeneratorDefaultExtractor,
}

impl ResolverInputs<'_> {
    /// Step 1 of §4.8: every logical name appearing under any *enabled*
    /// source's customizations directory.
    #[must_use]
    pub fn customized_logical_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        if self.config.template_source_order.contains(&TemplateSourceTag::UserCustomizations) {
            names.extend(self.user_customizations.keys().cloned());
        }
        if self.config.apply_plugin_customizations
            && self.config.template_source_order.contains(&TemplateSourceTag::PluginCustomizations)
        {
            names.extend(self.plugin_customizations.keys().cloned());
        }
        if self.config.use_library_customizations
            && self.config.template_source_order.contains(&TemplateSourceTag::LibraryCustomizations)
        {
            for lib in self.libraries {
                names.extend(lib.customizations.keys().cloned());
            }
        }
        names
    }

    fn tag_enabled(&self, tag: TemplateSourceTag) -> bool {
        if !self.config.template_source_order.contains(&tag) {
            return false;
        }
        match tag {
            TemplateSourceTag::LibraryTemplates => self.config.use_library_templates,
            TemplateSourceTag::LibraryCustomizations => self.config.use_library_customizations,
            TemplateSourceTag::PluginCustomizations => self.config.apply_plugin_customizations,
            _ => true,
        }
    }

    fn full_template_from(&self, tag: TemplateSourceTag, logical_name: &str) -> Option<String> {
        match tag {
            TemplateSourceTag::UserTemplates => self.user_templates.get(logical_name).cloned(),
            TemplateSourceTag::LibraryTemplates => {
                // Later libraries in dependency order dominate earlier ones.
                self.libraries.iter().rev().find_map(|lib| lib.templates.get(logical_name).cloned())
            }
            TemplateSourceTag::OpenapiGenerator => {
                self.generator_defaults.load(&self.config.generator_name, logical_name)
            }
            _ => None,
        }
    }

    fn customization_texts_from(&self, tag: TemplateSourceTag, logical_name: &str) -> Vec<(String, PathBuf)> {
        match tag {
            TemplateSourceTag::UserCustomizations => self
                .user_customizations
                .get(logical_name)
                .map(|text| vec![(text.clone(), PathBuf::from(format!("{logical_name}.yaml")))])
                .unwrap_or_default(),
            TemplateSourceTag::PluginCustomizations => self
                .plugin_customizations
                .get(logical_name)
                .map(|text| vec![(text.clone(), PathBuf::from(format!("plugin:{logical_name}.yaml")))])
                .unwrap_or_default(),
            TemplateSourceTag::LibraryCustomizations => self
                .libraries
                .iter()
                .filter_map(|lib| {
                    lib.customizations.get(logical_name).map(|text| {
                        (text.clone(), PathBuf::from(format!("library:{}/{logical_name}.yaml", lib.manifest.name)))
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Resolves one logical template name per §4.8's algorithm.
///
/// # Errors
/// `Error::BaseTemplateMissing` if no enabled source supplies a base text;
/// `Error::SchemaError` if a customization descriptor fails to parse.
pub fn resolve_one(inputs: &ResolverInputs, logical_name: &str) -> Result<TemplateEntry> {
    let mut base_tag: Option<TemplateSourceTag> = None;
    let mut base_text = String::new();
    let mut stack: Vec<CustomizationDescriptor> = Vec::new();
    let mut provenance: Vec<TemplateSourceTag> = Vec::new();

    // Walk from lowest precedence (highest integer) to highest (lowest
    // integer) among the tags the spec actually configured.
    let mut ordered: Vec<TemplateSourceTag> = inputs.config.template_source_order.clone();
    ordered.sort_by_key(|t| std::cmp::Reverse(t.precedence()));

    for tag in ordered {
        if !inputs.tag_enabled(tag) {
            continue;
        }
        if tag.is_full_template() {
            if let Some(text) = inputs.full_template_from(tag, logical_name) {
                base_text = text;
                base_tag = Some(tag);
                stack.clear();
                provenance.clear();
                provenance.push(tag);
            }
        } else {
            for (text, file) in inputs.customization_texts_from(tag, logical_name) {
                let ctx = DescriptorContext { spec: inputs.config.spec_name.clone(), file };
                let descriptor = CustomizationDescriptor::parse(&text, &ctx)?;
                stack.push(descriptor);
                provenance.push(tag);
            }
        }
    }

    // §4.8 step 3: fall through to openapi-generator even if it wasn't
    // reached above (e.g. not configured as a distinct walk step but always
    // the last-resort source).
    if base_tag.is_none() {
        if let Some(text) = inputs.full_template_from(TemplateSourceTag::OpenapiGenerator, logical_name) {
            base_text = text;
            base_tag = Some(TemplateSourceTag::OpenapiGenerator);
            provenance.insert(0, TemplateSourceTag::OpenapiGenerator);
        }
    }

    let base_tag = base_tag.ok_or_else(|| Error::BaseTemplateMissing {
        spec: inputs.config.spec_name.clone(),
        template: logical_name.to_string(),
    })?;

    Ok(TemplateEntry {
        logical_name: logical_name.to_string(),
        base_source_tag: base_tag,
        base_text,
        customization_stack: stack,
        provenance_trail: provenance,
    })
}

/// Resolves every name in `logical_names` (the customized set, step 1, plus
/// any already-discovered dependency names) into a [`TemplatePlan`].
///
/// # Errors
/// See [`resolve_one`].
pub fn resolve_plan(inputs: &ResolverInputs, logical_names: &BTreeSet<String>) -> Result<TemplatePlan> {
    let mut plan = TemplatePlan::default();
    for name in logical_names {
        let entry = resolve_one(inputs, name)?;
        plan.entries.insert(name.clone(), entry);
    }
    Ok(plan)
}
