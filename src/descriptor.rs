//! Parses customization descriptors (§3, §4.3) into typed records using
//! `serde_yaml`'s safe loader — there is no dynamic YAML object model
//! exposed to callers, so "rejects arbitrary object tags" falls out of the
//! type system rather than needing a bespoke tag allowlist.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::condition::Cond;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplaceKind {
    Literal,
    Regex,
}

impl Default for ReplaceKind {
    fn default() -> Self {
        Self::Literal
    }
}

/// Raw on-disk shape of an insertion anchor: at most one of `after`,
/// `before`, `at` may be set. Validated in [`CustomizationDescriptor::parse`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawAnchor {
    after: Option<String>,
    before: Option<String>,
    at: Option<AtPosition>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AtPosition {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Anchor {
    After(String),
    Before(String),
    At(AtPosition),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Insertion {
    #[serde(flatten)]
    anchor: RawAnchor,
    pub content: String,
    pub conditions: Option<Cond>,
    pub fallback: Option<Box<Insertion>>,
}

impl Insertion {
    /// Validated accessor: the raw on-disk anchor fields, collapsed to
    /// exactly one `Anchor`, or a `SchemaError` if zero or more than one
    /// were set.
    pub fn anchor(&self, ctx: &DescriptorContext, index: usize) -> Result<Anchor> {
        resolve_anchor(&self.anchor, ctx, &format!("insertions[{index}]"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
    #[serde(default)]
    pub kind: ReplaceKind,
    pub conditions: Option<Cond>,
    pub fallback: Option<Box<Replacement>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SmartReplacement {
    pub find_any: Vec<String>,
    pub replace: String,
    pub conditions: Option<Cond>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SmartInsertion {
    pub semantic_anchor: String,
    pub content: String,
    pub conditions: Option<Cond>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CustomizationDescriptor {
    pub metadata: Option<DescriptorMetadata>,
    pub conditions: Option<Cond>,
    #[serde(default)]
    pub insertions: Vec<Insertion>,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
    #[serde(default)]
    pub smart_replacements: Vec<SmartReplacement>,
    #[serde(default)]
    pub smart_insertions: Vec<SmartInsertion>,
    #[serde(default)]
    pub partials: BTreeMap<String, String>,
}

/// Location context attached to schema errors: which file, for which spec.
#[derive(Debug, Clone)]
pub struct DescriptorContext {
    pub spec: String,
    pub file: PathBuf,
}

impl CustomizationDescriptor {
    /// Parses and structurally validates one descriptor file's contents.
    ///
    /// # Errors
    /// Returns [`Error::SchemaError`] on malformed YAML or a structural
    /// violation (insertion missing exactly one anchor kind, etc).
    pub fn parse(yaml: &str, ctx: &DescriptorContext) -> Result<Self> {
        let descriptor: Self = serde_yaml::from_str(yaml).map_err(|e| {
            let line = e.location().map_or(0, |l| l.line());
            Error::SchemaError {
                spec: ctx.spec.clone(),
                template: String::new(),
                file: ctx.file.clone(),
                line,
                reason: e.to_string(),
            }
        })?;

        for (i, insertion) in descriptor.insertions.iter().enumerate() {
            insertion.anchor(ctx, i)?;
            if let Some(fb) = &insertion.fallback {
                fb.anchor(ctx, i)?;
            }
        }
        for (i, replacement) in descriptor.replacements.iter().enumerate() {
            validate_replacement_chain(replacement, ctx, &format!("replacements[{i}]"))?;
        }

        Ok(descriptor)
    }

    /// Convenience: parse from a file on disk.
    pub fn load(path: &Path, spec: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(spec, None, e))?;
        Self::parse(
            &text,
            &DescriptorContext {
                spec: spec.to_string(),
                file: path.to_path_buf(),
            },
        )
    }
}

/// Validates `find` is non-empty on `replacement` and, recursively, on
/// every `fallback` in its chain — a fallback reached only when its own
/// `conditions` fail is just as reachable at apply time as the top-level
/// replacement, so it needs the same "find is required" guarantee.
fn validate_replacement_chain(replacement: &Replacement, ctx: &DescriptorContext, doc_path: &str) -> Result<()> {
    if replacement.find.is_empty() {
        return Err(schema_error(ctx, doc_path, "find is required"));
    }
    if let Some(fallback) = &replacement.fallback {
        validate_replacement_chain(fallback, ctx, &format!("{doc_path}.fallback"))?;
    }
    Ok(())
}

fn resolve_anchor(raw: &RawAnchor, ctx: &DescriptorContext, doc_path: &str) -> Result<Anchor> {
    let set_count =
        raw.after.is_some() as u8 + raw.before.is_some() as u8 + raw.at.is_some() as u8;
    if set_count != 1 {
        return Err(schema_error(
            ctx,
            doc_path,
            "insertion must set exactly one of after, before, at",
        ));
    }
    if let Some(p) = &raw.after {
        return Ok(Anchor::After(p.clone()));
    }
    if let Some(p) = &raw.before {
        return Ok(Anchor::Before(p.clone()));
    }
    Ok(Anchor::At(raw.at.expect("checked above")))
}

fn schema_error(ctx: &DescriptorContext, doc_path: &str, reason: &str) -> Error {
    Error::SchemaError {
        spec: ctx.spec.clone(),
        template: doc_path.to_string(),
        file: ctx.file.clone(),
        line: 0,
        reason: reason.to_string(),
    }
}
