//! Template Text Engine (§4.4): applies a stack of customization
//! descriptors to one template's text, in source-precedence order, with
//! partial inlining, condition gating, and variable expansion.

use std::collections::BTreeMap;

use regex::Regex;

use crate::condition::{evaluate, EvalCtx};
use crate::descriptor::{Anchor, AtPosition, CustomizationDescriptor, Insertion, ReplaceKind, Replacement, SmartInsertion, SmartReplacement};
use crate::error::{Error, Result};

const MAX_PARTIAL_DEPTH: usize = 16;
const MAX_VARIABLE_PASSES: usize = 10;

/// One semantic anchor maps to an ordered list of candidate regexes; the
/// first one that matches the template text wins. Unknown semantic anchors
/// are a fatal schema error, per §4.4 point 4.
fn semantic_anchor_candidates(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "after imports block" => Some(&[
            r"(?m)^(?:import [^\n]*;\n)+",
            r"(?m)^package [^\n]*;\n",
        ]),
        "after class open brace" => Some(&[
            r"(?m)^(?:public |private |protected )?(?:final |abstract )?class [^\n{]*\{\n",
        ]),
        "before class close brace" => Some(&[r"\n\}\s*\z"]),
        _ => None,
    }
}

/// What happened when applying one operation from a descriptor.
#[derive(Debug, Clone)]
pub enum OpOutcome {
    Applied,
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone)]
pub enum SkipReason {
    ConditionFalse,
    PatternNotFound { pattern: String },
}

/// Per-template summary of what the engine did.
#[derive(Debug, Clone, Default)]
pub struct EngineReport {
    pub attempted: usize,
    pub applied: usize,
    pub skipped: Vec<(String, SkipReason)>,
    pub bytes_added: usize,
    pub bytes_removed: usize,
}

impl EngineReport {
    fn record(&mut self, op_name: &str, outcome: &OpOutcome) {
        self.attempted += 1;
        match outcome {
            OpOutcome::Applied => self.applied += 1,
            OpOutcome::Skipped { reason } => self.skipped.push((op_name.to_string(), reason.clone())),
        }
    }
}

/// Expands `variables` against themselves to a fixed point without touching
/// any template text, so the Orchestrator can reject a cycle (§4.10 step 3)
/// before planning any template.
///
/// # Errors
/// `Error::VariableCycle` if expansion does not converge in
/// [`MAX_VARIABLE_PASSES`] passes.
pub fn validate_variables(spec: &str, variables: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
    resolve_variable_table(spec, variables)
}

/// Applies an ordered stack of descriptors (least dominant first) to `base`,
/// then expands `{{name}}` variables to a fixed point. Returns the final
/// text and a report.
///
/// # Errors
/// Returns `Error::SchemaError` for unknown semantic anchors, and
/// `Error::VariableCycle` if variable expansion does not converge in
/// [`MAX_VARIABLE_PASSES`] passes.
pub fn apply_stack(
    spec: &str,
    template: &str,
    base: &str,
    stack: &[CustomizationDescriptor],
    variables: &BTreeMap<String, String>,
    ctx_features: &EvalCtx,
    cancelled: &dyn Fn() -> bool,
) -> Result<(String, EngineReport)> {
    let mut text = base.to_string();
    let mut report = EngineReport::default();

    for descriptor in stack {
        if cancelled() {
            return Err(Error::Cancelled { spec: spec.to_string() });
        }
        let mut warnings = Vec::new();
        let mut leaf_ctx = ctx_features.clone();
        leaf_ctx.template_text = text.clone();

        if let Some(cond) = &descriptor.conditions {
            if !evaluate(cond, &leaf_ctx, &mut warnings) {
                continue;
            }
        }

        apply_insertions(spec, template, &descriptor.insertions, &descriptor.partials, &mut text, &leaf_ctx, &mut report)?;
        apply_replacements(spec, template, &descriptor.replacements, &descriptor.partials, &mut text, &leaf_ctx, &mut report)?;
        apply_smart_replacements(&descriptor.smart_replacements, &mut text, &leaf_ctx, &mut report);
        apply_smart_insertions(spec, template, &descriptor.smart_insertions, &mut text, &leaf_ctx, &mut report)?;
    }

    let text = expand_variables(spec, &text, variables)?;
    let (added, removed) = diff_byte_counts(base, &text);
    report.bytes_added = added;
    report.bytes_removed = removed;
    Ok((text, report))
}

/// Counts bytes added and removed between `base` and `final_text` by
/// trimming their common prefix and suffix, the cheap diff summary §4.4
/// asks for (distinct counts, not just a net length delta — an edit that
/// both adds and removes at the same spot nets to a small delta but should
/// still report real churn on both sides).
fn diff_byte_counts(base: &str, final_text: &str) -> (usize, usize) {
    let base = base.as_bytes();
    let final_text = final_text.as_bytes();
    let max_common = base.len().min(final_text.len());

    let mut prefix = 0;
    while prefix < max_common && base[prefix] == final_text[prefix] {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < max_common - prefix
        && base[base.len() - 1 - suffix] == final_text[final_text.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed = base.len() - prefix - suffix;
    let added = final_text.len() - prefix - suffix;
    (added, removed)
}

fn inline_partials(content: &str, partials: &BTreeMap<String, String>, depth: usize) -> String {
    if depth >= MAX_PARTIAL_DEPTH {
        return content.to_string();
    }
    let re = partial_token_regex();
    if !re.is_match(content) {
        return content.to_string();
    }
    let replaced = re.replace_all(content, |caps: &regex::Captures| {
        let name = caps[1].trim();
        // A name with no registered partial is left as-is rather than erased —
        // it may be a generator-level dependency the scanner still needs to see
        // in the final text (§4.5), not a typo to silently swallow.
        partials.get(name).cloned().unwrap_or_else(|| caps[0].to_string())
    });
    if replaced == content {
        replaced.into_owned()
    } else {
        inline_partials(&replaced, partials, depth + 1)
    }
}

fn partial_token_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{>\s*([A-Za-z0-9_.\-/]+)\s*\}\}").expect("valid regex"))
}

#[allow(clippy::too_many_arguments)]
fn apply_insertions(
    spec: &str,
    template: &str,
    insertions: &[Insertion],
    partials: &BTreeMap<String, String>,
    text: &mut String,
    ctx: &EvalCtx,
    report: &mut EngineReport,
) -> Result<()> {
    for (i, insertion) in insertions.iter().enumerate() {
        let mut warnings = Vec::new();
        let gated = insertion
            .conditions
            .as_ref()
            .map_or(true, |c| evaluate(c, ctx, &mut warnings));

        let outcome = if gated {
            let anchor = insertion.anchor(
                &crate::descriptor::DescriptorContext { spec: spec.to_string(), file: std::path::PathBuf::from(template) },
                i,
            )?;
            let content = inline_partials(&insertion.content, partials, 0);
            try_insert(text, &anchor, &content)
        } else if let Some(fallback) = &insertion.fallback {
            let anchor = fallback.anchor(
                &crate::descriptor::DescriptorContext { spec: spec.to_string(), file: std::path::PathBuf::from(template) },
                i,
            )?;
            let content = inline_partials(&fallback.content, partials, 0);
            try_insert(text, &anchor, &content)
        } else {
            OpOutcome::Skipped { reason: SkipReason::ConditionFalse }
        };
        report.record(&format!("insertions[{i}]"), &outcome);
    }
    Ok(())
}

fn try_insert(text: &mut String, anchor: &Anchor, content: &str) -> OpOutcome {
    match anchor {
        Anchor::At(AtPosition::Start) => {
            text.insert_str(0, content);
            OpOutcome::Applied
        }
        Anchor::At(AtPosition::End) => {
            text.push_str(content);
            OpOutcome::Applied
        }
        Anchor::After(pattern) => match text.find(pattern.as_str()) {
            Some(pos) => {
                let insert_at = pos + pattern.len();
                text.insert_str(insert_at, content);
                OpOutcome::Applied
            }
            None => OpOutcome::Skipped { reason: SkipReason::PatternNotFound { pattern: pattern.clone() } },
        },
        Anchor::Before(pattern) => match text.find(pattern.as_str()) {
            Some(pos) => {
                text.insert_str(pos, content);
                OpOutcome::Applied
            }
            None => OpOutcome::Skipped { reason: SkipReason::PatternNotFound { pattern: pattern.clone() } },
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_replacements(
    spec: &str,
    template: &str,
    replacements: &[Replacement],
    partials: &BTreeMap<String, String>,
    text: &mut String,
    ctx: &EvalCtx,
    report: &mut EngineReport,
) -> Result<()> {
    for (i, replacement) in replacements.iter().enumerate() {
        let mut warnings = Vec::new();
        let gated = replacement
            .conditions
            .as_ref()
            .map_or(true, |c| evaluate(c, ctx, &mut warnings));

        let outcome = if gated {
            try_replace(text, replacement, partials)?
        } else if let Some(fallback) = &replacement.fallback {
            try_replace(text, fallback, partials)?
        } else {
            OpOutcome::Skipped { reason: SkipReason::ConditionFalse }
        };
        report.record(&format!("replacements[{i}]"), &outcome);
        let _ = (spec, template);
    }
    Ok(())
}

fn try_replace(text: &mut String, r: &Replacement, partials: &BTreeMap<String, String>) -> Result<OpOutcome> {
    let replace_with = inline_partials(&r.replace, partials, 0);
    match r.kind {
        ReplaceKind::Literal => {
            if let Some(pos) = text.find(r.find.as_str()) {
                text.replace_range(pos..pos + r.find.len(), &replace_with);
                Ok(OpOutcome::Applied)
            } else {
                Ok(OpOutcome::Skipped { reason: SkipReason::PatternNotFound { pattern: r.find.clone() } })
            }
        }
        ReplaceKind::Regex => {
            let re = Regex::new(&r.find).map_err(|e| Error::message(format!("invalid regex `{}`: {e}", r.find)))?;
            if let Some(caps) = re.captures(text) {
                let m = caps.get(0).expect("capture 0 is always the whole match");
                let (start, end) = (m.start(), m.end());
                // `expand` resolves `$1`..`$9` against this match's captures
                // without touching the rest of the text.
                let mut expanded = String::new();
                caps.expand(&replace_with, &mut expanded);
                text.replace_range(start..end, &expanded);
                Ok(OpOutcome::Applied)
            } else {
                Ok(OpOutcome::Skipped { reason: SkipReason::PatternNotFound { pattern: r.find.clone() } })
            }
        }
    }
}

fn apply_smart_replacements(
    smart: &[SmartReplacement],
    text: &mut String,
    ctx: &EvalCtx,
    report: &mut EngineReport,
) {
    for (i, sr) in smart.iter().enumerate() {
        let mut warnings = Vec::new();
        let gated = sr.conditions.as_ref().map_or(true, |c| evaluate(c, ctx, &mut warnings));
        let outcome = if !gated {
            OpOutcome::Skipped { reason: SkipReason::ConditionFalse }
        } else {
            let mut applied = None;
            for pattern in &sr.find_any {
                if let Some(pos) = text.find(pattern.as_str()) {
                    text.replace_range(pos..pos + pattern.len(), &sr.replace);
                    applied = Some(());
                    break;
                }
            }
            match applied {
                Some(()) => OpOutcome::Applied,
                None => OpOutcome::Skipped {
                    reason: SkipReason::PatternNotFound { pattern: sr.find_any.join(" | ") },
                },
            }
        };
        report.record(&format!("smart_replacements[{i}]"), &outcome);
    }
}

fn apply_smart_insertions(
    spec: &str,
    template: &str,
    smart: &[SmartInsertion],
    text: &mut String,
    ctx: &EvalCtx,
    report: &mut EngineReport,
) -> Result<()> {
    for (i, si) in smart.iter().enumerate() {
        let mut warnings = Vec::new();
        let gated = si.conditions.as_ref().map_or(true, |c| evaluate(c, ctx, &mut warnings));
        if !gated {
            report.record(&format!("smart_insertions[{i}]"), &OpOutcome::Skipped { reason: SkipReason::ConditionFalse });
            continue;
        }
        let candidates = semantic_anchor_candidates(&si.semantic_anchor).ok_or_else(|| Error::SchemaError {
            spec: spec.to_string(),
            template: template.to_string(),
            file: std::path::PathBuf::from(template),
            line: 0,
            reason: format!("unknown semantic anchor: {}", si.semantic_anchor),
        })?;

        let mut outcome = OpOutcome::Skipped {
            reason: SkipReason::PatternNotFound { pattern: si.semantic_anchor.clone() },
        };
        for pattern in candidates {
            let re = Regex::new(pattern).expect("built-in semantic anchor regex is valid");
            if let Some(m) = re.find(text) {
                text.insert_str(m.end(), &si.content);
                outcome = OpOutcome::Applied;
                break;
            }
        }
        report.record(&format!("smart_insertions[{i}]"), &outcome);
    }
    Ok(())
}

/// Substitutes `{{name}}` tokens from `variables` to a fixed point.
/// `variables` values may themselves reference other names; a 10th pass
/// that still changes output is a cycle.
fn expand_variables(spec: &str, text: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    let resolved = resolve_variable_table(spec, variables)?;
    Ok(substitute_tokens(text, &resolved))
}

/// Substitutes `{{name}}` tokens into `text` from an already-resolved
/// variable table (one whose own `{{name}}` cross-references were already
/// expanded to a fixed point by [`validate_variables`]). Used for templates
/// that received no customization stack, which otherwise skip the engine
/// entirely and would leave `{{name}}` tokens unexpanded (§4.4 step 6 applies
/// regardless of whether any structural edits ran).
#[must_use]
pub fn substitute_resolved_variables(text: &str, resolved_variables: &BTreeMap<String, String>) -> String {
    substitute_tokens(text, resolved_variables)
}

/// Expands `{{name}}` references *within variable values themselves* to a
/// fixed point (distinct from substituting them into the template text).
fn resolve_variable_table(spec: &str, variables: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
    let mut current = variables.clone();
    for _ in 0..MAX_VARIABLE_PASSES {
        let next = substitute_once_all(&current);
        if next == current {
            return Ok(current);
        }
        current = next;
    }
    let next = substitute_once_all(&current);
    if next == current {
        Ok(current)
    } else {
        Err(Error::VariableCycle { spec: spec.to_string() })
    }
}

fn substitute_once_all(vars: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    vars.iter()
        .map(|(k, v)| (k.clone(), substitute_tokens(v, vars)))
        .collect()
}

fn substitute_tokens(text: &str, vars: &BTreeMap<String, String>) -> String {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid regex"));
    re.replace_all(text, |caps: &regex::Captures| {
        let name = caps[1].trim();
        vars.get(name).cloned().unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}
