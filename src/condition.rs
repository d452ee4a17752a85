//! Condition tree and its total evaluator.
//!
//! Evaluation never throws: an unknown feature evaluates to `false`, a
//! malformed version constraint evaluates its leaf to `false` and is
//! reported on the side as a warning rather than aborting the whole tree.

use std::collections::{BTreeMap, HashSet};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// The evaluation context a `Cond` tree is checked against.
#[derive(Debug, Clone, Default)]
pub struct EvalCtx {
    pub generator_version: Option<Version>,
    pub template_text: String,
    pub features: HashSet<String>,
    pub project_props: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub build_type: Option<String>,
}

/// A side-channel diagnostic produced while evaluating a condition tree.
/// Malformed leaves never abort evaluation; they degrade to `false` and
/// leave one of these behind so the orchestrator can surface it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalWarning {
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cond {
    GeneratorVersion(String),
    TemplateContains(String),
    TemplateNotContains(String),
    TemplateContainsAll(Vec<String>),
    TemplateContainsAny(Vec<String>),
    HasFeature(String),
    HasAllFeatures(Vec<String>),
    HasAnyFeatures(Vec<String>),
    ProjectProperty(NameValue),
    EnvVar(NameValue),
    BuildType(String),
    AllOf(Vec<Cond>),
    AnyOf(Vec<Cond>),
    Not(Box<Cond>),
}

/// `name[=value]` — presence-only when `value` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: Option<String>,
}

/// Evaluates `cond` against `ctx`, collecting any warnings into `warnings`.
/// Total: always returns a `bool`, never panics or errors.
pub fn evaluate(cond: &Cond, ctx: &EvalCtx, warnings: &mut Vec<EvalWarning>) -> bool {
    match cond {
        Cond::GeneratorVersion(range) => match &ctx.generator_version {
            Some(v) => match parse_range(range) {
                Some(req) => req.matches(v),
                None => {
                    warnings.push(EvalWarning {
                        detail: format!("malformed version range: {range}"),
                    });
                    false
                }
            },
            None => false,
        },
        Cond::TemplateContains(s) => ctx.template_text.contains(s.as_str()),
        Cond::TemplateNotContains(s) => !ctx.template_text.contains(s.as_str()),
        Cond::TemplateContainsAll(items) => {
            items.iter().all(|s| ctx.template_text.contains(s.as_str()))
        }
        Cond::TemplateContainsAny(items) => {
            items.iter().any(|s| ctx.template_text.contains(s.as_str()))
        }
        Cond::HasFeature(f) => ctx.features.contains(f),
        Cond::HasAllFeatures(items) => items.iter().all(|f| ctx.features.contains(f)),
        Cond::HasAnyFeatures(items) => items.iter().any(|f| ctx.features.contains(f)),
        Cond::ProjectProperty(nv) => check_name_value(&ctx.project_props, nv),
        Cond::EnvVar(nv) => check_name_value(&ctx.env, nv),
        Cond::BuildType(bt) => ctx.build_type.as_deref() == Some(bt.as_str()),
        Cond::AllOf(items) => items.iter().all(|c| evaluate(c, ctx, warnings)),
        Cond::AnyOf(items) => items.iter().any(|c| evaluate(c, ctx, warnings)),
        Cond::Not(inner) => !evaluate(inner, ctx, warnings),
    }
}

fn check_name_value(map: &BTreeMap<String, String>, nv: &NameValue) -> bool {
    match &nv.value {
        Some(expected) => map.get(&nv.name).is_some_and(|v| v == expected),
        None => map.contains_key(&nv.name),
    }
}

/// Translates the spec's `>=, >, <=, <, =, ~, ^` grammar into a
/// `semver::VersionReq`. `~1.2.3` and `^1.2.3` are expanded explicitly
/// because `semver`'s own `^` default differs subtly from the spec's
/// "admits `>=1.2.3 <2.0.0`" contract once partial versions are involved, so
/// we pin the exact comparator set ourselves rather than rely on caret
/// defaults.
fn parse_range(range: &str) -> Option<VersionReq> {
    let range = range.trim();
    if let Some(rest) = range.strip_prefix('~') {
        let base = parse_version_lenient(rest)?;
        let upper = Version::new(base.major, base.minor + 1, 0);
        return VersionReq::parse(&format!(">={base}, <{upper}")).ok();
    }
    if let Some(rest) = range.strip_prefix('^') {
        let base = parse_version_lenient(rest)?;
        let upper = Version::new(base.major + 1, 0, 0);
        return VersionReq::parse(&format!(">={base}, <{upper}")).ok();
    }
    if let Some(rest) = range.strip_prefix("=") {
        let base = parse_version_lenient(rest)?;
        return VersionReq::parse(&format!("={base}")).ok();
    }
    VersionReq::parse(range).ok()
}

fn parse_version_lenient(s: &str) -> Option<Version> {
    let s = s.trim();
    Version::parse(s).ok().or_else(|| {
        let parts: Vec<&str> = s.splitn(3, '.').collect();
        let major = parts.first()?.parse().ok()?;
        let minor = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Version::new(major, minor, patch))
    })
}
