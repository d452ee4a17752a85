//! Dependency Scanner (§4.5): finds `{{>name}}` inclusion tokens in one
//! template's text. Transitive closure over newly discovered templates is
//! the Orchestrator's job, not this module's — it only sees one text at a
//! time.

use std::collections::BTreeSet;

use regex::Regex;

/// The same token grammar the Template Text Engine inlines against, kept
/// independent so the scanner has no dependency on `engine`.
fn inclusion_token_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{>\s*([A-Za-z0-9_.\-/]+)\s*\}\}").expect("valid regex"))
}

/// Returns the set of logical names referenced by `{{>name}}` tokens in
/// `text`. Whitespace around the name is tolerated; duplicates collapse.
#[must_use]
pub fn scan_inclusions(text: &str) -> BTreeSet<String> {
    inclusion_token_regex()
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}
