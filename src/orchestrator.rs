//! Orchestrator (§4.10): the public entry point. Builds a per-spec working
//! directory containing the exact templates the downstream generator will
//! consume, reusing a prior build whenever the cache key still matches.
//!
//! **Design note (pinned in `DESIGN.md`):** §4.8 step 1 seeds template
//! resolution from "every logical name appearing under any enabled
//! source's customizations directory" — that's the only template-name
//! source the data model in §3 names. A spec with zero customizations
//! would, read literally, never materialize anything, even a template the
//! host build tool wants unconditionally overridden. Since the downstream
//! generator is an opaque facade exposing only `template_default` and
//! `generator_version` (§4.6, §9's "narrow facade" re-architecture), it
//! cannot enumerate its own full template set for us either. `SpecRequest`
//! closes that gap the same way §6 already does for library archives: an
//! explicit, externally supplied set of `required_templates` that the host
//! build tool always wants present in the working directory, seeded into
//! the resolver alongside the customized set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use semver::Version;

use crate::cache::{
    compute_cache_key, hash_contents_set, hash_dir_tree, hash_manifest_set, CacheKeyInputs, GlobalCache, LocalCache,
    SessionCache,
};
use crate::condition::EvalCtx;
use crate::config::ResolvedSpecConfig;
use crate::engine::{self, EngineReport};
use crate::error::{Error, Result};
use crate::generator_default::{GeneratorDefaultExtractor, GeneratorFacade};
use crate::hash::hash_bytes;
use crate::library::{self, LoadedLibrary};
use crate::plugin_resources;
use crate::resolver::{self, ResolverInputs, TemplatePlan};
use crate::scanner;
use crate::validator;

/// A spec to orchestrate, paired with the template names the host build
/// tool always wants materialized for it regardless of customization
/// (see the module-level design note).
#[derive(Debug, Clone)]
pub struct SpecRequest {
    pub config: ResolvedSpecConfig,
    pub required_templates: BTreeSet<String>,
}

/// What happened when orchestrating one spec.
#[derive(Debug)]
pub enum OrchestrationOutcome {
    CacheHit {
        working_dir: PathBuf,
    },
    Built {
        working_dir: PathBuf,
        reports: BTreeMap<String, EngineReport>,
    },
}

impl OrchestrationOutcome {
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        match self {
            Self::CacheHit { working_dir } | Self::Built { working_dir, .. } => working_dir,
        }
    }

    #[must_use]
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Self::CacheHit { .. })
    }
}

/// Everything the orchestrator needs that comes from outside this spec's
/// own configuration: the archive dependencies on the customization
/// classpath (§6, "a set of archive paths"), the generator facade, shared
/// caches, and the evaluation context's feature/property/env inputs.
pub struct OrchestratorContext {
    pub plugin_version: Version,
    pub build_root: PathBuf,
    pub global_cache: Arc<GlobalCache>,
    pub session_cache: Arc<SessionCache>,
    pub generator_facade: Arc<dyn GeneratorFacade>,
    pub library_archives: Vec<PathBuf>,
    pub features: std::collections::HashSet<String>,
    pub project_props: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub build_type: Option<String>,
    pub cancelled: Arc<AtomicBool>,
}

impl OrchestratorContext {
    fn cancel_check(&self) -> impl Fn() -> bool + '_ {
        || self.cancelled.load(Ordering::Relaxed)
    }
}

/// Runs every spec's orchestration, validating all configurations up front
/// (§4.11 "runs once before any orchestration") so a configuration mistake
/// in one spec never lets a sibling spec start doing I/O.
///
/// Per §5, specs are independent: a fatal error in one spec's orchestration
/// does not stop the others (unless the up-front validation itself failed,
/// which aborts the whole build). Multi-spec parallelism is the caller's
/// responsibility via `rayon`; this function itself is sequential — see
/// [`run_all_parallel`] for the pooled variant.
///
/// # Errors
/// `Error::ConfigurationInvalid` if any spec fails validation.
pub fn run_all(ctx: &OrchestratorContext, requests: &[SpecRequest]) -> Result<Vec<(String, Result<OrchestrationOutcome>)>> {
    let configs: Vec<ResolvedSpecConfig> = requests.iter().map(|r| r.config.clone()).collect();
    validator::validate_all(&configs)?;
    Ok(requests.iter().map(|req| (req.config.spec_name.clone(), run_spec(ctx, req))).collect())
}

/// Parallel variant of [`run_all`]: one `rayon` task per spec, sized to
/// `pool_size` (or the available parallelism when `None`), per §5's
/// "bounded worker pool... one spec per task."
///
/// # Errors
/// `Error::ConfigurationInvalid` if any spec fails validation, or
/// `Error::Message` if the thread pool fails to build.
pub fn run_all_parallel(
    ctx: &OrchestratorContext,
    requests: &[SpecRequest],
    pool_size: Option<usize>,
) -> Result<Vec<(String, Result<OrchestrationOutcome>)>> {
    let configs: Vec<ResolvedSpecConfig> = requests.iter().map(|r| r.config.clone()).collect();
    validator::validate_all(&configs)?;

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = pool_size {
        builder = builder.num_threads(n);
    }
    let pool = builder.build().map_err(|e| Error::message(format!("failed to build worker pool: {e}")))?;

    let results = pool.install(|| {
        use rayon::prelude::*;
        requests.par_iter().map(|req| (req.config.spec_name.clone(), run_spec(ctx, req))).collect::<Vec<_>>()
    });
    Ok(results)
}

/// Orchestrates one spec per §4.10's eight steps.
///
/// # Errors
/// Any of the fatal error variants in [`crate::error::Error`]; the error
/// carries the spec name (and template name / path where applicable).
pub fn run_spec(ctx: &OrchestratorContext, request: &SpecRequest) -> Result<OrchestrationOutcome> {
    let config = &request.config;
    validator::validate_all(std::slice::from_ref(config))?;

    // Step 3: expand template variables to a fixed point before planning
    // any template, rejecting a cycle up front.
    let resolved_variables = engine::validate_variables(&config.spec_name, &config.template_variables)?;

    let generator_version = ctx.generator_facade.generator_version();
    let generator_defaults = GeneratorDefaultExtractor::new(Arc::clone(&ctx.generator_facade));

    let user_templates = scan_text_dir(config.user_template_dir.as_deref(), None);
    let user_customizations = scan_text_dir(config.user_customizations_dir.as_deref(), Some(".yaml"));
    let plugin_customizations = plugin_resources::load_for_generator(&config.generator_name);

    let libraries = load_libraries(ctx, config, &generator_version)?;

    // Step 4: compute the working-directory cache key; a hit returns early
    // without touching the filesystem further.
    let working_dir = working_directory_path(&ctx.build_root, config);
    let cache_key = compute_spec_cache_key(ctx, config, &generator_version, &libraries)?;

    let local_cache = LocalCache::new(working_dir.clone());
    if local_cache.is_valid(&cache_key) {
        tracing::debug!(spec = %config.spec_name, %cache_key, "cache hit, reusing working directory");
        return Ok(OrchestrationOutcome::CacheHit { working_dir });
    }
    tracing::debug!(spec = %config.spec_name, %cache_key, "cache miss, rebuilding working directory");

    std::fs::create_dir_all(&working_dir).map_err(|e| Error::io(config.spec_name.as_str(), None, e))?;
    local_cache.clean_except_cache_key()?;

    let inputs = ResolverInputs {
        config,
        user_templates: &user_templates,
        user_customizations: &user_customizations,
        libraries: &libraries,
        plugin_customizations: &plugin_customizations,
        generator_defaults: &generator_defaults,
    };

    // Step 5/6: build the template plan, transitively closing over
    // dependency includes (§4.5) discovered in each template's *final*
    // text — i.e. after its own customization stack has applied, since a
    // customization's insertion/replacement content can itself introduce a
    // `{{>name}}` reference the base text never had. Each entry is
    // materialized (engine applied, variables expanded) as it's resolved,
    // so the closure loop scans exactly what §4.5 calls "final text".
    let eval_ctx = EvalCtx {
        generator_version: Some(generator_version.clone()),
        template_text: String::new(),
        features: ctx.features.clone(),
        project_props: ctx.project_props.clone(),
        env: ctx.env.clone(),
        build_type: ctx.build_type.clone(),
    };

    let mut names = inputs.customized_logical_names();
    names.extend(request.required_templates.iter().cloned());
    let mut plan = TemplatePlan::default();
    let mut materialized: BTreeMap<String, (String, EngineReport)> = BTreeMap::new();
    let mut discovered: BTreeSet<String> = BTreeSet::new();

    loop {
        let pending: Vec<String> = names.difference(&discovered).cloned().collect();
        if pending.is_empty() {
            break;
        }
        for name in pending {
            if (ctx.cancel_check())() {
                return Err(Error::Cancelled { spec: config.spec_name.clone() });
            }
            let entry = resolver::resolve_one(&inputs, &name)?;

            let (final_text, report) = if entry.has_customizations() {
                engine::apply_stack(
                    &config.spec_name,
                    &name,
                    &entry.base_text,
                    &entry.customization_stack,
                    &resolved_variables,
                    &eval_ctx,
                    &ctx.cancel_check(),
                )?
            } else {
                // No customization stack, so the engine never runs over this
                // template — but §4.4 step 6's variable expansion still
                // applies to its base text regardless.
                let text = engine::substitute_resolved_variables(&entry.base_text, &resolved_variables);
                (text, EngineReport::default())
            };

            let newly_scanned = scanner::scan_inclusions(&final_text);
            discovered.insert(name.clone());
            names.extend(newly_scanned);
            materialized.insert(name.clone(), (final_text, report));
            plan.entries.insert(name, entry);
        }
    }

    let mut content_hashes = BTreeMap::new();
    let mut source_plan = BTreeMap::new();
    let mut reports = BTreeMap::new();

    for (logical_name, entry) in &plan.entries {
        if (ctx.cancel_check())() {
            return Err(Error::Cancelled { spec: config.spec_name.clone() });
        }

        let (final_text, report) = materialized.remove(logical_name).expect("every planned entry was materialized above");

        if entry.has_customizations() {
            let orig_dir = working_dir.join("orig").join(&config.generator_name);
            write_nested(&orig_dir, &format!("{logical_name}.orig"), &entry.base_text)
                .map_err(|e| Error::io(config.spec_name.as_str(), Some(logical_name.clone()), e))?;
        }

        write_nested(&working_dir, logical_name, &final_text)
            .map_err(|e| Error::io(config.spec_name.as_str(), Some(logical_name.clone()), e))?;

        content_hashes.insert(logical_name.clone(), hash_bytes(final_text.as_bytes()));
        source_plan.insert(logical_name.clone(), entry.provenance_string());
        reports.insert(logical_name.clone(), report);
    }

    // Step 7: persist cache metadata atomically.
    local_cache.write(&cache_key, &content_hashes, &source_plan)?;
    let hash_values: Vec<String> = content_hashes.values().cloned().collect();
    ctx.global_cache.record(&cache_key, &hash_values)?;

    Ok(OrchestrationOutcome::Built { working_dir, reports })
}

fn write_nested(root: &Path, relative: &str, text: &str) -> std::io::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)
}

fn working_directory_path(build_root: &Path, config: &ResolvedSpecConfig) -> PathBuf {
    build_root.join("template-work").join(format!("{}-{}", config.generator_name, config.spec_name))
}

fn scan_text_dir(dir: Option<&Path>, required_suffix: Option<&str>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(dir) = dir else { return out };
    if !dir.is_dir() {
        return out;
    }
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_string_lossy().replace('\\', "/");
        let logical_name = match required_suffix {
            Some(suffix) => match rel.strip_suffix(suffix) {
                Some(stripped) => stripped.to_string(),
                None => continue,
            },
            None => rel,
        };
        if let Ok(text) = std::fs::read_to_string(entry.path()) {
            out.insert(logical_name, text);
        }
    }
    out
}

fn load_libraries(
    ctx: &OrchestratorContext,
    config: &ResolvedSpecConfig,
    generator_version: &Version,
) -> Result<Vec<LoadedLibrary>> {
    if !config.use_library_templates && !config.use_library_customizations {
        return Ok(Vec::new());
    }
    let mut libraries = Vec::new();
    for archive_path in &ctx.library_archives {
        let archive_hash = crate::hash::hash_file(archive_path)?;
        let lock = ctx.session_cache.extraction_lock(&archive_hash);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(loaded) = library::load_library(
            archive_path,
            &config.generator_name,
            generator_version,
            &ctx.plugin_version,
            &ctx.global_cache.root,
        )? {
            libraries.push(loaded);
        }
    }
    Ok(libraries)
}

fn compute_spec_cache_key(
    ctx: &OrchestratorContext,
    config: &ResolvedSpecConfig,
    generator_version: &Version,
    libraries: &[LoadedLibrary],
) -> Result<String> {
    let manifests_yaml: Vec<String> =
        libraries.iter().map(|l| serde_yaml::to_string(&l.manifest).unwrap_or_default()).collect();
    let all_content_hashes: Vec<String> = libraries
        .iter()
        .flat_map(|l| l.templates.values().chain(l.customizations.values()))
        .map(|text| hash_bytes(text.as_bytes()))
        .collect();

    compute_cache_key(&CacheKeyInputs {
        plugin_version: &ctx.plugin_version,
        generator_name: &config.generator_name,
        generator_version,
        api_document_path: &config.api_document_path,
        template_source_order: &config.template_source_order,
        apply_plugin_customizations: config.apply_plugin_customizations,
        user_templates_tree_hash: &hash_dir_tree(config.user_template_dir.as_deref()),
        user_customizations_tree_hash: &hash_dir_tree(config.user_customizations_dir.as_deref()),
        plugin_customizations_resources_hash: &plugin_resources::resources_hash(),
        library_manifest_set_hash: &hash_manifest_set(&manifests_yaml),
        library_contents_set_hash: &hash_contents_set(&all_content_hashes),
        template_variables: &config.template_variables,
        generator_options: &config.generator_options,
    })
}
