//! Template orchestration and customization core for an OpenAPI-to-Java-DTO
//! code generation build plugin: resolves, customizes, and materializes the
//! per-spec template set a downstream generator consumes, across six
//! provenance tiers and a two-level on-disk cache.

mod cache;
mod condition;
mod config;
mod descriptor;
mod engine;
mod error;
mod generator_default;
mod hash;
mod library;
mod orchestrator;
mod plugin_resources;
mod properties;
mod resolver;
mod scanner;
pub mod testutil;
mod validator;

pub use cache::{compute_cache_key, hash_dir_tree, CacheKeyInputs, GlobalCache, LocalCache, SessionCache};
pub use condition::{Cond, EvalCtx, EvalWarning, NameValue};
pub use config::{ResolvedSpecConfig, TemplateSourceTag};
pub use descriptor::{
    Anchor, AtPosition, CustomizationDescriptor, DescriptorContext, DescriptorMetadata, Insertion, ReplaceKind,
    Replacement, SmartInsertion, SmartReplacement,
};
pub use engine::{EngineReport, OpOutcome, SkipReason};
pub use error::{Error, Result};
pub use generator_default::{GeneratorDefaultExtractor, GeneratorFacade};
pub use hash::Hex32;
pub use library::{LibraryManifest, LoadedLibrary};
pub use orchestrator::{run_all, run_all_parallel, run_spec, OrchestrationOutcome, OrchestratorContext, SpecRequest};
pub use resolver::{TemplateEntry, TemplatePlan};
pub use scanner::scan_inclusions;
pub use validator::validate_all;
