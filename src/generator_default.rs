//! Generator-Default Extractor (§4.6): loads a named base template from the
//! downstream generator's own embedded resources.
//!
//! §9's first re-architecture strategy replaces "pervasive runtime
//! reflection over generator internals" with a narrow facade: exactly the
//! two operations the generator's metadata API needs to expose. Nothing in
//! this crate reflects over generator internals directly.

use std::sync::Arc;

use dashmap::DashMap;
use semver::Version;

/// The generator's metadata surface, reduced to the two operations this
/// crate actually needs. Production wiring supplies a real implementation
/// from outside this crate; `StaticGeneratorFacade` in [`crate::testutil`]
/// backs unit tests.
pub trait GeneratorFacade: Send + Sync {
    /// The generator's own default template text for `logical_name`, or
    /// `None` if it does not provide one.
    fn template_default(&self, generator_name: &str, logical_name: &str) -> Option<String>;

    /// The generator's own version, used against `generatorVersion`
    /// conditions and library compatibility checks.
    fn generator_version(&self) -> Version;
}

/// Caches `template_default` lookups for the process lifetime, keyed on
/// `(generator_name, logical_name)`, per §4.6 ("Caches per (generator_name,
/// logical_name) for the process lifetime").
pub struct GeneratorDefaultExtractor {
    facade: Arc<dyn GeneratorFacade>,
    cache: DashMap<(String, String), Option<String>>,
}

impl GeneratorDefaultExtractor {
    #[must_use]
    pub fn new(facade: Arc<dyn GeneratorFacade>) -> Self {
        Self {
            facade,
            cache: DashMap::new(),
        }
    }

    /// Loads `logical_name`'s default text for `generator_name`, consulting
    /// the process-lifetime cache first.
    #[must_use]
    pub fn load(&self, generator_name: &str, logical_name: &str) -> Option<String> {
        let key = (generator_name.to_string(), logical_name.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let value = self.facade.template_default(generator_name, logical_name);
        self.cache.insert(key, value.clone());
        value
    }

    #[must_use]
    pub fn generator_version(&self) -> Version {
        self.facade.generator_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StaticGeneratorFacade;

    #[test]
    fn returns_none_for_unknown_template() {
        let facade = Arc::new(StaticGeneratorFacade::new(Version::new(6, 0, 0)));
        let extractor = GeneratorDefaultExtractor::new(facade);
        assert_eq!(extractor.load("spring", "pojo.mustache"), None);
    }

    #[test]
    fn returns_known_template_and_caches_it() {
        let facade = Arc::new(
            StaticGeneratorFacade::new(Version::new(6, 0, 0))
                .with_default("spring", "pojo.mustache", "class {{classname}} {}"),
        );
        let extractor = GeneratorDefaultExtractor::new(facade.clone());
        assert_eq!(extractor.load("spring", "pojo.mustache").as_deref(), Some("class {{classname}} {}"));
        // Second lookup is served from cache; the facade's call counter
        // should not have advanced past the first call.
        assert_eq!(facade.call_count(), 1);
        assert_eq!(extractor.load("spring", "pojo.mustache").as_deref(), Some("class {{classname}} {}"));
        assert_eq!(facade.call_count(), 1);
    }

    #[test]
    fn distinguishes_by_generator_name() {
        let facade = Arc::new(
            StaticGeneratorFacade::new(Version::new(6, 0, 0))
                .with_default("spring", "pojo.mustache", "spring version"),
        );
        let extractor = GeneratorDefaultExtractor::new(facade);
        assert_eq!(extractor.load("spring", "pojo.mustache").as_deref(), Some("spring version"));
        assert_eq!(extractor.load("micronaut", "pojo.mustache"), None);
    }

    #[test]
    fn exposes_generator_version_from_facade() {
        let facade = Arc::new(StaticGeneratorFacade::new(Version::new(7, 1, 2)));
        let extractor = GeneratorDefaultExtractor::new(facade);
        assert_eq!(extractor.generator_version(), Version::new(7, 1, 2));
    }
}
