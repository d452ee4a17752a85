use std::path::PathBuf;

/// Error taxonomy for the template orchestration core.
///
/// Each variant carries enough structured context (spec name, template name
/// when known, source path/line when applicable) to render the
/// `"<error-kind>: <spec>[/<template>][:<file>:<line>]: <reason>"` message
/// format described by the specification.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("ConfigurationInvalid: {}", .messages.join("; "))]
    ConfigurationInvalid { messages: Vec<String> },

    #[error("SchemaError: {spec}[/{template}]:{file}:{line}: {reason}", file = .file.display())]
    SchemaError {
        spec: String,
        template: String,
        file: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("BaseTemplateMissing: {spec}/{template}: no source in template_source_order supplied a base")]
    BaseTemplateMissing { spec: String, template: String },

    #[error("PatternNotFound: {spec}/{template}: pattern did not match: {pattern}")]
    PatternNotFound {
        spec: String,
        template: String,
        pattern: String,
    },

    #[error("LibraryManifestMissing: {archive}: META-INF/openapi-library.yaml not found")]
    LibraryManifestMissing { archive: PathBuf },

    #[error("LibraryIncompatible: {library}: {reason}")]
    LibraryIncompatible { library: String, reason: String },

    #[error("VariableCycle: {spec}: template variables did not converge in 10 passes")]
    VariableCycle { spec: String },

    #[error("IoError: {spec}[/{template}]: {source}", template = .template.as_deref().unwrap_or("-"))]
    IoError {
        spec: String,
        template: Option<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("Cancelled: {spec}")]
    Cancelled { spec: String },

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    #[must_use]
    pub fn io(spec: impl Into<String>, template: Option<String>, source: std::io::Error) -> Self {
        Self::IoError {
            spec: spec.into(),
            template,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
