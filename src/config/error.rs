use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure raised by a [`Codec`](super::Codec).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("{codec} decode failed: {message}")]
    Decode { codec: &'static str, message: String },

    #[error("{codec} serialize failed: {message}")]
    Serialize { codec: &'static str, message: String },

    #[error("{codec} deserialize failed: {message}")]
    Deserialize { codec: &'static str, message: String },

    #[error("document root must be a mapping, got {0}")]
    RootNotMapping(&'static str),
}

/// Failure while parsing or executing a template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("template parse error at byte {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("map has no entry for key \"{0}\"")]
    MissingKey(String),

    #[error("can't evaluate field \"{0}\" of a non-mapping value")]
    NotAMapping(String),

    #[error("function \"{0}\" not defined")]
    UnknownFunction(String),

    #[error("error calling {name}: {message}")]
    Function { name: String, message: String },
}

/// Errors surfaced by property sources.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("required config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config input: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to render config template: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("key '{key}' not found: {source}")]
    Lookup { key: String, source: TemplateError },

    #[error("failed to deserialize key '{key}': {source}, data: {data}")]
    Deserialize {
        key: String,
        data: String,
        source: CodecError,
    },

    #[error("failed to serialize value for key '{key}': {message}")]
    Serialize { key: String, message: String },

    #[error("invalid property key '{0}'")]
    InvalidKey(String),

    #[error("no document has been loaded")]
    NotLoaded,

    #[error("operation not supported on a merged view: {0}")]
    Unsupported(&'static str),
}

/// Aggregate of the per-field failures collected while filling a struct.
#[derive(Debug, Default)]
pub struct FillError {
    errors: Vec<ConfigError>,
    invalid: Option<String>,
}

impl FillError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            invalid: Some(message.into()),
        }
    }

    pub(crate) fn push(&mut self, err: ConfigError) {
        self.errors.push(err);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.invalid.is_none()
    }

    /// The individual field errors, in field order.
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    /// Whether the binder itself was misconfigured, as opposed to a field
    /// failing to resolve.
    pub fn is_invalid_binding(&self) -> bool {
        self.invalid.is_some()
    }
}

impl fmt::Display for FillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.invalid {
            return write!(f, "invalid binding: {message}");
        }
        let mut first = true;
        for err in &self.errors {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{err}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FillError {}
