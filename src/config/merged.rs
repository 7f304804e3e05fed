//! Read-only composition of several property sources.

use std::io::Read;
use std::sync::Arc;

use tracing::trace;

use super::codec::Codec;
use super::source::{PropertySource, ValueSink};
use super::ConfigError;

/// An ordered, read-only view over several sources. Earlier sources win.
///
/// The two lookup kinds resolve precedence differently:
///
/// - [`get`](PropertySource::get) takes the first non-empty string. If every
///   source comes up empty, the last source answers with the caller's default,
///   so an empty value early in the list never shadows a later one.
/// - typed lookups take the first source that succeeds, including
///   deserialization, and otherwise report the last error.
///
/// The view holds no lock of its own: a lookup is not a snapshot across
/// sources, and a source may be reloaded while another one is consulted.
#[derive(Debug, Clone, Default)]
pub struct MergedProperties {
    sources: Vec<Arc<dyn PropertySource>>,
}

impl MergedProperties {
    pub fn new(sources: Vec<Arc<dyn PropertySource>>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Arc<dyn PropertySource>] {
        &self.sources
    }
}

/// Merges `sources` into a [`MergedProperties`] view.
pub fn merge<I>(sources: I) -> MergedProperties
where
    I: IntoIterator<Item = Arc<dyn PropertySource>>,
{
    MergedProperties::new(sources.into_iter().collect())
}

impl PropertySource for MergedProperties {
    fn set_value_reader(&self, _reader: Arc<dyn Codec>) -> Result<(), ConfigError> {
        Err(ConfigError::Unsupported("set_value_reader"))
    }

    fn set_value_loader(&self, _loader: Arc<dyn Codec>) -> Result<(), ConfigError> {
        Err(ConfigError::Unsupported("set_value_loader"))
    }

    fn read_value(&self, _input: &mut dyn Read) -> Result<(), ConfigError> {
        Err(ConfigError::Unsupported("read_value"))
    }

    fn get(&self, key: &str, default: &str) -> String {
        let Some((last, rest)) = self.sources.split_last() else {
            return default.to_string();
        };

        for (index, source) in rest.iter().enumerate() {
            let value = source.get(key, "");
            if !value.is_empty() {
                trace!(key, index, "merged property found");
                return value;
            }
        }
        last.get(key, default)
    }

    fn with_value(&self, key: &str, sink: &mut ValueSink<'_>) -> Result<(), ConfigError> {
        let mut last_err = ConfigError::NotLoaded;
        for (index, source) in self.sources.iter().enumerate() {
            match source.with_value(key, sink) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    trace!(key, index, error = %err, "merged typed lookup fell through");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}
