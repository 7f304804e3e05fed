use std::fmt;
use std::io::Read;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::codec::{decode_as, Codec};
use super::ConfigError;

/// Receives the loader-encoded text of a typed lookup together with the
/// codec that produced it.
pub type ValueSink<'a> = dyn FnMut(&str, &dyn Codec) -> Result<(), ConfigError> + 'a;

/// A readable set of properties addressed by dotted paths.
///
/// [`get`](Self::get) never fails: any problem falls back to the default.
/// Typed lookups go through [`PropertySourceExt::get_value`] and report
/// their first error.
pub trait PropertySource: Send + Sync + fmt::Debug {
    /// Replaces the codec that decodes documents.
    fn set_value_reader(&self, reader: Arc<dyn Codec>) -> Result<(), ConfigError>;

    /// Replaces the codec used for typed lookups.
    fn set_value_loader(&self, loader: Arc<dyn Codec>) -> Result<(), ConfigError>;

    /// Templates and decodes a new document from `input`.
    fn read_value(&self, input: &mut dyn Read) -> Result<(), ConfigError>;

    /// Returns the value at `key` in printed form, or `default` if it cannot
    /// be resolved.
    fn get(&self, key: &str, default: &str) -> String;

    /// Resolves `key` in typed mode and passes the encoded text to `sink`.
    ///
    /// The result is whatever `sink` returns, or the lookup error.
    fn with_value(&self, key: &str, sink: &mut ValueSink<'_>) -> Result<(), ConfigError>;
}

/// Typed helpers available on every [`PropertySource`], including trait
/// objects.
pub trait PropertySourceExt: PropertySource {
    /// Deserializes the value at `key` into `T`.
    ///
    /// The empty key addresses the whole document.
    fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let mut out = None;
        self.with_value(key, &mut |data: &str, loader: &dyn Codec| {
            let value = decode_as(loader, data).map_err(|source| ConfigError::Deserialize {
                key: key.to_string(),
                data: data.to_string(),
                source,
            })?;
            out = Some(value);
            Ok(())
        })?;
        out.ok_or(ConfigError::NotLoaded)
    }

    /// Like [`get_value`](Self::get_value), with `default` on any error.
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_value(key).unwrap_or(default)
    }

    fn load_str(&self, text: &str) -> Result<(), ConfigError> {
        self.read_value(&mut text.as_bytes())
    }

    fn load_bytes(&self, bytes: &[u8]) -> Result<(), ConfigError> {
        self.read_value(&mut &bytes[..])
    }
}

impl<S: PropertySource + ?Sized> PropertySourceExt for S {}
