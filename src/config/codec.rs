//! Text codecs used to read documents and to (de)serialize looked-up values.
//!
//! A codec plays one of two roles on a property source. As the *reader* it
//! decodes the raw document into a [`Value`] tree. As the *loader* it
//! serializes a sub-tree to text for typed lookups and parses that text back
//! before it is deserialized into the caller's type. The roles are configured
//! independently, so a YAML document can be read and then loaded with JSON
//! rules.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::value::{kind_name, Value};
use super::CodecError;

pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Decodes a whole document.
    fn decode(&self, text: &str) -> Result<Value, CodecError>;

    /// Serializes a sub-tree to this codec's text form.
    fn serialize(&self, value: &Value) -> Result<String, CodecError>;

    /// Parses text produced by [`serialize`](Self::serialize), or any other
    /// fragment in this codec's syntax, back into a tree.
    fn parse(&self, text: &str) -> Result<Value, CodecError>;
}

/// Serializes any `T` through `codec`.
pub fn encode<T: Serialize + ?Sized>(codec: &dyn Codec, value: &T) -> Result<String, CodecError> {
    let value = serde_json::to_value(value).map_err(|e| CodecError::Serialize {
        codec: codec.name(),
        message: e.to_string(),
    })?;
    codec.serialize(&value)
}

/// Parses `text` with `codec` and deserializes the result into `T`.
pub fn decode_as<T: DeserializeOwned>(codec: &dyn Codec, text: &str) -> Result<T, CodecError> {
    let value = codec.parse(text)?;
    from_value(codec, value)
}

/// Converts a string into `T`, taking it as a bare string first and as a
/// `codec` fragment second. String targets receive the text unchanged, while
/// `"10"` still fills an integer.
pub fn coerce_str<T: DeserializeOwned>(codec: &dyn Codec, text: &str) -> Result<T, CodecError> {
    match T::deserialize(Value::String(text.to_string())) {
        Ok(value) => Ok(value),
        Err(_) => decode_as(codec, text),
    }
}

fn from_value<T: DeserializeOwned>(codec: &dyn Codec, value: Value) -> Result<T, CodecError> {
    T::deserialize(value).map_err(|e| CodecError::Deserialize {
        codec: codec.name(),
        message: e.to_string(),
    })
}

/// Checks that a decoded document has a mapping at its root.
pub(crate) fn ensure_mapping(value: Value) -> Result<Value, CodecError> {
    match value {
        Value::Object(_) => Ok(value),
        other => Err(CodecError::RootNotMapping(kind_name(&other))),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn serialize(&self, value: &Value) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Serialize {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn parse(&self, text: &str) -> Result<Value, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::Deserialize {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        serde_yaml_ng::from_str(text).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn serialize(&self, value: &Value) -> Result<String, CodecError> {
        serde_yaml_ng::to_string(value).map_err(|e| CodecError::Serialize {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn parse(&self, text: &str) -> Result<Value, CodecError> {
        serde_yaml_ng::from_str(text).map_err(|e| CodecError::Deserialize {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// TOML documents, and TOML inline values for typed lookups.
///
/// TOML has no null, so serializing a tree that contains one fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCodec;

impl Codec for TomlCodec {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        toml::from_str(text).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn serialize(&self, value: &Value) -> Result<String, CodecError> {
        let mut out = String::new();
        value
            .serialize(toml::ser::ValueSerializer::new(&mut out))
            .map_err(|e| CodecError::Serialize {
                codec: self.name(),
                message: e.to_string(),
            })?;
        Ok(out)
    }

    fn parse(&self, text: &str) -> Result<Value, CodecError> {
        Value::deserialize(toml::de::ValueDeserializer::new(text)).map_err(|e| {
            CodecError::Deserialize {
                codec: self.name(),
                message: e.to_string(),
            }
        })
    }
}
