//! Property sources: loading, templating, lookup, merging and binding.

mod binder;
mod builder;
mod cache;
mod codec;
mod env;
mod error;
mod file;
mod merged;
mod properties;
mod source;
pub mod template;
pub mod value;

pub use binder::{fill, fill_ex, Binder, FieldBinding, Fields, Fill, TagPair, DEFAULT_TAGS};
pub use builder::PropertiesBuilder;
pub use codec::{coerce_str, decode_as, encode, Codec, JsonCodec, TomlCodec, YamlCodec};
pub use env::{EnvProvider, EnvSnapshot, ProcessEnv, StaticEnv};
pub use error::{CodecError, ConfigError, FillError, TemplateError};
pub use file::load_file;
pub use merged::{merge, MergedProperties};
pub use properties::{Properties, SettableProperties};
pub use source::{PropertySource, PropertySourceExt, ValueSink};
pub use value::{Mapping, Value};
