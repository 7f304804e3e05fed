pub mod config;
mod error;

pub use config::{
    fill, fill_ex, load_file, merge, Binder, Codec, ConfigError, Fields, Fill, FillError,
    JsonCodec, MergedProperties, Properties, PropertiesBuilder, PropertySource,
    PropertySourceExt, SettableProperties, StaticEnv, TomlCodec, Value, YamlCodec,
};
pub use error::Error;
