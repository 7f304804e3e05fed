use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::codec::{Codec, JsonCodec};
use super::env::{EnvProvider, ProcessEnv};
use super::file::read_config_file;
use super::properties::{Properties, SettableProperties};
use super::source::PropertySourceExt;
use super::template::Functions;
use super::value::Value;
use super::ConfigError;

/// A document to load while building.
#[derive(Debug)]
enum Input {
    Bytes(Vec<u8>),
    File { path: PathBuf, required: bool },
}

/// Builder for [`Properties`].
///
/// Inputs are loaded in registration order. Each load replaces the document,
/// but its templates can read the previous one through `.Value`:
///
/// ```json
/// { "url": "http://{{ .Value.server.host }}:{{ env "PORT" "8080" }}" }
/// ```
///
/// ## Example
///
/// ```no_run
/// use dragon_props::{Properties, PropertySourceExt, YamlCodec};
///
/// let props = Properties::builder()
///     .with_codec(YamlCodec)
///     .with_file("config/default.yaml", true)
///     .build()?;
///
/// let port: u16 = props.get_value("server.port")?;
/// # Ok::<(), dragon_props::ConfigError>(())
/// ```
#[derive(Debug)]
#[must_use = "builders do nothing until .build() is called"]
pub struct PropertiesBuilder {
    reader: Arc<dyn Codec>,
    loader: Arc<dyn Codec>,
    env: Arc<dyn EnvProvider>,
    functions: Functions,
    inputs: Vec<Input>,
}

impl Default for PropertiesBuilder {
    fn default() -> Self {
        Self {
            reader: Arc::new(JsonCodec),
            loader: Arc::new(JsonCodec),
            env: Arc::new(ProcessEnv::new()),
            functions: Functions::new(),
            inputs: Vec::new(),
        }
    }
}

impl PropertiesBuilder {
    /// Sets the codec that decodes documents.
    pub fn with_reader(mut self, reader: impl Codec + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    /// Sets the codec used for typed lookups.
    pub fn with_loader(mut self, loader: impl Codec + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// Uses `codec` as both reader and loader.
    pub fn with_codec(mut self, codec: impl Codec + Clone + 'static) -> Self {
        self.reader = Arc::new(codec.clone());
        self.loader = Arc::new(codec);
        self
    }

    pub fn with_env(mut self, env: impl EnvProvider + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Registers a function for load-time templates.
    ///
    /// A function named `env` replaces the built-in one.
    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name, f);
        self
    }

    /// Loads `bytes` at build time.
    pub fn with_value(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.inputs.push(Input::Bytes(bytes.into()));
        self
    }

    /// Loads a file at build time.
    ///
    /// If `required` is `true`, the build will fail if the file doesn't exist.
    /// Optional files that are missing are silently skipped.
    pub fn with_file(mut self, path: impl AsRef<Path>, required: bool) -> Self {
        self.inputs.push(Input::File {
            path: path.as_ref().to_path_buf(),
            required,
        });
        self
    }

    pub fn build(self) -> Result<Properties, ConfigError> {
        let props = Properties::from_parts(self.reader, self.loader, self.env, self.functions);
        load_inputs(&props, self.inputs)?;
        Ok(props)
    }

    /// Builds a [`SettableProperties`], starting from an empty mapping when
    /// no input is registered.
    pub fn build_settable(self) -> Result<SettableProperties, ConfigError> {
        let props = SettableProperties::from(Properties::from_parts(
            self.reader,
            self.loader,
            self.env,
            self.functions,
        ));
        load_inputs(&props, self.inputs)?;
        Ok(props)
    }
}

fn load_inputs(props: &Properties, inputs: Vec<Input>) -> Result<(), ConfigError> {
    for input in inputs {
        match input {
            Input::Bytes(bytes) => props.load_bytes(&bytes)?,
            Input::File { path, required } => {
                if let Some(contents) = read_config_file(&path, required)? {
                    props.load_str(&contents)?;
                }
            }
        }
    }
    Ok(())
}
