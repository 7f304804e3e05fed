//! The owning property source: one document, its environment snapshot and
//! its lookup cache.

use std::io::Read;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::builder::PropertiesBuilder;
use super::cache::{Mode, ResolutionCache};
use super::codec::{ensure_mapping, Codec, JsonCodec};
use super::env::{env_function, EnvProvider, EnvSnapshot, ProcessEnv};
use super::source::{PropertySource, ValueSink};
use super::template::{self, Functions};
use super::value::{is_valid_path, Mapping, Value};
use super::ConfigError;

/// Name of the function typed lookups use to encode the addressed node.
const LOAD_VALUE: &str = "load_value";

#[derive(Debug)]
struct State {
    root: Option<Value>,
    env: Arc<EnvSnapshot>,
    reader: Arc<dyn Codec>,
    loader: Arc<dyn Codec>,
    cache: ResolutionCache,
}

/// A property source backed by one loaded document.
///
/// Every operation takes the same exclusive lock, lookups included, because a
/// lookup may populate the cache. Separate instances share nothing.
///
/// ## Example
///
/// ```
/// use dragon_props::{Properties, PropertySource, PropertySourceExt};
///
/// let props = Properties::new();
/// props.load_str(r#"{"server": {"host": "localhost", "port": 8080}}"#)?;
///
/// assert_eq!(props.get("server.host", ""), "localhost");
/// assert_eq!(props.get_value::<u16>("server.port")?, 8080);
/// assert_eq!(props.get("server.missing", "fallback"), "fallback");
/// # Ok::<(), dragon_props::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct Properties {
    state: Mutex<State>,
    env_provider: Arc<dyn EnvProvider>,
    functions: Functions,
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl Properties {
    /// Creates an empty source reading and loading JSON, with the process
    /// environment.
    pub fn new() -> Self {
        Self::from_parts(
            Arc::new(JsonCodec),
            Arc::new(JsonCodec),
            Arc::new(ProcessEnv::new()),
            Functions::new(),
        )
    }

    pub fn builder() -> PropertiesBuilder {
        PropertiesBuilder::default()
    }

    pub(crate) fn from_parts(
        reader: Arc<dyn Codec>,
        loader: Arc<dyn Codec>,
        env_provider: Arc<dyn EnvProvider>,
        functions: Functions,
    ) -> Self {
        let env = Arc::new(env_provider.capture());
        Self {
            state: Mutex::new(State {
                root: None,
                env,
                reader,
                loader,
                cache: ResolutionCache::default(),
            }),
            env_provider,
            functions,
        }
    }

    /// Re-captures the environment snapshot. Cached lookups are dropped.
    pub fn refresh_env(&self) {
        let mut state = self.state.lock();
        state.cache.clear();
        state.env = Arc::new(self.env_provider.capture());
    }

    /// The environment snapshot captured by the last load or refresh.
    pub fn env(&self) -> Arc<EnvSnapshot> {
        Arc::clone(&self.state.lock().env)
    }

    /// Whether a document has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().root.is_some()
    }

    /// Loads a document.
    ///
    /// The raw text is first rendered as a template whose data is
    /// `{ "Env": <fresh snapshot>, "Value": <previous document or null> }`,
    /// plus an `env NAME [FALLBACK]` function. `.Value` only sees what an
    /// earlier load produced: a document cannot reference its own keys.
    ///
    /// The cache and environment are reset before anything can fail, so a
    /// failed load leaves the previous document in place with an empty cache.
    fn load(&self, input: &mut dyn Read) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        state.cache.clear();
        state.env = Arc::new(self.env_provider.capture());

        let mut raw = String::new();
        input.read_to_string(&mut raw)?;

        let data = template_data(&state);
        let mut functions = Functions::new();
        functions.insert_arc("env", env_function(Arc::clone(&state.env)));
        functions.extend(&self.functions);

        let text = template::render(&raw, &data, &functions)?;
        let root = match state.reader.decode(&text)? {
            Value::Null => Value::Object(Mapping::new()),
            decoded => ensure_mapping(decoded)?,
        };

        debug!(
            reader = state.reader.name(),
            keys = root.as_object().map_or(0, |m| m.len()),
            "loaded properties document"
        );
        state.root = Some(root);
        Ok(())
    }

    /// Renders `key` against the current document.
    fn resolve(state: &State, key: &str, mode: Mode) -> Result<String, ConfigError> {
        let root = state.root.as_ref().ok_or(ConfigError::NotLoaded)?;
        if !is_valid_path(key) {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }
        let field = if key.is_empty() {
            ".".to_string()
        } else {
            format!(".{key}")
        };

        let mut functions = Functions::new();
        let source = match mode {
            Mode::Display => format!("{{{{ {field} }}}}"),
            Mode::Encoded => {
                let loader = Arc::clone(&state.loader);
                functions.insert(LOAD_VALUE, move |args: &[Value]| match args {
                    [value] => loader
                        .serialize(value)
                        .map(Value::String)
                        .map_err(|e| e.to_string()),
                    _ => Err(format!("wrong number of args: got {}, want 1", args.len())),
                });
                format!("{{{{ {LOAD_VALUE} {field} }}}}")
            }
        };

        template::render(&source, root, &functions).map_err(|source| ConfigError::Lookup {
            key: key.to_string(),
            source,
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock())
    }
}

fn template_data(state: &State) -> Value {
    let env: Mapping = state
        .env
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut data = Mapping::new();
    data.insert("Env".to_string(), Value::Object(env));
    data.insert(
        "Value".to_string(),
        state.root.clone().unwrap_or(Value::Null),
    );
    Value::Object(data)
}

impl PropertySource for Properties {
    fn set_value_reader(&self, reader: Arc<dyn Codec>) -> Result<(), ConfigError> {
        self.with_state(|state| {
            state.reader = reader;
            state.cache.clear();
        });
        Ok(())
    }

    fn set_value_loader(&self, loader: Arc<dyn Codec>) -> Result<(), ConfigError> {
        self.with_state(|state| {
            state.loader = loader;
            state.cache.clear();
        });
        Ok(())
    }

    fn read_value(&self, input: &mut dyn Read) -> Result<(), ConfigError> {
        self.load(input)
    }

    fn get(&self, key: &str, default: &str) -> String {
        let mut state = self.state.lock();
        if let Some(hit) = state.cache.get(Mode::Display, key) {
            trace!(key, "property served from cache");
            return hit.to_string();
        }

        match Self::resolve(&state, key, Mode::Display) {
            Ok(rendered) => {
                state.cache.insert(Mode::Display, key, rendered.clone());
                rendered
            }
            Err(err) => {
                debug!(key, error = %err, "property lookup failed, using default");
                default.to_string()
            }
        }
    }

    fn with_value(&self, key: &str, sink: &mut ValueSink<'_>) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        let loader = Arc::clone(&state.loader);

        let data = match state.cache.get(Mode::Encoded, key) {
            Some(hit) => {
                trace!(key, "typed property served from cache");
                hit.to_string()
            }
            None => {
                let rendered = Self::resolve(&state, key, Mode::Encoded)?;
                state.cache.insert(Mode::Encoded, key, rendered.clone());
                rendered
            }
        };

        sink(&data, loader.as_ref())
    }
}

/// A [`Properties`] whose top-level keys can also be set directly.
///
/// Starts with an empty mapping, so it is usable without loading a document.
/// A later load replaces everything set so far.
#[derive(Debug)]
pub struct SettableProperties {
    inner: Properties,
}

impl Default for SettableProperties {
    fn default() -> Self {
        Self::new()
    }
}

impl SettableProperties {
    pub fn new() -> Self {
        Self::from(Properties::new())
    }

    /// Sets the top-level key `name`. Cached lookups are dropped.
    pub fn set<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), ConfigError> {
        let value = serde_json::to_value(value).map_err(|e| ConfigError::Serialize {
            key: name.to_string(),
            message: e.to_string(),
        })?;

        self.inner.with_state(|state| {
            match &mut state.root {
                Some(Value::Object(map)) => {
                    map.insert(name.to_string(), value);
                }
                root => {
                    let mut map = Mapping::new();
                    map.insert(name.to_string(), value);
                    *root = Some(Value::Object(map));
                }
            }
            state.cache.clear();
        });
        Ok(())
    }

    /// Removes the top-level key `name`, if present.
    pub fn delete(&self, name: &str) {
        self.inner.with_state(|state| {
            if let Some(Value::Object(map)) = &mut state.root {
                map.remove(name);
            }
            state.cache.clear();
        });
    }
}

impl From<Properties> for SettableProperties {
    fn from(inner: Properties) -> Self {
        inner.with_state(|state| {
            if state.root.is_none() {
                state.root = Some(Value::Object(Mapping::new()));
            }
        });
        Self { inner }
    }
}

impl Deref for SettableProperties {
    type Target = Properties;

    fn deref(&self) -> &Properties {
        &self.inner
    }
}

impl PropertySource for SettableProperties {
    fn set_value_reader(&self, reader: Arc<dyn Codec>) -> Result<(), ConfigError> {
        self.inner.set_value_reader(reader)
    }

    fn set_value_loader(&self, loader: Arc<dyn Codec>) -> Result<(), ConfigError> {
        self.inner.set_value_loader(loader)
    }

    fn read_value(&self, input: &mut dyn Read) -> Result<(), ConfigError> {
        self.inner.read_value(input)
    }

    fn get(&self, key: &str, default: &str) -> String {
        self.inner.get(key, default)
    }

    fn with_value(&self, key: &str, sink: &mut ValueSink<'_>) -> Result<(), ConfigError> {
        self.inner.with_value(key, sink)
    }
}

#[cfg(test)]
impl Properties {
    fn cached(&self) -> usize {
        self.state.lock().cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecError, PropertySourceExt, StaticEnv, TemplateError, YamlCodec};
    use serde::Deserialize;
    use std::collections::BTreeMap;

    const JSON_DOC: &str = r#"
{
  "Env": "dev",
  "LogResponse": true,
  "LogLevel": 1,
  "ServerPort": 8080,
  "Empty": "",
  "Value": { "float": 1.5 },
  "DataSources": {
    "default": {
      "DriverName": "{{.Env.CONTEXT_TEST_ENV}}",
      "DriverNameGet0": "{{ env "CONTEXT_TEST_ENV" }}",
      "DriverNameGet1": "{{ env "CONTEXT_TEST_ENV" "func1_return" }}",
      "DriverNameGet2": "{{ env ".Env.CONTEXT_TEST_ENV" "func2_return" }}",
      "DriverNameGet3": "{{ env "NOT_EXIST" "func3_return" }}",
      "DriverNameGet4": "{{ env "NOT_EXIST" }}",
      "DriverInfo": "root:123@tcp(localhost:3306)/test?charset=utf8",
      "MaxConn": 1000,
      "MaxIdleConn": 500
    }
  }
}
"#;

    const YAML_DOC: &str = r#"
Env: "dev"
LogResponse: true
ServerPort: 8080
DataSources:
  default:
    DriverName: "{{.Env.CONTEXT_TEST_ENV}}"
    DriverInfo: "root:123@tcp(localhost:3306)/test?charset=utf8"
    MaxConn: 1000
    MaxIdleConn: 500
"#;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct Database {
        driver_name: String,
        driver_info: String,
        max_conn: i32,
        max_idle_conn: i32,
    }

    fn test_env() -> StaticEnv {
        StaticEnv::new([("CONTEXT_TEST_ENV", "ONLY FOR TEST")])
    }

    fn json_props() -> Properties {
        Properties::builder()
            .with_env(test_env())
            .with_value(JSON_DOC)
            .build()
            .unwrap()
    }

    fn yaml_props() -> Properties {
        Properties::builder()
            .with_codec(YamlCodec)
            .with_env(test_env())
            .with_value(YAML_DOC)
            .build()
            .unwrap()
    }

    #[test]
    fn test_get_scalars() {
        let props = json_props();
        assert_eq!(props.get("LogResponse", ""), "true");
        assert_eq!(props.get("ServerPort", ""), "8080");
        assert_eq!(props.get("Value.float", ""), "1.5");
        assert_eq!(props.get("Env", ""), "dev");
        assert_eq!(props.get("Empty", "d"), "");
    }

    #[test]
    fn test_get_missing_returns_default() {
        let props = json_props();
        assert_eq!(props.get("Nope", "d"), "d");
        assert_eq!(props.get("ServerPort.inner", "d"), "d");
        assert_eq!(props.get("bad key", "d"), "d");
        assert_eq!(props.cached(), 0);
    }

    #[test]
    fn test_env_templating() {
        let props = json_props();
        let get = |key: &str| props.get(&format!("DataSources.default.{key}"), "");

        assert_eq!(get("DriverName"), "ONLY FOR TEST");
        assert_eq!(get("DriverNameGet0"), "ONLY FOR TEST");
        assert_eq!(get("DriverNameGet1"), "ONLY FOR TEST");
        assert_eq!(get("DriverNameGet2"), "ONLY FOR TEST");
        assert_eq!(get("DriverNameGet3"), "func3_return");
        assert_eq!(get("DriverNameGet4"), "");
    }

    #[test]
    fn test_get_value_typed() {
        let props = json_props();
        assert_eq!(props.get_value::<String>("Env").unwrap(), "dev");
        assert_eq!(props.get_value::<i32>("ServerPort").unwrap(), 8080);
        assert!(props.get_value::<bool>("LogResponse").unwrap());
        assert_eq!(props.get_value::<f32>("Value.float").unwrap(), 1.5);

        let sources: BTreeMap<String, Database> = props.get_value("DataSources").unwrap();
        let db = &sources["default"];
        assert_eq!(db.driver_info, "root:123@tcp(localhost:3306)/test?charset=utf8");
        assert_eq!(db.max_idle_conn, 500);
        assert_eq!(db.driver_name, "ONLY FOR TEST");
    }

    #[test]
    fn test_json_loader_does_not_coerce_number_into_string() {
        let props = json_props();
        let err = props.get_value::<String>("ServerPort").unwrap_err();
        assert!(
            matches!(&err, ConfigError::Deserialize { data, .. } if data == "8080"),
            "{err}"
        );
    }

    #[test]
    fn test_get_value_missing_is_error() {
        let props = json_props();
        let err = props.get_value::<i32>("Missing.Path").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Lookup {
                source: TemplateError::MissingKey(_),
                ..
            }
        ));
    }

    #[test]
    fn test_whole_document() {
        let props = json_props();
        let all: BTreeMap<String, Value> = props.get_value("").unwrap();
        assert_eq!(all["ServerPort"], Value::from(8080));

        let text = props.get("", "");
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed["Env"], Value::from("dev"));
    }

    #[test]
    fn test_yaml_reader_with_yaml_and_json_loader() {
        let props = yaml_props();
        assert_eq!(props.get("DataSources.default.DriverName", ""), "ONLY FOR TEST");
        assert_eq!(props.get_value::<i32>("ServerPort").unwrap(), 8080);

        let sources: BTreeMap<String, Database> = props.get_value("DataSources").unwrap();
        assert_eq!(sources["default"].max_conn, 1000);

        props.set_value_loader(Arc::new(JsonCodec)).unwrap();
        let sources: BTreeMap<String, Database> = props.get_value("DataSources").unwrap();
        assert_eq!(sources["default"].max_idle_conn, 500);
        assert!(props.get_value::<String>("ServerPort").is_err());
    }

    #[test]
    fn test_not_loaded() {
        let props = Properties::builder().with_env(test_env()).build().unwrap();
        assert!(!props.is_loaded());
        assert_eq!(props.get("", "d"), "d");
        assert!(matches!(
            props.get_value::<i32>("a"),
            Err(ConfigError::NotLoaded)
        ));
    }

    #[test]
    fn test_repeated_lookups_use_cache() {
        let props = json_props();
        assert_eq!(props.get("Env", ""), "dev");
        assert_eq!(props.cached(), 1);
        assert_eq!(props.get("Env", ""), "dev");
        assert_eq!(props.cached(), 1);

        assert_eq!(props.get_value::<String>("Env").unwrap(), "dev");
        assert_eq!(props.get_value::<String>("Env").unwrap(), "dev");
        assert_eq!(props.cached(), 2);
    }

    #[test]
    fn test_cached_string_reused_for_other_types() {
        let props = json_props();
        assert_eq!(props.get_value::<i64>("LogLevel").unwrap(), 1);
        assert_eq!(props.get_value::<f64>("LogLevel").unwrap(), 1.0);
        assert_eq!(props.get_value::<u8>("LogLevel").unwrap(), 1);
        assert_eq!(props.cached(), 1);
    }

    #[test]
    fn test_reload_invalidates_cache() {
        let props = json_props();
        assert_eq!(props.get("Env", ""), "dev");
        assert_eq!(props.get_value::<String>("Env").unwrap(), "dev");

        props.load_str(r#"{"Env": "prod"}"#).unwrap();
        assert_eq!(props.get("Env", ""), "prod");
        assert_eq!(props.get_value::<String>("Env").unwrap(), "prod");
    }

    #[test]
    fn test_failed_load_clears_cache_and_keeps_root() {
        let props = json_props();
        assert_eq!(props.get("Env", ""), "dev");
        assert_eq!(props.cached(), 1);

        let err = props.load_str("{ broken").unwrap_err();
        assert!(matches!(err, ConfigError::Codec(CodecError::Decode { .. })));
        assert_eq!(props.cached(), 0);
        assert_eq!(props.get("Env", ""), "dev");
    }

    #[test]
    fn test_load_template_errors() {
        let props = json_props();
        assert!(matches!(
            props.load_str(r#"{"a": "{{ .Env.NOT_THERE }}"}"#),
            Err(ConfigError::Template(TemplateError::MissingKey(_)))
        ));
        assert!(matches!(
            props.load_str(r#"{"a": "{{ .Env "}"#),
            Err(ConfigError::Template(TemplateError::Parse { .. }))
        ));
    }

    #[test]
    fn test_root_must_be_mapping() {
        let props = Properties::new();
        assert!(matches!(
            props.load_str("[1, 2]"),
            Err(ConfigError::Codec(CodecError::RootNotMapping("sequence")))
        ));
    }

    #[test]
    fn test_empty_yaml_document_is_empty_mapping() {
        for text in ["", "# only a comment\n"] {
            let props = Properties::builder().with_codec(YamlCodec).build().unwrap();
            props.load_str(text).unwrap();
            assert!(props.is_loaded());
            assert_eq!(props.get("", "d"), "{}");
            assert_eq!(props.get("a", "d"), "d");
        }

        let props = Properties::builder().with_codec(YamlCodec).build().unwrap();
        assert!(matches!(
            props.load_str("- 1\n"),
            Err(ConfigError::Codec(CodecError::RootNotMapping("sequence")))
        ));
        assert!(matches!(
            props.load_str("plain"),
            Err(ConfigError::Codec(CodecError::RootNotMapping("string")))
        ));
    }

    #[test]
    fn test_malformed_key_is_not_rendered() {
        let props = SettableProperties::new();
        props.set("a", "x").unwrap();
        props.set("b", "y").unwrap();

        assert_eq!(props.get("a }}{{ .b", "DEFAULT"), "DEFAULT");
        assert_eq!(props.get("a..b", "DEFAULT"), "DEFAULT");
        assert!(matches!(
            props.get_value::<String>("a | printf"),
            Err(ConfigError::InvalidKey(key)) if key == "a | printf"
        ));
        assert_eq!(props.get("a", "DEFAULT"), "x");
    }

    #[test]
    fn test_value_sees_previous_document_only() {
        let props = Properties::builder().with_env(test_env()).build().unwrap();
        // Nothing loaded yet: `.Value` is null and cannot be walked.
        assert!(props.load_str(r#"{"b": "{{ .Value.a }}"}"#).is_err());

        props.load_str(r#"{"a": "first"}"#).unwrap();
        props.load_str(r#"{"a": "second", "b": "{{ .Value.a }}"}"#).unwrap();
        assert_eq!(props.get("b", ""), "first");
    }

    #[test]
    fn test_refresh_env() {
        std::env::set_var("DRAGON_PROPS_REFRESH_TEST", "one");
        let props = Properties::builder()
            .with_env(ProcessEnv::with_prefix("DRAGON_PROPS_REFRESH_"))
            .build()
            .unwrap();
        assert_eq!(
            props.env().get("DRAGON_PROPS_REFRESH_TEST").map(String::as_str),
            Some("one")
        );

        std::env::set_var("DRAGON_PROPS_REFRESH_TEST", "two");
        props.refresh_env();
        assert_eq!(
            props.env().get("DRAGON_PROPS_REFRESH_TEST").map(String::as_str),
            Some("two")
        );
    }

    #[test]
    fn test_settable_set_and_delete() {
        let props = SettableProperties::new();
        props.set("a", &1).unwrap();
        props.set("b", "2").unwrap();
        props.set("nested", &BTreeMap::from([("x", true)])).unwrap();

        assert_eq!(props.get("a", ""), "1");
        assert_eq!(props.get("b", ""), "2");
        assert!(props.get_value::<bool>("nested.x").unwrap());

        props.set("a", &5).unwrap();
        assert_eq!(props.get_value::<i32>("a").unwrap(), 5);

        props.delete("a");
        assert_eq!(props.get("a", "gone"), "gone");
    }

    #[test]
    fn test_settable_after_load() {
        let props = Properties::builder()
            .with_codec(YamlCodec)
            .with_env(test_env())
            .with_value(YAML_DOC)
            .build_settable()
            .unwrap();
        props.set("extra", "x").unwrap();

        assert_eq!(props.get("LogResponse", ""), "true");
        assert_eq!(props.get("extra", ""), "x");
    }

    #[test]
    fn test_distinct_instances_across_threads() {
        let a = Arc::new(json_props());
        let b = Arc::new(yaml_props());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let props = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        assert_eq!(props.get_value::<i32>("ServerPort").unwrap(), 8080);
                        assert_eq!(props.get("Env", ""), "dev");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
