use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::template::Function;
use super::value::{display, Value};

/// A captured set of environment variables.
pub type EnvSnapshot = BTreeMap<String, String>;

/// Captures the environment seen by load-time templates.
///
/// Called once per load and once per [`refresh_env`](super::Properties::refresh_env).
pub trait EnvProvider: Send + Sync + fmt::Debug {
    fn capture(&self) -> EnvSnapshot;
}

/// Reads the process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    prefix: Option<String>,
}

impl ProcessEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only captures variables whose name starts with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl EnvProvider for ProcessEnv {
    fn capture(&self) -> EnvSnapshot {
        std::env::vars()
            .filter(|(key, _)| match &self.prefix {
                Some(prefix) => key.starts_with(prefix.as_str()),
                None => true,
            })
            .collect()
    }
}

/// A fixed environment.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: EnvSnapshot,
}

impl StaticEnv {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvProvider for StaticEnv {
    fn capture(&self) -> EnvSnapshot {
        self.vars.clone()
    }
}

/// Builds the `env NAME [FALLBACK]` template function over `snapshot`.
///
/// A leading `.Env.` on the name is ignored. A missing variable renders the
/// fallback, or nothing when no fallback was given.
pub(crate) fn env_function(snapshot: Arc<EnvSnapshot>) -> Function {
    Arc::new(move |args: &[Value]| {
        let (name, fallback) = match args {
            [name] => (name, None),
            [name, fallback] => (name, Some(fallback)),
            _ => return Err(format!("wrong number of args: got {}, want 1 or 2", args.len())),
        };

        let name = display(name);
        let name = name.strip_prefix(".Env.").unwrap_or(&name);
        match snapshot.get(name) {
            Some(value) => Ok(Value::String(value.clone())),
            None => Ok(fallback.cloned().unwrap_or(Value::String(String::new()))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: &Function, args: &[&str]) -> Result<Value, String> {
        let args: Vec<Value> = args.iter().map(|a| Value::String(a.to_string())).collect();
        f(&args)
    }

    #[test]
    fn test_static_env_capture() {
        let env = StaticEnv::new([("A", "1"), ("B", "2")]);
        let snapshot = env.capture();
        assert_eq!(snapshot.get("A").map(String::as_str), Some("1"));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_process_env_prefix() {
        std::env::set_var("DRAGON_PROPS_ENV_TEST", "yes");
        let snapshot = ProcessEnv::with_prefix("DRAGON_PROPS_ENV_").capture();
        assert_eq!(
            snapshot.get("DRAGON_PROPS_ENV_TEST").map(String::as_str),
            Some("yes")
        );
        assert!(snapshot.keys().all(|k| k.starts_with("DRAGON_PROPS_ENV_")));
    }

    #[test]
    fn test_env_function() {
        let snapshot = Arc::new(StaticEnv::new([("NAME", "value")]).capture());
        let f = env_function(snapshot);

        assert_eq!(call(&f, &["NAME"]).unwrap(), Value::from("value"));
        assert_eq!(call(&f, &["NAME", "fallback"]).unwrap(), Value::from("value"));
        assert_eq!(call(&f, &[".Env.NAME", "fallback"]).unwrap(), Value::from("value"));
        assert_eq!(call(&f, &["MISSING", "fallback"]).unwrap(), Value::from("fallback"));
        assert_eq!(call(&f, &["MISSING"]).unwrap(), Value::from(""));
        assert!(call(&f, &[]).is_err());
    }
}
