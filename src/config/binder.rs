//! Tag-driven binding of properties onto structs.
//!
//! Rust has no runtime field reflection, so a bindable type lists its fields
//! once through [`Fill::describe`]: each entry carries the field name, its
//! tags, and an accessor for settable fields. The [`Binder`] walks that list
//! in order, turns tags into paths and fills each field from a
//! [`PropertySource`].
//!
//! ```
//! use dragon_props::{Fields, Fill, Properties, PropertySourceExt};
//!
//! #[derive(Default)]
//! struct Database {
//!     driver: String,
//!     max_conn: u32,
//!     timeout: u32,
//! }
//!
//! impl Fill for Database {
//!     fn describe(fields: &mut Fields<Self>) {
//!         fields
//!             .prefix(&[("propPx", "DataSources.default")])
//!             .field("driver", &[("prop", "DriverName")], |d| &mut d.driver)
//!             .field("max_conn", &[("prop", "MaxConn")], |d| &mut d.max_conn)
//!             .field("timeout", &[("prop", "Timeout,default=30")], |d| &mut d.timeout);
//!     }
//! }
//!
//! let props = Properties::new();
//! props.load_str(r#"{"DataSources": {"default": {"DriverName": "mysql", "MaxConn": 10}}}"#)?;
//!
//! let mut db = Database::default();
//! dragon_props::fill(&props, &mut db)?;
//! assert_eq!((db.driver.as_str(), db.max_conn, db.timeout), ("mysql", 10, 30));
//! # Ok::<(), dragon_props::Error>(())
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::codec::{coerce_str, JsonCodec};
use super::source::{PropertySource, PropertySourceExt};
use super::{ConfigError, FillError};

/// Names of the prefix tag and the leaf tag read by a [`Binder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPair {
    pub prefix: &'static str,
    pub leaf: &'static str,
}

impl TagPair {
    pub const fn new(prefix: &'static str, leaf: &'static str) -> Self {
        Self { prefix, leaf }
    }
}

/// The tags used by [`fill`] and [`fill_ex`].
pub const DEFAULT_TAGS: TagPair = TagPair::new("propPx", "prop");

const SKIP: &str = "-";
const DEFAULT_MARKER: &str = "default=";

type Setter<T> =
    Box<dyn Fn(&mut T, &dyn PropertySource, &str, Option<&str>) -> Result<(), ConfigError> + Send + Sync>;

struct Field<T> {
    name: &'static str,
    tags: Vec<(&'static str, &'static str)>,
    setter: Option<Setter<T>>,
}

impl<T> Field<T> {
    fn tag(&self, tag: &str) -> Option<&'static str> {
        self.tags
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, value)| *value)
    }
}

/// The ordered field list of a bindable type.
pub struct Fields<T> {
    fields: Vec<Field<T>>,
}

impl<T> Fields<T> {
    fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declares a settable field.
    ///
    /// `tags` are `(tag name, tag value)` pairs; `accessor` projects the
    /// field out of the struct.
    pub fn field<F, A>(
        &mut self,
        name: &'static str,
        tags: &[(&'static str, &'static str)],
        accessor: A,
    ) -> &mut Self
    where
        T: 'static,
        F: DeserializeOwned + 'static,
        A: Fn(&mut T) -> &mut F + Send + Sync + 'static,
    {
        let setter: Setter<T> = Box::new(
            move |target: &mut T, props: &dyn PropertySource, path: &str, default: Option<&str>| {
                let value: F = match default {
                    Some(literal) => {
                        let text = props.get(path, literal);
                        coerce_str(&JsonCodec, &text).map_err(|source| {
                            ConfigError::Deserialize {
                                key: path.to_string(),
                                data: text,
                                source,
                            }
                        })?
                    }
                    None => props.get_value(path)?,
                };
                *accessor(target) = value;
                Ok(())
            },
        );

        self.fields.push(Field {
            name,
            tags: tags.to_vec(),
            setter: Some(setter),
        });
        self
    }

    /// Declares a field the binder must not write. Its prefix tags still
    /// apply.
    pub fn unsettable(&mut self, name: &'static str, tags: &[(&'static str, &'static str)]) -> &mut Self {
        self.fields.push(Field {
            name,
            tags: tags.to_vec(),
            setter: None,
        });
        self
    }

    /// Declares a field that only carries a prefix tag.
    pub fn prefix(&mut self, tags: &[(&'static str, &'static str)]) -> &mut Self {
        self.unsettable("", tags)
    }
}

/// A type whose fields can be filled by a [`Binder`].
pub trait Fill: Sized + 'static {
    /// Lists the fields in declaration order.
    fn describe(fields: &mut Fields<Self>);
}

/// Where one field will be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub field: &'static str,
    /// `None` when the field is skipped.
    pub path: Option<String>,
    /// Literal passed as the string default, if the tag declared one.
    pub default: Option<String>,
}

/// A described type together with its computed bindings.
struct Plan<T> {
    fields: Fields<T>,
    bindings: Vec<FieldBinding>,
}

type PlanCache = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Fills structs from property sources.
///
/// The field list and bindings of each destination type are computed on
/// first use and kept for the lifetime of the binder.
pub struct Binder {
    tags: Vec<TagPair>,
    use_field_name: bool,
    plans: RwLock<PlanCache>,
}

impl Default for Binder {
    fn default() -> Self {
        Self {
            tags: vec![DEFAULT_TAGS],
            use_field_name: false,
            plans: RwLock::default(),
        }
    }
}

impl Clone for Binder {
    fn clone(&self) -> Self {
        Self {
            tags: self.tags.clone(),
            use_field_name: self.use_field_name,
            plans: RwLock::default(),
        }
    }
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("tags", &self.tags)
            .field("use_field_name", &self.use_field_name)
            .field("cached_plans", &self.plans.read().len())
            .finish()
    }
}

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tag pairs. Earlier pairs take priority.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = TagPair>) -> Self {
        self.tags = tags.into_iter().collect();
        self.plans.get_mut().clear();
        self
    }

    /// Use the field name as the path of fields without a leaf tag.
    pub fn use_field_name(mut self, enabled: bool) -> Self {
        self.use_field_name = enabled;
        self.plans.get_mut().clear();
        self
    }

    /// Computes the binding of every field of `T` without reading anything.
    pub fn plan<T: Fill>(&self) -> Result<Vec<FieldBinding>, FillError> {
        Ok(self.plan_for::<T>()?.bindings.clone())
    }

    /// Fills `target` from `props`.
    ///
    /// A field that fails to resolve keeps its value and the walk continues;
    /// every failure is reported in the returned [`FillError`].
    pub fn fill<T: Fill>(&self, props: &dyn PropertySource, target: &mut T) -> Result<(), FillError> {
        let plan = self.plan_for::<T>()?;
        let mut errors = FillError::default();

        for (field, binding) in plan.fields.fields.iter().zip(&plan.bindings) {
            let (Some(setter), Some(path)) = (&field.setter, &binding.path) else {
                trace!(field = field.name, "field skipped");
                continue;
            };

            if let Err(err) = setter(target, props, path.as_str(), binding.default.as_deref()) {
                debug!(field = field.name, path = %path, error = %err, "failed to fill field");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn plan_for<T: Fill>(&self) -> Result<Arc<Plan<T>>, FillError> {
        if self.tags.is_empty() {
            return Err(FillError::invalid("binder has no tag pairs"));
        }

        let id = TypeId::of::<T>();
        let cached = self.plans.read().get(&id).cloned();
        if let Some(plan) = cached.and_then(|plan| plan.downcast::<Plan<T>>().ok()) {
            return Ok(plan);
        }

        let mut fields = Fields::new();
        T::describe(&mut fields);
        let bindings = self.bindings(&fields);
        let plan = Arc::new(Plan { fields, bindings });
        trace!(fields = plan.bindings.len(), "described bindable type");

        self.plans.write().insert(id, Arc::clone(&plan) as Arc<dyn Any + Send + Sync>);
        Ok(plan)
    }

    fn bindings<T>(&self, fields: &Fields<T>) -> Vec<FieldBinding> {
        let mut prefixes = vec![""; self.tags.len()];

        fields
            .fields
            .iter()
            .map(|field| {
                let skipped = FieldBinding {
                    field: field.name,
                    path: None,
                    default: None,
                };

                let mut is_prefix = false;
                for (index, pair) in self.tags.iter().enumerate() {
                    if let Some(prefix) = field.tag(pair.prefix) {
                        prefixes[index] = prefix;
                        is_prefix = true;
                    }
                }
                if is_prefix || field.setter.is_none() {
                    return skipped;
                }

                let tagged = self
                    .tags
                    .iter()
                    .enumerate()
                    .find_map(|(index, pair)| field.tag(pair.leaf).map(|leaf| (index, leaf)));
                let (index, tag) = match tagged {
                    Some(found) => found,
                    None if self.use_field_name => (0, field.name),
                    None => return skipped,
                };
                if tag == SKIP {
                    return skipped;
                }

                let (leaf, default) = split_default(tag);
                let leaf = if leaf.is_empty() && self.use_field_name {
                    field.name
                } else {
                    leaf
                };
                if leaf.is_empty() {
                    return skipped;
                }

                let path = match prefixes[index] {
                    "" => leaf.to_string(),
                    prefix => format!("{prefix}.{leaf}"),
                };
                FieldBinding {
                    field: field.name,
                    path: Some(path),
                    default: default.map(str::to_string),
                }
            })
            .collect()
    }
}

/// Splits `Name,default=literal` into the name and the literal.
fn split_default(tag: &str) -> (&str, Option<&str>) {
    match tag.split_once(',') {
        Some((leaf, options)) => (leaf, options.strip_prefix(DEFAULT_MARKER)),
        None => (tag, None),
    }
}

/// Fills `target` using the default tags.
pub fn fill<T: Fill>(props: &dyn PropertySource, target: &mut T) -> Result<(), FillError> {
    shared_binder(false).fill(props, target)
}

/// Like [`fill`], optionally using field names as implicit paths.
pub fn fill_ex<T: Fill>(
    props: &dyn PropertySource,
    target: &mut T,
    use_field_name: bool,
) -> Result<(), FillError> {
    shared_binder(use_field_name).fill(props, target)
}

fn shared_binder(use_field_name: bool) -> &'static Binder {
    static BY_TAG: OnceLock<Binder> = OnceLock::new();
    static BY_FIELD_NAME: OnceLock<Binder> = OnceLock::new();

    if use_field_name {
        BY_FIELD_NAME.get_or_init(|| Binder::new().use_field_name(true))
    } else {
        BY_TAG.get_or_init(Binder::new)
    }
}
