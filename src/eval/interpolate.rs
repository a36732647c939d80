//! Boundary with the expression interpolation service.
//!
//! The service itself lives outside this crate. Nodes hand it a
//! [`RawConfig`] and get back a [`ResolvedConfig`], or an error.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::ShapeError;
use crate::state::{ModulePath, SharedState};

/// Placeholder for a value that is only knowable at a later stage.
pub const UNKNOWN_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// Raw, uninterpolated expressions keyed by attribute name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawConfig {
    raw: BTreeMap<String, String>,
}

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config holding a single `value` expression, the shape used by outputs.
    pub fn value(expression: impl Into<String>) -> Self {
        Self::new().with("value", expression)
    }

    pub fn with(mut self, key: impl Into<String>, expression: impl Into<String>) -> Self {
        self.raw.insert(key.into(), expression.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.raw.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Variable overrides passed along with an interpolation request.
pub type Overrides = HashMap<String, Value>;

/// Where an expression is being resolved.
pub struct Scope<'a> {
    pub path: &'a ModulePath,
    pub state: Option<&'a SharedState>,
    pub overrides: Option<&'a Overrides>,
}

/// The interpolation service.
///
/// Implementations may lock the shared state to resolve cross references,
/// which is why nodes always interpolate before taking the state lock.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, raw: &RawConfig, scope: &Scope<'_>) -> anyhow::Result<ResolvedConfig>;
}

impl<F> Interpolator for F
where
    F: Fn(&RawConfig, &Scope<'_>) -> anyhow::Result<ResolvedConfig> + Send + Sync,
{
    fn interpolate(&self, raw: &RawConfig, scope: &Scope<'_>) -> anyhow::Result<ResolvedConfig> {
        self(raw, scope)
    }
}

/// Interpolated values, with the keys that are still computed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedConfig {
    values: Map<String, Value>,
    computed: HashSet<String>,
}

impl ResolvedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Stores a value that resolves, but whose content is not yet known.
    pub fn with_computed(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.computed.insert(key.clone());
        self.values.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_computed(&self, key: &str) -> bool {
        self.computed.contains(key)
    }
}

/// Shape of a resolved value, decided once when it leaves the interpolator.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Text(String),
    List(Vec<Value>),
    Map(Map<String, Value>),
    /// A map that arrived wrapped in a list, as multi-valued config blocks do.
    MapList(Vec<Map<String, Value>>),
}

impl TryFrom<Value> for Resolved {
    type Error = ShapeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(text) => Ok(Resolved::Text(text)),
            Value::Object(map) => Ok(Resolved::Map(map)),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                let maps = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect();
                Ok(Resolved::MapList(maps))
            }
            Value::Array(items) => Ok(Resolved::List(items)),
            Value::Number(_) => Err(ShapeError("number")),
            Value::Bool(_) => Err(ShapeError("bool")),
            Value::Null => Err(ShapeError("null")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_config() {
        let raw = RawConfig::value("${var.name}").with("description", "name");
        assert_eq!(raw.get("value"), Some("${var.name}"));
        assert_eq!(raw.iter().count(), 2);
        assert_eq!(raw.get("missing"), None);
    }

    #[test]
    fn test_resolved_config() {
        let config = ResolvedConfig::new()
            .with("value", "x")
            .with_computed("other", "${aws_instance.web.id}");

        assert_eq!(config.get("value"), Some(&json!("x")));
        assert!(!config.is_computed("value"));
        assert!(config.is_computed("other"));
    }

    #[test]
    fn test_shapes() {
        assert_eq!(
            Resolved::try_from(json!("hello")).unwrap(),
            Resolved::Text("hello".into())
        );
        assert_eq!(
            Resolved::try_from(json!(["a", "b"])).unwrap(),
            Resolved::List(vec![json!("a"), json!("b")])
        );
        assert_eq!(Resolved::try_from(json!([])).unwrap(), Resolved::List(vec![]));
        assert!(matches!(
            Resolved::try_from(json!({ "k": "v" })).unwrap(),
            Resolved::Map(_)
        ));
        assert!(matches!(
            Resolved::try_from(json!([{ "k": "v" }])).unwrap(),
            Resolved::MapList(maps) if maps.len() == 1
        ));
        assert!(matches!(
            Resolved::try_from(json!([{ "k": "v" }, "x"])).unwrap(),
            Resolved::List(items) if items.len() == 2
        ));
    }

    #[test]
    fn test_invalid_shapes() {
        assert_eq!(Resolved::try_from(json!(1)).unwrap_err().kind(), "number");
        assert_eq!(Resolved::try_from(json!(true)).unwrap_err().kind(), "bool");
        assert_eq!(Resolved::try_from(Value::Null).unwrap_err().kind(), "null");
    }
}
