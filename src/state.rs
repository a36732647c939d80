//! In-memory shape of the provisioning state.
//!
//! The state is a tree of modules keyed by [`ModulePath`]. Each module keeps
//! its outputs in an unordered map. During a walk the whole tree is shared
//! behind a single [`SharedState`] lock.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StateError;

/// Ordered sequence of module names, the root module being the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// The enclosing module, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` is `other` or one of its enclosing modules.
    pub fn is_ancestor_of(&self, other: &ModulePath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Dotted module names, as used in `module.<qualifier>.<name>` references.
    pub fn qualifier(&self) -> String {
        self.0.join(".")
    }
}

impl Display for ModulePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("root")?;
        for segment in &self.0 {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// Type tag of a stored output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputType {
    String,
    List,
    Map,
}

impl Display for OutputType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutputType::String => "string",
            OutputType::List => "list",
            OutputType::Map => "map",
        })
    }
}

/// The value of an output, its variant doubling as the type tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum OutputValue {
    String(String),
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl OutputValue {
    pub fn output_type(&self) -> OutputType {
        match self {
            OutputValue::String(_) => OutputType::String,
            OutputValue::List(_) => OutputType::List,
            OutputValue::Map(_) => OutputType::Map,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    #[serde(flatten)]
    pub value: OutputValue,
    #[serde(default)]
    pub sensitive: bool,
}

impl OutputState {
    pub fn new(value: OutputValue, sensitive: bool) -> Self {
        Self { value, sensitive }
    }

    pub fn output_type(&self) -> OutputType {
        self.value.output_type()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub path: ModulePath,
    #[serde(default)]
    pub outputs: HashMap<String, OutputState>,
}

impl ModuleState {
    pub fn new(path: ModulePath) -> Self {
        Self {
            path,
            outputs: HashMap::new(),
        }
    }
}

/// The whole state tree, modules kept sorted by path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    modules: Vec<ModuleState>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, path: &ModulePath) -> Result<usize, usize> {
        self.modules
            .binary_search_by(|module| module.path.cmp(path))
    }

    pub fn module(&self, path: &ModulePath) -> Option<&ModuleState> {
        let index = self.position(path).ok()?;
        Some(&self.modules[index])
    }

    pub fn module_mut(&mut self, path: &ModulePath) -> Option<&mut ModuleState> {
        let index = self.position(path).ok()?;
        Some(&mut self.modules[index])
    }

    /// Returns the module at `path`, creating it first if needed.
    pub fn add_module(&mut self, path: &ModulePath) -> &mut ModuleState {
        let index = match self.position(path) {
            Ok(index) => index,
            Err(index) => {
                self.modules.insert(index, ModuleState::new(path.clone()));
                index
            }
        };
        &mut self.modules[index]
    }

    pub fn remove_module(&mut self, path: &ModulePath) -> Option<ModuleState> {
        let index = self.position(path).ok()?;
        Some(self.modules.remove(index))
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleState> {
        self.modules.iter()
    }

    /// Convenience lookup of a single output.
    pub fn output(&self, path: &ModulePath, name: &str) -> Option<&OutputState> {
        self.module(path)?.outputs.get(name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut state: State = serde_json::from_str(json)?;
        state.modules.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(state)
    }
}

/// The single mutable resource shared by every vertex of a walk.
#[derive(Debug, Default)]
pub struct SharedState(Mutex<State>);

impl SharedState {
    pub fn new(state: State) -> Self {
        Self(Mutex::new(state))
    }

    /// Acquires the exclusive state lock.
    pub fn lock(&self) -> Result<MutexGuard<'_, State>, StateError> {
        self.0.lock().map_err(|_| StateError::Poisoned)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<State, StateError> {
        Ok(self.lock()?.clone())
    }

    pub fn into_inner(self) -> Result<State, StateError> {
        self.0.into_inner().map_err(|_| StateError::Poisoned)
    }
}

impl From<State> for SharedState {
    fn from(state: State) -> Self {
        Self::new(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_path() {
        let root = ModulePath::root();
        let child = root.child("network").child("subnets");

        assert!(root.is_root());
        assert_eq!(child.len(), 2);
        assert_eq!(child.qualifier(), "network.subnets");
        assert_eq!(child.to_string(), "root.network.subnets");
        assert_eq!(child.parent(), Some(ModulePath::new(["network"])));
        assert_eq!(root.parent(), None);
        assert!(root.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&root));
    }

    #[test]
    fn test_add_module_is_lazy_and_idempotent() {
        let mut state = State::new();
        let path = ModulePath::new(["child"]);
        assert!(state.module(&path).is_none());

        state
            .add_module(&path)
            .outputs
            .insert("a".into(), OutputState::new(OutputValue::String("x".into()), false));
        state.add_module(&path);

        assert_eq!(state.modules().count(), 1);
        assert_eq!(
            state.output(&path, "a").map(OutputState::output_type),
            Some(OutputType::String)
        );
    }

    #[test]
    fn test_modules_stay_sorted() {
        let mut state = State::new();
        state.add_module(&ModulePath::new(["b"]));
        state.add_module(&ModulePath::root());
        state.add_module(&ModulePath::new(["a", "c"]));
        state.add_module(&ModulePath::new(["a"]));

        let paths: Vec<String> = state.modules().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["root", "root.a", "root.a.c", "root.b"]);

        assert!(state.remove_module(&ModulePath::new(["a"])).is_some());
        assert!(state.module(&ModulePath::new(["a"])).is_none());
        assert!(state.module(&ModulePath::new(["a", "c"])).is_some());
    }

    #[test]
    fn test_output_state_serialization() {
        let output = OutputState::new(OutputValue::List(vec![json!("a"), json!("b")]), true);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value,
            json!({ "type": "list", "value": ["a", "b"], "sensitive": true })
        );

        let back: OutputState = serde_json::from_value(value).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn test_state_json() {
        let mut state = State::new();
        state.add_module(&ModulePath::new(["z"]));
        state.add_module(&ModulePath::root()).outputs.insert(
            "id".into(),
            OutputState::new(OutputValue::String("i-123".into()), false),
        );

        let json = state.to_json().unwrap();
        let back = State::from_json(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_shared_state_lock() {
        let shared = SharedState::new(State::new());
        shared.lock().unwrap().add_module(&ModulePath::root());

        let snapshot = shared.snapshot().unwrap();
        assert!(snapshot.module(&ModulePath::root()).is_some());
        assert_eq!(shared.into_inner().unwrap(), snapshot);
    }
}
