use std::borrow::Cow;

use serde_json::Value;

use crate::error::EvalError;
use crate::eval::interpolate::{RawConfig, Resolved, ResolvedConfig, UNKNOWN_VALUE};
use crate::eval::{EvalContext, EvalNode, EvalResult, Outcome};
use crate::graph::{HashCode, Hashable};
use crate::state::{ModulePath, OutputState, OutputValue};

/// Removes an output from the state of the current module.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeleteOutput {
    pub name: String,
}

impl DeleteOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Hashable for DeleteOutput {
    fn hashcode(&self) -> HashCode {
        HashCode::typed(self)
    }
}

impl EvalNode for DeleteOutput {
    fn name(&self) -> Cow<'_, str> {
        format!("output.{} (destroy)", self.name).into()
    }

    fn eval(&self, ctx: &EvalContext<'_>) -> EvalResult {
        let Some(state) = ctx.state() else {
            return Ok(Outcome::Done(None));
        };

        let mut state = state.lock()?;
        if let Some(module) = state.module_mut(ctx.path())
            && module.outputs.remove(&self.name).is_some()
        {
            tracing::debug!(output = %self.name, path = %ctx.path(), "output removed");
        }

        Ok(Outcome::Done(None))
    }
}

/// Interpolates an output expression and writes the result to the state of
/// the current module.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WriteOutput {
    pub name: String,
    pub sensitive: bool,
    /// Expression to resolve. An absent expression stores the unknown value.
    pub value: Option<RawConfig>,
    /// Write an unknown placeholder and exit early instead of failing when
    /// interpolation fails, as needed while collecting input.
    pub continue_on_err: bool,
}

impl WriteOutput {
    pub fn new(name: impl Into<String>, value: RawConfig) -> Self {
        Self {
            name: name.into(),
            sensitive: false,
            value: Some(value),
            continue_on_err: false,
        }
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    pub fn continue_on_err(mut self, continue_on_err: bool) -> Self {
        self.continue_on_err = continue_on_err;
        self
    }

    /// Resolves the expression to the value about to be stored.
    fn resolve(
        &self,
        config: Option<ResolvedConfig>,
        path: &ModulePath,
    ) -> Result<OutputValue, EvalError> {
        let Some(config) = config else {
            return Ok(OutputValue::String(UNKNOWN_VALUE.to_string()));
        };

        let raw = config
            .get("value")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));

        let mut resolved = Resolved::try_from(raw).map_err(|err| EvalError::InvalidOutputType {
            name: self.name.clone(),
            kind: err.kind(),
        })?;

        if config.is_computed("value") && !path.is_root() {
            qualify(&mut resolved, path);
        }

        match resolved {
            Resolved::Text(text) => Ok(OutputValue::String(text)),
            Resolved::List(items) => Ok(OutputValue::List(items)),
            Resolved::Map(map) => Ok(OutputValue::Map(map)),
            Resolved::MapList(mut maps) if maps.len() == 1 => Ok(OutputValue::Map(maps.remove(0))),
            Resolved::MapList(maps) => Err(EvalError::AmbiguousMap {
                name: self.name.clone(),
                len: maps.len(),
            }),
        }
    }
}

impl Hashable for WriteOutput {
    fn hashcode(&self) -> HashCode {
        HashCode::typed(self)
    }
}

impl EvalNode for WriteOutput {
    fn name(&self) -> Cow<'_, str> {
        format!("output.{}", self.name).into()
    }

    fn eval(&self, ctx: &EvalContext<'_>) -> EvalResult {
        // Interpolation may read the state too, so it has to finish before
        // the lock is taken.
        let interpolated = match &self.value {
            Some(raw) => ctx.interpolate(raw, None).map(Some),
            None => Ok(None),
        };

        let state = ctx.state().ok_or(EvalError::MissingState)?;
        let mut state = state.lock()?;

        let config = match interpolated {
            Ok(config) => config,
            Err(err) if self.continue_on_err || ctx.warn_output_errors() => {
                tracing::error!(output = %self.name, "output interpolation failed: {err:#}");
                let unknown = OutputValue::String(UNKNOWN_VALUE.to_string());
                state
                    .add_module(ctx.path())
                    .outputs
                    .insert(self.name.clone(), OutputState::new(unknown, false));
                return Ok(Outcome::EarlyExit);
            }
            Err(source) => {
                return Err(EvalError::Interpolation {
                    name: self.name.clone(),
                    source,
                });
            }
        };

        let value = self.resolve(config, ctx.path())?;
        state
            .add_module(ctx.path())
            .outputs
            .insert(self.name.clone(), OutputState::new(value, self.sensitive));

        Ok(Outcome::Done(None))
    }
}

/// Rewrites computed references so they stay valid outside of the module
/// that produced them: `${x.y}` becomes `${module.<path>.x.y}`.
fn qualify(resolved: &mut Resolved, path: &ModulePath) {
    match resolved {
        Resolved::Text(text) => qualify_text(text, path),
        Resolved::List(items) => items.iter_mut().for_each(|item| qualify_value(item, path)),
        Resolved::Map(map) => map.values_mut().for_each(|item| qualify_value(item, path)),
        Resolved::MapList(maps) => maps
            .iter_mut()
            .flat_map(|map| map.values_mut())
            .for_each(|item| qualify_value(item, path)),
    }
}

fn qualify_value(value: &mut Value, path: &ModulePath) {
    if let Value::String(text) = value {
        qualify_text(text, path);
    }
}

fn qualify_text(text: &mut String, path: &ModulePath) {
    if let Some(rest) = text.strip_prefix("${") {
        *text = format!("${{module.{}.{rest}", path.qualifier());
    }
}
