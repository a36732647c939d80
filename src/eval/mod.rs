//! Evaluation nodes and the context they run in.
//!
//! A node is a unit of work attached to a graph vertex. It receives an
//! [`EvalContext`] scoped to one module path, through which it may resolve
//! expressions and take the lock on the shared state. Nodes report one of
//! three outcomes: a value ([`Outcome::Done`]), a soft skip
//! ([`Outcome::EarlyExit`]) or a hard failure (`Err`).

mod interpolate;
mod output;

use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

pub use crate::eval::interpolate::{
    Interpolator, Overrides, RawConfig, Resolved, ResolvedConfig, Scope, UNKNOWN_VALUE,
};
pub use crate::eval::output::{DeleteOutput, WriteOutput};

use crate::config::WalkConfig;
use crate::error::EvalError;
use crate::graph::{HashCode, Hashable, Vertex};
use crate::state::{ModulePath, SharedState};

/// Successful result of a node evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The node finished, optionally producing a value.
    Done(Option<Value>),
    /// The node could not finish, but this does not count as a failure.
    /// Dependents still run.
    EarlyExit,
}

pub type EvalResult = Result<Outcome, EvalError>;

/// A polymorphic unit of work.
pub trait EvalNode: Hashable + Debug + Send + Sync {
    fn name(&self) -> Cow<'_, str>;

    fn eval(&self, ctx: &EvalContext<'_>) -> EvalResult;
}

/// Gateway through which a node reaches the shared state and the
/// interpolation service.
pub struct EvalContext<'a> {
    path: ModulePath,
    state: Option<&'a SharedState>,
    interpolator: &'a dyn Interpolator,
    config: &'a WalkConfig,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        path: ModulePath,
        state: Option<&'a SharedState>,
        interpolator: &'a dyn Interpolator,
        config: &'a WalkConfig,
    ) -> Self {
        Self {
            path,
            state,
            interpolator,
            config,
        }
    }

    /// Module the context is scoped to.
    pub fn path(&self) -> &ModulePath {
        &self.path
    }

    /// The shared state, locked with [`SharedState::lock`].
    pub fn state(&self) -> Option<&'a SharedState> {
        self.state
    }

    /// Resolves a raw expression within the current module.
    ///
    /// Must not be called while holding the state lock: the interpolator is
    /// free to lock the state itself.
    pub fn interpolate(
        &self,
        raw: &RawConfig,
        overrides: Option<&Overrides>,
    ) -> anyhow::Result<ResolvedConfig> {
        let scope = Scope {
            path: &self.path,
            state: self.state,
            overrides,
        };
        self.interpolator.interpolate(raw, &scope)
    }

    pub fn warn_output_errors(&self) -> bool {
        self.config.warn_output_errors
    }

    pub fn config(&self) -> &'a WalkConfig {
        self.config
    }

    /// The same context, addressing another module explicitly.
    pub fn with_path(&self, path: ModulePath) -> EvalContext<'a> {
        EvalContext {
            path,
            state: self.state,
            interpolator: self.interpolator,
            config: self.config,
        }
    }
}

/// Runs child nodes in order, stopping at the first failure or early exit.
#[derive(Debug, Default, Clone)]
pub struct Sequence {
    nodes: Vec<Arc<dyn EvalNode>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, node: impl EvalNode + 'static) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Hashable for Sequence {
    fn hashcode(&self) -> HashCode {
        let codes: Vec<HashCode> = self.nodes.iter().map(|node| node.hashcode()).collect();
        if codes.iter().all(HashCode::is_content) {
            HashCode::typed(&codes)
        } else {
            HashCode::address_of(self)
        }
    }
}

impl EvalNode for Sequence {
    fn name(&self) -> Cow<'_, str> {
        let names: Vec<_> = self.nodes.iter().map(|node| node.name()).collect();
        format!("sequence({})", names.join(", ")).into()
    }

    fn eval(&self, ctx: &EvalContext<'_>) -> EvalResult {
        let mut last = Outcome::Done(None);
        for node in &self.nodes {
            match node.eval(ctx)? {
                Outcome::EarlyExit => return Ok(Outcome::EarlyExit),
                done => last = done,
            }
        }
        Ok(last)
    }
}

/// Graph vertex binding a node to the module it evaluates in.
#[derive(Debug, Clone)]
pub struct EvalVertex {
    pub path: ModulePath,
    pub node: Arc<dyn EvalNode>,
}

impl EvalVertex {
    pub fn new(path: ModulePath, node: impl EvalNode + 'static) -> Self {
        Self {
            path,
            node: Arc::new(node),
        }
    }

    pub fn shared(path: ModulePath, node: Arc<dyn EvalNode>) -> Self {
        Self { path, node }
    }
}

/// Identity is always scoped to the module path. Opaque nodes contribute the
/// address of the shared node, so one node bound to two modules yields two
/// vertices.
impl Hashable for EvalVertex {
    fn hashcode(&self) -> HashCode {
        match self.node.hashcode() {
            HashCode::Content(hash) => HashCode::of(&(&self.path, self.node.name(), hash)),
            HashCode::Address(addr) => HashCode::of(&(&self.path, addr)),
        }
    }
}

impl Vertex for EvalVertex {
    fn name(&self) -> Cow<'_, str> {
        if self.path.is_root() {
            self.node.name()
        } else {
            format!("module.{}.{}", self.path.qualifier(), self.node.name()).into()
        }
    }
}
