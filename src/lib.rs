#![forbid(unsafe_code)]
//! Concurrent evaluation of content-addressed dependency graphs.
//!
//! A [`Graph`] holds vertices identified by a [`HashCode`], connected by
//! edges whose identity is derived from both endpoints. A [`Walker`] runs
//! every vertex exactly once, never before its dependencies have finished,
//! and reports the outcome of each one in a [`WalkReport`].
//!
//! On top of the generic walk sits the evaluation layer: [`EvalNode`]s bound
//! to a module path through [`EvalVertex`], reading and writing a
//! [`SharedState`] through an [`EvalContext`]. The output nodes
//! [`WriteOutput`] and [`DeleteOutput`] are provided.
//!
//! ```
//! use dagwalk::{Graph, ModulePath, EvalVertex, RawConfig, ResolvedConfig};
//! use dagwalk::{Scope, SharedState, Walker, WriteOutput};
//!
//! let mut graph = Graph::new();
//! graph.add(EvalVertex::new(
//!     ModulePath::root(),
//!     WriteOutput::new("greeting", RawConfig::value("hello")),
//! ));
//!
//! let echo = |raw: &RawConfig, _: &Scope<'_>| -> anyhow::Result<ResolvedConfig> {
//!     Ok(ResolvedConfig::new().with("value", raw.get("value").unwrap_or_default()))
//! };
//!
//! let state = SharedState::default();
//! let report = Walker::default().evaluate(&graph, &state, &echo)?;
//! assert!(report.is_success());
//! # Ok::<(), dagwalk::WalkError>(())
//! ```

mod config;
mod core;
mod engine;
mod error;
mod eval;
mod graph;
mod state;
mod utils;

pub use crate::config::{ErrorPolicy, WalkConfig};
pub use crate::core::Hash32;
pub use crate::engine::{Execution, VertexReport, VertexStatus, WalkReport, Walker};
pub use crate::error::{EvalError, GraphError, ShapeError, StateError, WalkError};
pub use crate::eval::{
    DeleteOutput, EvalContext, EvalNode, EvalResult, EvalVertex, Interpolator, Outcome, Overrides,
    RawConfig, Resolved, ResolvedConfig, Scope, Sequence, UNKNOWN_VALUE, WriteOutput,
};
pub use crate::graph::{BasicEdge, Edge, EdgeHash, Graph, HashCode, Hashable, Vertex, VertexId};
pub use crate::state::{
    ModulePath, ModuleState, OutputState, OutputType, OutputValue, SharedState, State,
};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
