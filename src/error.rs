use std::sync::Arc;

use thiserror::Error;

use crate::engine::WalkReport;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Edge endpoint '{0}' is not a vertex of this graph")]
    MissingVertex(String),

    #[error("Vertex id {0} is not part of this graph")]
    UnknownId(usize),

    #[error("Cycle detected in graph: {}", format_cycles(.0))]
    Cycle(Vec<Vec<String>>),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| cycle.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State lock poisoned by a panicking evaluation")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Output '{name}' interpolation failed:\n{source}")]
    Interpolation {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot write state to nil state")]
    MissingState,

    #[error("output {name} is not a valid type ({kind})")]
    InvalidOutputType { name: String, kind: &'static str },

    #[error("output {name} type (list of maps) with {len} values not valid for type map")]
    AmbiguousMap { name: String, len: usize },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Evaluation panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("Walk refused to start.\n{0}")]
    Graph(#[from] GraphError),

    #[error("Vertex '{vertex}':\n{source}")]
    Aborted {
        vertex: String,
        source: Arc<EvalError>,
        report: Box<WalkReport>,
    },

    #[error("Couldn't build worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl WalkError {
    /// Partial report of an aborted walk, including in-flight results.
    pub fn report(&self) -> Option<&WalkReport> {
        match self {
            WalkError::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// A resolved value outside the shapes an output can take.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("not a valid output type ({0})")]
pub struct ShapeError(pub(crate) &'static str);

impl ShapeError {
    pub fn kind(&self) -> &'static str {
        self.0
    }
}
