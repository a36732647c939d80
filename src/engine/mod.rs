//! Concurrent, wave-ordered execution of a [`Graph`].
//!
//! The [`Walker`] partitions the graph into waves by dependency depth and
//! runs each wave on a rayon pool. Waves are barriers, so a vertex never
//! starts before all of its dependencies finished. Per-vertex outcomes are
//! collected in a [`WalkReport`].

mod diagnostics;
mod runner;

use crate::config::WalkConfig;
use crate::error::WalkError;
use crate::eval::{EvalContext, EvalResult, EvalVertex, Interpolator};
use crate::graph::{Graph, Vertex};
use crate::state::SharedState;

pub use crate::engine::diagnostics::{Execution, VertexReport, VertexStatus, WalkReport};

/// Walks graphs with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Walker {
    config: WalkConfig,
}

impl Walker {
    pub fn new(config: WalkConfig) -> Self {
        Self { config }
    }

    /// Walker configured from the process environment, see
    /// [`WalkConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(WalkConfig::from_env())
    }

    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    /// Evaluates every vertex of `graph` exactly once, in dependency order.
    ///
    /// A graph with a cycle is rejected before anything runs. Under
    /// [`ErrorPolicy::FailFast`](crate::ErrorPolicy::FailFast) the first hard
    /// failure is returned as [`WalkError::Aborted`], with the partial report
    /// attached. Under `Continue` the report lists every failure.
    pub fn walk<V, F>(&self, graph: &Graph<V>, eval: F) -> Result<WalkReport, WalkError>
    where
        V: Vertex,
        F: Fn(&V) -> EvalResult + Sync,
    {
        let waves = graph.waves()?;

        match self.config.parallelism {
            Some(workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers.get())
                    .thread_name(|i| format!("dagwalk-{i}"))
                    .build()?;
                pool.install(|| runner::run_waves(graph, &waves, &self.config, &eval))
            }
            None => runner::run_waves(graph, &waves, &self.config, &eval),
        }
    }

    /// Walks a graph of evaluation nodes against a shared state.
    pub fn evaluate(
        &self,
        graph: &Graph<EvalVertex>,
        state: &SharedState,
        interpolator: &dyn Interpolator,
    ) -> Result<WalkReport, WalkError> {
        self.walk(graph, |vertex| {
            let ctx = EvalContext::new(vertex.path.clone(), Some(state), interpolator, &self.config);
            vertex.node.eval(&ctx)
        })
    }
}
