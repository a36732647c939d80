use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::EvalError;
use crate::graph::{Graph, Vertex, VertexId};

#[derive(Debug, Clone, Copy)]
pub struct Execution {
    pub start: Instant,
    pub duration: Duration,
}

/// What happened to a single vertex during a walk.
#[derive(Debug, Clone)]
pub enum VertexStatus {
    /// Evaluated successfully, with the value the node returned.
    Completed(Option<Value>),
    /// Exited early. Not a failure, dependents still ran.
    Skipped,
    /// Evaluated and failed hard.
    Failed(Arc<EvalError>),
    /// Never evaluated because a dependency did not complete.
    UpstreamFailed,
    /// Never evaluated because the walk was aborted.
    Cancelled,
}

impl VertexStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, VertexStatus::Failed(_))
    }

    /// Whether the vertex was handed to a worker and evaluated.
    pub fn was_evaluated(&self) -> bool {
        matches!(
            self,
            VertexStatus::Completed(_) | VertexStatus::Skipped | VertexStatus::Failed(_)
        )
    }

    fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            VertexStatus::Failed(_) | VertexStatus::UpstreamFailed | VertexStatus::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            VertexStatus::Completed(_) => "completed",
            VertexStatus::Skipped => "skipped",
            VertexStatus::Failed(_) => "failed",
            VertexStatus::UpstreamFailed => "upstream failed",
            VertexStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexReport {
    pub name: String,
    /// Index of the wave the vertex belonged to.
    pub wave: usize,
    pub status: VertexStatus,
    /// Timing, for evaluated vertices only.
    pub execution: Option<Execution>,
}

impl VertexReport {
    pub(crate) fn new(
        name: String,
        wave: usize,
        status: VertexStatus,
        execution: Option<Execution>,
    ) -> Self {
        Self {
            name,
            wave,
            status,
            execution,
        }
    }
}

/// Outcome of every vertex in a walk, plus timing.
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    vertices: HashMap<VertexId, VertexReport>,
    /// Evaluated vertices, in the order their results arrived.
    evaluated: Vec<VertexId>,
    pub(crate) duration: Duration,
}

impl WalkReport {
    pub(crate) fn insert(&mut self, id: VertexId, report: VertexReport) {
        if report.status.was_evaluated() {
            self.evaluated.push(id);
        }
        self.vertices.insert(id, report);
    }

    pub(crate) fn blocks(&self, id: VertexId) -> bool {
        self.status(id).is_some_and(VertexStatus::blocks_dependents)
    }

    pub fn get(&self, id: VertexId) -> Option<&VertexReport> {
        self.vertices.get(&id)
    }

    pub fn status(&self, id: VertexId) -> Option<&VertexStatus> {
        self.vertices.get(&id).map(|report| &report.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &VertexReport)> {
        self.vertices.iter().map(|(&id, report)| (id, report))
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Evaluated vertices in completion order.
    pub fn evaluated(&self) -> &[VertexId] {
        &self.evaluated
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Number of vertices whose status matches `predicate`.
    pub fn count(&self, predicate: impl Fn(&VertexStatus) -> bool) -> usize {
        self.vertices
            .values()
            .filter(|report| predicate(&report.status))
            .count()
    }

    /// Hard failures in completion order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &EvalError)> {
        self.evaluated.iter().filter_map(|id| {
            let report = self.vertices.get(id)?;
            match &report.status {
                VertexStatus::Failed(err) => Some((report.name.as_str(), err.as_ref())),
                _ => None,
            }
        })
    }

    pub fn first_failure(&self) -> Option<(&str, &EvalError)> {
        self.failures().next()
    }

    /// True when every vertex completed or exited early.
    pub fn is_success(&self) -> bool {
        self.vertices
            .values()
            .all(|report| matches!(report.status, VertexStatus::Completed(_) | VertexStatus::Skipped))
    }

    /// Renders the graph as a Mermaid diagram, colour-coded by status.
    ///
    /// * **Green**: Completed
    /// * **Yellow**: Skipped
    /// * **Red**: Failed
    /// * **Grey**: Never evaluated
    pub fn render_mermaid<V: Vertex>(&self, graph: &Graph<V>) -> String {
        let mut f = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_mermaid(graph, &mut f);
        f
    }

    fn write_mermaid<V: Vertex>(&self, graph: &Graph<V>, f: &mut String) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for (id, vertex) in graph.vertices() {
            let name = vertex.name().replace('"', "\\\"");

            let (label, color) = match self.get(id) {
                Some(report) => {
                    let label = match report.execution {
                        Some(exec) => format!("{:.2?}", exec.duration),
                        None => report.status.label().to_string(),
                    };
                    let color = match report.status {
                        VertexStatus::Completed(_) => "#90EE90",
                        VertexStatus::Skipped => "#FFFF99",
                        VertexStatus::Failed(_) => "#FF7F7F",
                        VertexStatus::UpstreamFailed | VertexStatus::Cancelled => "#D3D3D3",
                    };
                    (label, color)
                }
                None => ("not walked".to_string(), "#D3D3D3"),
            };

            writeln!(f, "    {}[\"{}\\n{}\"]", id.index(), name, label)?;
            writeln!(f, "    style {} fill:{}", id.index(), color)?;
        }

        for (source, target, _) in graph.edges() {
            writeln!(f, "    {} --> {}", source.index(), target.index())?;
        }

        Ok(())
    }
}
