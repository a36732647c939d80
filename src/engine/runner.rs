use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::Instant;

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::WalkConfig;
use crate::engine::diagnostics::{Execution, VertexReport, VertexStatus, WalkReport};
use crate::error::{EvalError, WalkError};
use crate::eval::{EvalResult, Outcome};
use crate::graph::{Graph, Vertex, VertexId};

/// Result of one dispatched vertex, sent back from the worker.
struct Finished {
    id: VertexId,
    name: String,
    status: VertexStatus,
    execution: Option<Execution>,
}

/// Executes the graph wave by wave.
///
/// The algorithm works as follows:
/// 1. Waves are visited in order. Each one is a barrier: the next wave only
///    starts once every vertex of the current one has finished.
/// 2. Before dispatch, a vertex is checked against the abort flag and against
///    the status of its dependencies. Vertices that cannot run are recorded
///    right away and never reach a worker.
/// 3. The remaining vertices of the wave are spawned onto the rayon pool.
///    Work still queued when a fail-fast abort is raised observes the flag
///    and is cancelled instead of evaluated.
/// 4. Once the wave drains, the results are recorded in completion order.
pub(crate) fn run_waves<V, F>(
    graph: &Graph<V>,
    waves: &[Vec<VertexId>],
    config: &WalkConfig,
    eval: &F,
) -> Result<WalkReport, WalkError>
where
    V: Vertex,
    F: Fn(&V) -> EvalResult + Sync,
{
    let walk_start = Instant::now();
    let fail_fast = config.fail_fast();

    let root_span = tracing::span!(Level::INFO, "walk");
    root_span.pb_set_length(graph.len() as u64);
    root_span.pb_set_style(&crate::utils::walk_style());
    root_span.pb_set_message("Walking graph...");
    let _enter = root_span.enter();

    let abort = AtomicBool::new(false);
    let mut report = WalkReport::default();
    let mut first_failure: Option<(String, Arc<EvalError>)> = None;

    for (wave, ids) in waves.iter().enumerate() {
        let mut ready = Vec::with_capacity(ids.len());

        for &id in ids {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            let name = vertex.name().into_owned();

            let status = if abort.load(Ordering::SeqCst) {
                tracing::warn!(vertex = %name, "not dispatched, walk aborted");
                VertexStatus::Cancelled
            } else if graph.dependencies(id).any(|dep| report.blocks(dep)) {
                tracing::warn!(vertex = %name, "not dispatched, a dependency failed");
                VertexStatus::UpstreamFailed
            } else {
                ready.push((id, vertex, name));
                continue;
            };

            root_span.pb_inc(1);
            report.insert(id, VertexReport::new(name, wave, status, None));
        }

        if ready.is_empty() {
            continue;
        }

        let (sender, receiver) = channel::<Finished>();

        rayon::scope(|s| {
            for (id, vertex, name) in ready {
                let sender = sender.clone();
                let abort = &abort;
                let root_span = &root_span;

                s.spawn(move |_| {
                    let finished = run_vertex(id, vertex, name, eval, abort, fail_fast);
                    root_span.pb_inc(1);
                    // The receiver outlives the scope, so this cannot fail.
                    let _ = sender.send(finished);
                });
            }
        });

        drop(sender);

        for finished in receiver.try_iter() {
            if let VertexStatus::Failed(err) = &finished.status {
                match first_failure {
                    None => first_failure = Some((finished.name.clone(), err.clone())),
                    Some(_) if fail_fast => {
                        tracing::debug!(vertex = %finished.name, "in-flight failure after abort");
                    }
                    Some(_) => {}
                }
            }

            report.insert(
                finished.id,
                VertexReport::new(finished.name, wave, finished.status, finished.execution),
            );
        }
    }

    report.duration = walk_start.elapsed();
    root_span.pb_set_message("Walk complete!");

    match first_failure {
        Some((vertex, source)) if fail_fast => Err(WalkError::Aborted {
            vertex,
            source,
            report: Box::new(report),
        }),
        _ => {
            tracing::info!(
                vertices = report.len(),
                elapsed = ?report.duration,
                "walk complete"
            );
            Ok(report)
        }
    }
}

fn run_vertex<V, F>(
    id: VertexId,
    vertex: &V,
    name: String,
    eval: &F,
    abort: &AtomicBool,
    fail_fast: bool,
) -> Finished
where
    V: Vertex,
    F: Fn(&V) -> EvalResult + Sync,
{
    if abort.load(Ordering::SeqCst) {
        tracing::warn!(vertex = %name, "not started, walk aborted");
        return Finished {
            id,
            name,
            status: VertexStatus::Cancelled,
            execution: None,
        };
    }

    let span = tracing::span!(Level::INFO, "vertex", name = %name);
    let _enter = span.enter();

    let start = Instant::now();

    // A panicking node only holds references into the graph and, at most,
    // the state lock, which reports poisoning on its own.
    let result = match catch_unwind(AssertUnwindSafe(|| eval(vertex))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };
            Err(EvalError::Panic(msg))
        }
    };

    let execution = Execution {
        start,
        duration: start.elapsed(),
    };

    let status = match result {
        Ok(Outcome::Done(value)) => VertexStatus::Completed(value),
        Ok(Outcome::EarlyExit) => {
            tracing::info!(vertex = %name, "exited early, dependents continue");
            VertexStatus::Skipped
        }
        Err(err) => {
            if fail_fast {
                abort.store(true, Ordering::SeqCst);
            }
            tracing::error!(vertex = %name, "{err}");
            VertexStatus::Failed(Arc::new(err))
        }
    };

    Finished {
        id,
        name,
        status,
        execution: Some(execution),
    }
}
