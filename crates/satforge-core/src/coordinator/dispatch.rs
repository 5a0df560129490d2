//! Concurrent proposer dispatch.
//!
//! Every sub-task runs on its own tokio task against an immutable snapshot of
//! the working state and metrics. A semaphore caps concurrency and each call
//! carries its own timeout, so one slow or broken proposer costs only its own
//! proposal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use satforge_state::{DesignState, MetricMap};

use crate::domain::{Domain, RawProposal, SubTask};
use crate::ports::{DomainProposer, OracleError};

/// What came back for one sub-task.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub task_index: usize,
    pub task: SubTask,
    pub result: Result<RawProposal, OracleError>,
}

/// Dispatch `tasks` to the proposer registered for each task's domain.
///
/// Outcomes come back ordered by task index regardless of completion order.
/// Tasks whose domain has no registered proposer yield `Unavailable`.
#[instrument(skip_all, fields(tasks = tasks.len(), max_concurrent = max_concurrent))]
pub async fn dispatch_parallel(
    proposers: &HashMap<Domain, Arc<dyn DomainProposer>>,
    tasks: &[SubTask],
    state: Arc<DesignState>,
    metrics: Arc<MetricMap>,
    max_concurrent: usize,
    limit: Duration,
) -> Vec<DispatchOutcome> {
    let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut handles = Vec::new();

    for (task_index, task) in tasks.iter().enumerate() {
        let Some(proposer) = proposers.get(&task.domain).cloned() else {
            warn!(task_id = %task.task_id, domain = %task.domain, "no proposer registered for domain");
            outcomes.push(DispatchOutcome {
                task_index,
                task: task.clone(),
                result: Err(OracleError::Unavailable(format!(
                    "no proposer registered for domain {}",
                    task.domain
                ))),
            });
            continue;
        };

        let sem = Arc::clone(&sem);
        let state = Arc::clone(&state);
        let metrics = Arc::clone(&metrics);
        let task = task.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let result =
                match tokio::time::timeout(limit, proposer.propose(&task, &state, &metrics)).await {
                    Ok(res) => res,
                    Err(_) => Err(OracleError::timeout("proposal", limit)),
                };
            DispatchOutcome {
                task_index,
                task,
                result,
            }
        }));
    }

    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!(error = %e, "proposer task aborted"),
        }
    }

    outcomes.sort_by_key(|o| o.task_index);
    outcomes
}
