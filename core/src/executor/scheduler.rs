use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::error::PlanError;

/// Partition `task_ids` into sequential batches of mutually independent tasks.
///
/// A task joins a batch once each of its dependencies is either in
/// `satisfied` (completed or skipped before this call) or in an earlier
/// batch. Input order is kept inside a batch, so callers pass tasks already
/// sorted by priority.
///
/// A dependency that is neither satisfied nor part of `task_ids` can never be
/// met and yields `DependencyUnsatisfied`.
pub fn compute_batches<'a, D>(
    task_ids: &[String],
    dependencies: D,
    satisfied: &HashSet<String>,
) -> Result<Vec<Vec<String>>, PlanError>
where
    D: Fn(&str) -> &'a [String],
{
    let members: HashSet<&str> = task_ids.iter().map(String::as_str).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&String> = task_ids.iter().collect();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&String>, Vec<&String>) =
            remaining.into_iter().partition(|id| {
                dependencies(id.as_str())
                    .iter()
                    .all(|dep| satisfied.contains(dep) || done.contains(dep.as_str()))
            });

        if ready.is_empty() {
            // Nothing can progress: report the first blocking dependency.
            let task_id = blocked[0];
            let dependency = dependencies(task_id.as_str())
                .iter()
                .find(|dep| !satisfied.contains(*dep) && !done.contains(dep.as_str()))
                .cloned()
                .unwrap_or_default();
            tracing::error!(
                task_id = %task_id,
                dependency = %dependency,
                in_phase = members.contains(dependency.as_str()),
                "batch partition stalled"
            );
            return Err(PlanError::DependencyUnsatisfied {
                task_id: task_id.clone(),
                dependency,
            });
        }

        done.extend(ready.iter().copied().map(String::as_str));
        batches.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }

    Ok(batches)
}

/// Execute one batch concurrently and join every member.
///
/// # Arguments
///
/// * `task_ids` - Task IDs in the batch
/// * `max_concurrency` - Maximum number of tasks running at once
/// * `executor_fn` - Async function running a single task to a terminal outcome
///
/// # Returns
///
/// One outcome per task, in completion order. The function only returns once
/// every member finished, which is the batch join point.
pub async fn execute_batch_parallel<F, Fut, O>(
    task_ids: &[String],
    max_concurrency: usize,
    executor_fn: F,
) -> Vec<O>
where
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = O> + Send,
{
    let sem = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut futs: FuturesUnordered<_> = FuturesUnordered::new();

    for task_id in task_ids {
        let task_id = task_id.clone();
        let sem = sem.clone();
        let executor = executor_fn.clone();

        futs.push(async move {
            // The semaphore is never closed, so acquire only fails if it is
            // dropped; running unthrottled is the safe fallback.
            let _permit = sem.acquire_owned().await.ok();
            executor(task_id).await
        });
    }

    let mut outcomes = Vec::with_capacity(task_ids.len());
    while let Some(outcome) = futs.next().await {
        outcomes.push(outcome);
    }
    outcomes
}
