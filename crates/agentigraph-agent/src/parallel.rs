//! Concurrent branch execution over forks of one agent state.
//!
//! Branches start in declaration order under a concurrency cap. A fatal
//! error returns at once and drops the siblings still running; other errors
//! wait for every branch and the lowest-index one is reported.

use crate::state::AgentState;
use agentigraph_core::{Error, Result};
use agentigraph_llm::Usage;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use tracing::{debug, warn};

pub type Branch = Box<dyn FnOnce(AgentState) -> BoxFuture<'static, Result<AgentState>> + Send>;

/// Box an async closure as a branch.
pub fn branch<F, Fut>(f: F) -> Branch
where
    F: FnOnce(AgentState) -> Fut + Send + 'static,
    Fut: Future<Output = Result<AgentState>> + Send + 'static,
{
    Box::new(move |state| f(state).boxed())
}

/// Copy `base` for branch `branch_index`: messages tagged with their branch
/// and position, tools shared, cancellation linked to the parent.
pub fn fork_state(base: &AgentState, branch_index: usize) -> AgentState {
    let mut state = base.clone();
    for (i, m) in state.messages.iter_mut().enumerate() {
        m.meta.branch_index = Some(branch_index);
        m.meta.local_index = Some(i);
    }
    state.cancel = base.cancel.child_token();
    state
}

pub trait Reducer: Send + Sync {
    fn reduce(&self, base: &AgentState, branches: Vec<AgentState>) -> AgentState;
}

/// Base prefix once, then each branch's new messages ordered by
/// `(branch_index, local_index)`, branch tags stripped. Usage counters are
/// summed field-wise over the branches.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReducer;

impl Reducer for DefaultReducer {
    fn reduce(&self, base: &AgentState, branches: Vec<AgentState>) -> AgentState {
        let mut merged = base.clone();
        if branches.is_empty() {
            return merged;
        }

        let mut added = Vec::new();
        for (b, state) in branches.iter().enumerate() {
            for (i, m) in state.messages.iter().enumerate() {
                // Forked messages carry a branch tag; anything untagged is new.
                if m.meta.branch_index.is_some() {
                    continue;
                }
                let mut m = m.clone();
                m.meta.branch_index = Some(b);
                m.meta.local_index = Some(i);
                added.push(m);
            }
        }
        added.sort_by_key(|m| (m.meta.branch_index, m.meta.local_index));
        merged.messages.extend(added);
        for m in merged.messages.iter_mut() {
            m.meta.clear_branch();
        }

        merged.step_count = branches.iter().map(|s| s.step_count).max().unwrap_or(base.step_count) + 1;
        merged.usage = branches.iter().map(|s| s.usage).fold(Usage::default(), |acc, u| acc + u);
        for state in &branches {
            merged
                .steps
                .extend(state.steps.iter().skip(base.steps.len()).cloned());
        }
        merged.done = branches.iter().all(|s| s.done);
        merged.output = branches
            .iter()
            .map(|s| s.output.as_str())
            .filter(|o| !o.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        merged.finish_reason = branches.last().and_then(|s| s.finish_reason.clone());
        merged
    }
}

pub struct ParallelExecutor<R: Reducer = DefaultReducer> {
    max_concurrency: Option<usize>,
    reducer: R,
}

impl Default for ParallelExecutor<DefaultReducer> {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelExecutor<DefaultReducer> {
    pub fn new() -> Self {
        Self { max_concurrency: None, reducer: DefaultReducer }
    }
}

impl<R: Reducer> ParallelExecutor<R> {
    pub fn with_reducer<R2: Reducer>(self, reducer: R2) -> ParallelExecutor<R2> {
        ParallelExecutor { max_concurrency: self.max_concurrency, reducer }
    }

    /// Cap on branches in flight. Defaults to the branch count.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub async fn execute(&self, base: &AgentState, branches: Vec<Branch>) -> Result<AgentState> {
        let n = branches.len();
        if n == 0 {
            return Ok(base.clone());
        }
        let limit = self.max_concurrency.unwrap_or(n).max(1);
        debug!(branches = n, limit, "parallel execution");

        let forks: Vec<AgentState> = (0..n).map(|i| fork_state(base, i)).collect();
        let tokens: Vec<_> = forks.iter().map(|s| s.cancel.clone()).collect();

        let runs = branches
            .into_iter()
            .zip(forks)
            .enumerate()
            .map(|(i, (run, state))| async move { (i, run(state).await) });
        let mut in_flight = futures::stream::iter(runs).buffer_unordered(limit);

        let mut results: Vec<Option<AgentState>> = (0..n).map(|_| None).collect();
        let mut first_error: Option<(usize, Error)> = None;

        while let Some((i, outcome)) = in_flight.next().await {
            match outcome {
                Ok(state) => results[i] = Some(state),
                Err(e) if e.is_fatal() => {
                    warn!(branch = i, error = %e, "fatal branch error, abandoning siblings");
                    tokens.iter().for_each(|t| t.cancel());
                    return Err(e);
                }
                Err(e) => {
                    warn!(branch = i, error = %e, "branch failed");
                    if first_error.as_ref().map(|(j, _)| i < *j).unwrap_or(true) {
                        first_error = Some((i, e));
                    }
                }
            }
        }

        if let Some((_, e)) = first_error {
            return Err(e);
        }
        let finished: Vec<AgentState> = results.into_iter().flatten().collect();
        Ok(self.reducer.reduce(base, finished))
    }
}
