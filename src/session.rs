//! Task Session state machine.
//!
//! A [`TaskRunner`] owns the page, the decision client and all state that outlives a single
//! task (prior task descriptions, full screen focus, latest snapshot). Each call to
//! [`TaskRunner::run_task`] drives one task from `Running` to a terminal outcome by cycling
//! snapshot, decision and dispatch.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::brain::{DecisionClient, DecisionRequest, parse_decision};
use crate::config::{ERROR_THRESHOLD, EngineConfig};
use crate::dispatch::{BatchOutcome, Dispatcher};
use crate::dom::{self, Snapshot};
use crate::error::{ActionFailure, SnapshotError, ValidationError};
use crate::hands::Page;
use crate::signals::Signals;
use crate::spinner::with_progress;
use crate::types::{ActionOutcome, AgentEvent, HistoryEntry};

/// Consecutive-failure counter that bounds how long a task may keep failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorBudget {
    consecutive: u32,
}

impl ErrorBudget {
    /// Count one outcome. Any success clears the run of failures.
    pub fn record(&mut self, failed: bool) {
        if failed {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn is_exhausted(&self) -> bool {
        self.consecutive >= ERROR_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Too many consecutive action failures.
    ErrorThreshold,
    /// The decision-maker could not be reached or returned nothing.
    DecisionUnavailable(String),
    /// The decision output was not a JSON action list.
    DecisionParse(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ErrorThreshold => write!(
                f,
                "stopped after {} consecutive errors",
                ERROR_THRESHOLD
            ),
            AbortReason::DecisionUnavailable(e) => write!(f, "no decision available: {}", e),
            AbortReason::DecisionParse(e) => write!(f, "unusable decision: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { summary: String },
    Cancelled,
    Aborted(AbortReason),
}

impl TaskOutcome {
    pub fn event(&self) -> AgentEvent {
        match self {
            TaskOutcome::Completed { summary } => AgentEvent::TaskComplete {
                summary: summary.clone(),
            },
            TaskOutcome::Cancelled => AgentEvent::TaskCancelled,
            TaskOutcome::Aborted(reason) => AgentEvent::TaskAborted {
                reason: reason.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Terminal(TaskOutcome),
}

/// Per-task state: the command history and the error budget. Dropped when the task ends.
#[derive(Debug)]
pub struct TaskSession {
    task: String,
    history: Vec<HistoryEntry>,
    budget: ErrorBudget,
    steps: usize,
}

impl TaskSession {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            history: Vec::new(),
            budget: ErrorBudget::default(),
            steps: 0,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn budget(&self) -> ErrorBudget {
        self.budget
    }

    /// 1-based number for the next dispatched action of this task.
    pub fn next_step(&mut self) -> usize {
        self.steps += 1;
        self.steps
    }

    /// Append `{command, outcome}` to the history and count it.
    /// Returns true once the error budget is exhausted.
    pub fn record(&mut self, command: Value, outcome: ActionOutcome) -> bool {
        self.budget.record(outcome.is_failure());
        self.history.push(HistoryEntry { command, outcome });
        self.budget.is_exhausted()
    }

}

pub struct TaskRunner<P: ?Sized, D> {
    page: Arc<P>,
    brain: D,
    prior_tasks: Vec<String>,
    focus: Option<String>,
    snapshot: Arc<Snapshot>,
    signals: Signals,
    config: EngineConfig,
    events: broadcast::Sender<AgentEvent>,
    state: SessionState,
    last_outcome: Option<TaskOutcome>,
}

impl<P, D> TaskRunner<P, D>
where
    P: Page + ?Sized + 'static,
    D: DecisionClient,
{
    pub fn new(page: Arc<P>, brain: D, signals: Signals, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            page,
            brain,
            prior_tasks: Vec::new(),
            focus: None,
            snapshot: Arc::new(Snapshot::empty()),
            signals,
            config,
            events,
            state: SessionState::Idle,
            last_outcome: None,
        }
    }

    /// Publish events on an existing channel instead of a private one.
    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Outcome of the most recent task, kept after the runner returns to `Idle`.
    pub fn last_outcome(&self) -> Option<&TaskOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn prior_tasks(&self) -> &[String] {
        &self.prior_tasks
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Drive one task to a terminal outcome. Never fails: every error ends up in the outcome.
    pub async fn run_task(&mut self, task: &str) -> TaskOutcome {
        tracing::info!(%task, "task started");
        self.signals.clear_cancel();
        self.state = SessionState::Running;
        self.emit(AgentEvent::TaskStarted {
            task: task.to_string(),
        });

        let mut session = TaskSession::new(task);
        let outcome = self.cycle(&mut session).await;

        match &outcome {
            TaskOutcome::Completed { summary } => tracing::info!(%summary, "task completed"),
            TaskOutcome::Cancelled => tracing::info!("task cancelled"),
            TaskOutcome::Aborted(reason) => tracing::warn!(%reason, "task aborted"),
        }
        self.state = SessionState::Terminal(outcome.clone());
        self.emit(outcome.event());

        self.prior_tasks.push(task.to_string());
        self.signals.clear_cancel();
        self.last_outcome = Some(outcome.clone());
        self.state = SessionState::Idle;
        outcome
    }

    async fn cycle(&mut self, session: &mut TaskSession) -> TaskOutcome {
        loop {
            if self.signals.is_cancelled() {
                return TaskOutcome::Cancelled;
            }

            let (captured, url) = self.observe().await;
            match captured {
                Ok(snapshot) => self.snapshot = Arc::new(snapshot),
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot failed");
                    self.snapshot = Arc::new(Snapshot::empty());
                    let outcome = ActionOutcome::Failure(ActionFailure::Execution {
                        category: e.category(),
                    });
                    if session.record(json!({"action": "snapshot"}), outcome) {
                        return TaskOutcome::Aborted(AbortReason::ErrorThreshold);
                    }
                }
            }

            self.emit(AgentEvent::Thinking);
            let request = DecisionRequest {
                task: session.task(),
                prior_tasks: &self.prior_tasks,
                history: session.history(),
                url: &url,
                snapshot: &self.snapshot,
                focus: self.focus.as_deref(),
            };
            let decided = with_progress(
                &self.config,
                "Thinking...",
                self.brain.decide(&request),
                |r| r.is_ok(),
            )
            .await;
            let raw = match decided {
                Ok(raw) => raw,
                Err(e) => {
                    return TaskOutcome::Aborted(AbortReason::DecisionUnavailable(e.to_string()));
                }
            };
            let batch = match parse_decision(&raw) {
                Ok(batch) => batch,
                Err(e) => return TaskOutcome::Aborted(AbortReason::DecisionParse(e.to_string())),
            };
            tracing::info!(actions = batch.len(), "decision received");
            if batch.is_empty() {
                let outcome = ActionOutcome::Failure(ValidationError::EmptyBatch.into());
                if session.record(json!([]), outcome) {
                    return TaskOutcome::Aborted(AbortReason::ErrorThreshold);
                }
                tokio::time::sleep(self.config.timings.cycle_settle).await;
                continue;
            }

            let dispatcher = Dispatcher {
                page: &self.page,
                snapshot: &mut self.snapshot,
                focus: &mut self.focus,
                session: &mut *session,
                signals: &self.signals,
                config: &self.config,
                events: &self.events,
            };
            match dispatcher.run(batch).await {
                BatchOutcome::Done { summary } => return TaskOutcome::Completed { summary },
                BatchOutcome::ErrorBudgetExhausted => {
                    return TaskOutcome::Aborted(AbortReason::ErrorThreshold);
                }
                BatchOutcome::Continue => {}
            }

            tokio::time::sleep(self.config.timings.cycle_settle).await;
        }
    }

    /// Capture the page and read its URL on the blocking pool.
    async fn observe(&self) -> (Result<Snapshot, SnapshotError>, String) {
        let page = Arc::clone(&self.page);
        let observed = tokio::task::spawn_blocking(move || {
            let snapshot = dom::capture(&*page);
            let url = page.current_url().unwrap_or_default();
            (snapshot, url)
        })
        .await;
        observed.unwrap_or_else(|e| {
            (
                Err(SnapshotError::Malformed(format!("capture task failed: {}", e))),
                String::new(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> ActionOutcome {
        ActionOutcome::Failure(ActionFailure::Validation(ValidationError::MissingAction))
    }

    #[test]
    fn budget_resets_on_success() {
        let mut budget = ErrorBudget::default();
        for _ in 0..5 {
            budget.record(true);
        }
        assert_eq!(budget.consecutive(), 5);
        assert!(!budget.is_exhausted());
        budget.record(false);
        assert_eq!(budget.consecutive(), 0);
    }

    #[test]
    fn sixth_consecutive_failure_exhausts_the_budget() {
        let mut session = TaskSession::new("open settings");
        for _ in 0..5 {
            assert!(!session.record(json!({"action": "click"}), failure()));
        }
        assert!(session.record(json!({"action": "click"}), failure()));
        assert_eq!(session.history().len(), 6);
    }

    #[test]
    fn capture_failures_report_only_the_category() {
        let err = SnapshotError::Capture(crate::error::PageError::Script("boom".into()));
        assert_eq!(err.category(), "Script");
        assert_eq!(
            SnapshotError::Malformed("no root".into()).category(),
            "SnapshotMalformed"
        );
    }

    #[test]
    fn outcomes_map_to_events() {
        assert_eq!(TaskOutcome::Cancelled.event(), AgentEvent::TaskCancelled);
        assert_eq!(
            TaskOutcome::Aborted(AbortReason::ErrorThreshold).event(),
            AgentEvent::TaskAborted {
                reason: "stopped after 6 consecutive errors".into()
            }
        );
    }
}
