//! Action Dispatch Loop: runs one decided batch strictly in order.

use std::sync::Arc;
use std::thread;

use tokio::sync::broadcast;

use crate::config::{EngineConfig, Timings};
use crate::dom::{self, Snapshot};
use crate::error::{ActionFailure, PageError};
use crate::executor::{self, ExecContext};
use crate::hands::Page;
use crate::session::TaskSession;
use crate::signals::Signals;
use crate::spinner::with_progress;
use crate::types::{Action, ActionOutcome, AgentEvent, ProposedAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every action ran; the task needs another cycle.
    Continue,
    /// A `done` action was reached.
    Done { summary: String },
    ErrorBudgetExhausted,
}

/// Borrowed view of the runner state a batch may read and update.
pub struct Dispatcher<'a, P: ?Sized> {
    pub page: &'a Arc<P>,
    pub snapshot: &'a mut Arc<Snapshot>,
    pub focus: &'a mut Option<String>,
    pub session: &'a mut TaskSession,
    pub signals: &'a Signals,
    pub config: &'a EngineConfig,
    pub events: &'a broadcast::Sender<AgentEvent>,
}

impl<P: Page + ?Sized + 'static> Dispatcher<'_, P> {
    pub async fn run(mut self, batch: Vec<ProposedAction>) -> BatchOutcome {
        for proposal in batch {
            if proposal.is_done() {
                let summary = proposal
                    .intend
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "Task completed".to_string());
                return BatchOutcome::Done { summary };
            }

            let number = self.session.next_step();
            let description = proposal.describe();
            tracing::info!(step = number, kind = %proposal.kind(), %description, "dispatching action");
            self.emit(AgentEvent::Step {
                number,
                description: description.clone(),
            });

            let outcome = match proposal.action {
                Err(invalid) => ActionOutcome::Failure(invalid.into()),
                Ok(action) => {
                    if let Action::EnterFullscreen { scan_name } = &action {
                        *self.focus = Some(scan_name.clone());
                    }
                    let outcome = self.execute(action, &description).await;
                    self.refresh().await;
                    outcome
                }
            };

            let rendered = outcome.to_string();
            if outcome.is_failure() {
                self.emit(AgentEvent::StepError {
                    number,
                    message: rendered,
                });
            } else {
                self.emit(AgentEvent::StepSucceeded {
                    number,
                    result: rendered,
                });
            }

            if self.session.record(proposal.raw, outcome) {
                tracing::warn!(
                    failures = self.session.budget().consecutive(),
                    "too many consecutive errors, abandoning batch"
                );
                return BatchOutcome::ErrorBudgetExhausted;
            }
        }
        BatchOutcome::Continue
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    /// Run the action on the blocking pool behind the progress indicator.
    async fn execute(&self, action: Action, description: &str) -> ActionOutcome {
        let page = Arc::clone(self.page);
        let snapshot = Arc::clone(&*self.snapshot);
        let signals = self.signals.clone();
        let timings = self.config.timings;

        let work = async move {
            tokio::task::spawn_blocking(move || {
                let cx = ExecContext {
                    snapshot: &snapshot,
                    signals: &signals,
                    timings: &timings,
                };
                executor::execute(&*page, &action, &cx)
            })
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "action task failed");
                ActionOutcome::Failure(ActionFailure::Execution { category: "Panic" })
            })
        };
        with_progress(
            self.config,
            format!("Executing: {}", description),
            work,
            |outcome| !outcome.is_failure(),
        )
        .await
    }

    /// Bring the page back to a single tab, normalize form values and re-capture.
    async fn refresh(&mut self) {
        let page = Arc::clone(self.page);
        let timings = self.config.timings;
        let fresh = tokio::task::spawn_blocking(move || settle(&*page, &timings)).await;
        *self.snapshot = Arc::new(fresh.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "refresh task failed");
            Snapshot::empty()
        }));
    }
}

fn settle<P: Page + ?Sized>(page: &P, timings: &Timings) -> Snapshot {
    match consolidate_tabs(page) {
        Ok(true) => thread::sleep(timings.new_tab_settle),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "could not consolidate tabs"),
    }
    if let Err(e) = page.normalize_form_values() {
        tracing::warn!(error = %e, "could not normalize form values");
    }
    thread::sleep(timings.action_settle);
    dom::capture(page).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "re-capture failed, no element handles until next cycle");
        Snapshot::empty()
    })
}

/// Leave exactly one tab open. When more are open, focus moves to the newest tab other than
/// the active one and every other tab is closed. Returns whether anything changed.
pub fn consolidate_tabs<P: Page + ?Sized>(page: &P) -> Result<bool, PageError> {
    let tabs = page.tabs()?;
    if tabs.len() <= 1 {
        return Ok(false);
    }
    let current = page.active_tab()?;
    let Some(keep) = tabs.iter().rev().find(|t| **t != current).cloned() else {
        return Ok(false);
    };

    page.activate_tab(&keep)?;
    for tab in tabs.iter().filter(|t| **t != keep) {
        page.close_tab(tab)?;
    }
    tracing::info!(kept = %keep, closed = tabs.len() - 1, "switched to the new tab");
    Ok(true)
}
