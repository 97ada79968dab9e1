//! Voice-driven browser agent.
//!
//! Each task is a loop: snapshot the page, ask the decision-maker for actions, dispatch them,
//! repeat until it answers `done`, the operator cancels, or too many actions fail in a row.

pub mod brain;
pub mod config;
pub mod dispatch;
pub mod dom;
pub mod error;
pub mod executor;
pub mod hands;
pub mod journal;
pub mod selector;
pub mod session;
pub mod signals;
pub mod sounds;
pub mod spinner;
pub mod types;
pub mod voice;

pub use brain::{Brain, DecisionClient, DecisionRequest, parse_decision};
pub use config::{AgentArgs, ERROR_THRESHOLD, EngineConfig, Timings};
pub use dom::Snapshot;
pub use hands::{ChromePage, Page};
pub use session::{AbortReason, SessionState, TaskOutcome, TaskRunner};
pub use signals::{InputSignal, Signals};
pub use types::{Action, ActionOutcome, AgentEvent, HistoryEntry, ProposedAction};
