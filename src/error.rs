use thiserror::Error;

use crate::types::Handle;

/// Failure raised by the browser while talking to the page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PageError {
    #[error("no element matches `{0}`")]
    ElementNotFound(String),

    #[error("selector `{selector}` matched {count} elements")]
    AmbiguousSelector { selector: String, count: usize },

    #[error("no view labelled `{0}`")]
    ViewNotFound(String),

    #[error("tab `{0}` is not open")]
    TabNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("unexpected script result: {0}")]
    UnexpectedResult(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl PageError {
    /// Stable category name reported to the decision-maker instead of the raw message.
    pub fn category(&self) -> &'static str {
        match self {
            PageError::ElementNotFound(_) => "ElementNotFound",
            PageError::AmbiguousSelector { .. } => "AmbiguousSelector",
            PageError::ViewNotFound(_) => "ViewNotFound",
            PageError::TabNotFound(_) => "TabNotFound",
            PageError::Timeout(_) => "Timeout",
            PageError::Navigation(_) => "Navigation",
            PageError::Script(_) => "Script",
            PageError::UnexpectedResult(_) => "UnexpectedResult",
            PageError::Browser(_) => "Browser",
        }
    }

    /// Classify an error coming out of the Chrome driver.
    pub fn from_driver(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let lower = message.to_lowercase();
        if lower.contains("no element found") || lower.contains("noelementfound") {
            PageError::ElementNotFound(message)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            PageError::Timeout(message)
        } else if lower.contains("navigat") {
            PageError::Navigation(message)
        } else if lower.contains("exception") || lower.contains("evaluat") {
            PageError::Script(message)
        } else {
            PageError::Browser(message)
        }
    }
}

/// A proposed action that cannot be executed as written.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("action record has no `action` field")]
    MissingAction,

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("malformed `{action}` action: {reason}")]
    Malformed { action: String, reason: String },

    #[error(
        "unsupported direction `{0}`, expected one of: top left, top right, bottom left, \
         bottom right, center, center top, center bottom, middle left, middle right"
    )]
    UnsupportedDirection(String),

    #[error("increment_mode must be 0 (absolute) or 1 (relative), got {0}")]
    InvalidSliderMode(i64),

    #[error("element {0} is not in the current snapshot")]
    UnknownHandle(Handle),

    #[error("tab index {index} out of range ({open} open)")]
    TabIndexOutOfRange { index: usize, open: usize },

    #[error("decision contained no actions")]
    EmptyBatch,
}

/// Why a single action failed. Recorded in the command history and counted by the error budget.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionFailure {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{category}")]
    Execution { category: &'static str },
}

impl From<PageError> for ActionFailure {
    fn from(err: PageError) -> Self {
        ActionFailure::Execution {
            category: err.category(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("could not capture the page: {0}")]
    Capture(#[from] PageError),

    #[error("captured markup is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("captured markup is not a valid element tree: {0}")]
    Malformed(String),
}

impl SnapshotError {
    /// Category recorded in the history when a capture fails.
    pub fn category(&self) -> &'static str {
        match self {
            SnapshotError::Capture(e) => e.category(),
            SnapshotError::Parse(_) | SnapshotError::Malformed(_) => "SnapshotMalformed",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("decision API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("decision response has no content")]
    EmptyResponse,

    #[error("decision output is not a JSON action list: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_failure_keeps_only_the_category() {
        let failure: ActionFailure = PageError::Script("TypeError: x is undefined".into()).into();
        assert_eq!(failure, ActionFailure::Execution { category: "Script" });
        assert_eq!(failure.to_string(), "Script");
    }

    #[test]
    fn driver_errors_are_classified() {
        let err = anyhow::anyhow!("Timed out waiting for element");
        assert_eq!(PageError::from_driver(&err).category(), "Timeout");

        let err = anyhow::anyhow!("Unable to make method calls because underlying connection is closed");
        assert_eq!(PageError::from_driver(&err).category(), "Browser");
    }
}
