use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ActionFailure, ValidationError};

/// Per-snapshot integer identifying one element to the decision-maker.
pub type Handle = u32;

/// Every action kind the executor understands, by wire name.
pub const ACTION_KINDS: &[&str] = &[
    "click",
    "fill",
    "scroll",
    "wait",
    "navigate",
    "goto",
    "press_enter",
    "move_slider",
    "get_coordinates",
    "extract",
    "zoom",
    "switch_tab",
    "enter_fullscreen",
    "done",
];

/// A single browser operation proposed by the decision-maker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum Action {
    Click {
        element_id: Handle,
    },
    Fill {
        element_id: Handle,
        text: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default = "default_scroll_pixels")]
        pixels: i64,
    },
    Wait {
        seconds: f64,
    },
    Navigate {
        direction: HistoryDirection,
    },
    Goto {
        url: String,
    },
    PressEnter {
        element_id: Handle,
    },
    MoveSlider {
        target_text: String,
        target_value: i64,
        increment_mode: SliderMode,
        #[serde(default = "default_slides_per_sec")]
        slides_per_sec: u32,
    },
    GetCoordinates {
        element_id: Handle,
    },
    Extract {
        element_id: Handle,
    },
    Zoom {
        scan_name: String,
        target_zoom: f64,
        /// Kept as text so an unsupported value is reported by the executor, not the parser.
        direction: String,
    },
    SwitchTab {
        index: usize,
    },
    EnterFullscreen {
        scan_name: String,
    },
    Done {},
}

fn default_scroll_pixels() -> i64 {
    500
}

fn default_slides_per_sec() -> u32 {
    1
}

/// Longest pause a `wait` action may request.
pub const MAX_WAIT_SECONDS: f64 = 60.0;

impl Action {
    /// Validate a raw action record against the schema of its kind.
    ///
    /// The free-text `intend` field is dropped and the kind is matched case-insensitively;
    /// any other unknown or missing field is a validation failure.
    pub fn from_value(raw: &Value) -> Result<Action, ValidationError> {
        let Value::Object(map) = raw else {
            return Err(ValidationError::Malformed {
                action: "?".to_string(),
                reason: "action record is not a JSON object".to_string(),
            });
        };

        let kind = map
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ValidationError::MissingAction)?
            .trim()
            .to_lowercase();
        if !ACTION_KINDS.contains(&kind.as_str()) {
            return Err(ValidationError::UnknownAction(kind));
        }

        let mut fields = map.clone();
        fields.remove("intend");
        fields.insert("action".to_string(), Value::String(kind.clone()));

        let action: Action =
            serde_json::from_value(Value::Object(fields)).map_err(|e| ValidationError::Malformed {
                action: kind.clone(),
                reason: e.to_string(),
            })?;
        action.check_ranges()?;
        Ok(action)
    }

    fn check_ranges(&self) -> Result<(), ValidationError> {
        let reason = match self {
            Action::Wait { seconds } if !(0.0..=MAX_WAIT_SECONDS).contains(seconds) => {
                "seconds must be between 0 and 60"
            }
            Action::Zoom { target_zoom, .. } if !target_zoom.is_finite() || *target_zoom <= 0.0 => {
                "target_zoom must be a positive number"
            }
            _ => return Ok(()),
        };
        Err(ValidationError::Malformed {
            action: self.kind().to_string(),
            reason: reason.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Fill { .. } => "fill",
            Action::Scroll { .. } => "scroll",
            Action::Wait { .. } => "wait",
            Action::Navigate { .. } => "navigate",
            Action::Goto { .. } => "goto",
            Action::PressEnter { .. } => "press_enter",
            Action::MoveSlider { .. } => "move_slider",
            Action::GetCoordinates { .. } => "get_coordinates",
            Action::Extract { .. } => "extract",
            Action::Zoom { .. } => "zoom",
            Action::SwitchTab { .. } => "switch_tab",
            Action::EnterFullscreen { .. } => "enter_fullscreen",
            Action::Done {} => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDirection {
    Back,
    Forward,
}

/// How `target_value` of a slider move is interpreted. Wire values are `0` and `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SliderMode {
    /// Go to `target_value`.
    Absolute,
    /// Move by `target_value` steps; the sign picks the direction.
    Relative,
}

impl TryFrom<i64> for SliderMode {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SliderMode::Absolute),
            1 => Ok(SliderMode::Relative),
            other => Err(ValidationError::InvalidSliderMode(other)),
        }
    }
}

impl From<SliderMode> for i64 {
    fn from(mode: SliderMode) -> i64 {
        match mode {
            SliderMode::Absolute => 0,
            SliderMode::Relative => 1,
        }
    }
}

/// The nine fixed focal points a zoom can be anchored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
    CenterTop,
    CenterBottom,
    MiddleLeft,
    MiddleRight,
}

impl ZoomDirection {
    /// Fractional (x, y) offset of the focal point inside the target's bounding box.
    pub fn fractions(self) -> (f64, f64) {
        const LEFT: f64 = 0.05;
        const RIGHT: f64 = 0.95;
        const TOP: f64 = 0.10;
        const BOTTOM: f64 = 0.90;
        const MID: f64 = 0.5;

        match self {
            ZoomDirection::TopLeft => (LEFT, TOP),
            ZoomDirection::TopRight => (RIGHT, TOP),
            ZoomDirection::BottomLeft => (LEFT, BOTTOM),
            ZoomDirection::BottomRight => (RIGHT, BOTTOM),
            ZoomDirection::Center => (MID, MID),
            ZoomDirection::CenterTop => (MID, TOP),
            ZoomDirection::CenterBottom => (MID, BOTTOM),
            ZoomDirection::MiddleLeft => (LEFT, MID),
            ZoomDirection::MiddleRight => (RIGHT, MID),
        }
    }

    /// Absolute client coordinates of the focal point inside `rect`.
    pub fn focal_point(self, rect: &Rect) -> (i64, i64) {
        let (fx, fy) = self.fractions();
        let left = rect.x as i64;
        let top = rect.y as i64;
        let width = rect.width as i64;
        let height = rect.height as i64;
        (
            left + (width as f64 * fx) as i64,
            top + (height as f64 * fy) as i64,
        )
    }
}

impl FromStr for ZoomDirection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Ok(match normalized.as_str() {
            "top left" => ZoomDirection::TopLeft,
            "top right" => ZoomDirection::TopRight,
            "bottom left" => ZoomDirection::BottomLeft,
            "bottom right" => ZoomDirection::BottomRight,
            "center" => ZoomDirection::Center,
            "center top" => ZoomDirection::CenterTop,
            "center bottom" => ZoomDirection::CenterBottom,
            "middle left" => ZoomDirection::MiddleLeft,
            "middle right" => ZoomDirection::MiddleRight,
            _ => return Err(ValidationError::UnsupportedDirection(s.to_string())),
        })
    }
}

/// Client rectangle as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Integer bounding box, top-left and bottom-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl From<Rect> for BoundingBox {
    fn from(rect: Rect) -> Self {
        let left = rect.x as i64;
        let top = rect.y as i64;
        BoundingBox {
            left,
            top,
            right: (left as f64 + rect.width) as i64,
            bottom: (top as f64 + rect.height) as i64,
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Coordinates: top-left ({}, {}), bottom-right ({}, {})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Data extracted by a successful action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionData {
    Text(String),
    Coordinates(BoundingBox),
    SliderSteps { performed: u64, requested: u64 },
}

/// Result of executing (or refusing to execute) one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Success(Option<ActionData>),
    Failure(ActionFailure),
}

impl ActionOutcome {
    pub fn ok() -> Self {
        ActionOutcome::Success(None)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failure(_))
    }
}

impl From<Result<Option<ActionData>, ActionFailure>> for ActionOutcome {
    fn from(result: Result<Option<ActionData>, ActionFailure>) -> Self {
        match result {
            Ok(data) => ActionOutcome::Success(data),
            Err(failure) => ActionOutcome::Failure(failure),
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Success(None) => f.write_str("Command executed successfully"),
            ActionOutcome::Success(Some(ActionData::Text(text))) => f.write_str(text),
            ActionOutcome::Success(Some(ActionData::Coordinates(bbox))) => bbox.fmt(f),
            ActionOutcome::Success(Some(ActionData::SliderSteps {
                performed,
                requested,
            })) => write!(
                f,
                "Slider action completed. {} of {} steps performed.",
                performed, requested
            ),
            ActionOutcome::Failure(failure) => write!(
                f,
                "Error occurred while trying to execute command, Error: {}",
                failure
            ),
        }
    }
}

/// One `{action, outcome}` pair of the command history. Entries are never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub command: Value,
    pub outcome: ActionOutcome,
}

impl Serialize for HistoryEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entry = serializer.serialize_struct("HistoryEntry", 2)?;
        entry.serialize_field("command", &self.command)?;
        entry.serialize_field("result", &self.outcome.to_string())?;
        entry.end()
    }
}

/// An action record as proposed by the decision-maker, with its validation result.
#[derive(Debug, Clone)]
pub struct ProposedAction {
    pub raw: Value,
    pub intend: Option<String>,
    pub action: Result<Action, ValidationError>,
}

impl ProposedAction {
    pub fn from_value(raw: Value) -> Self {
        let intend = raw
            .get("intend")
            .and_then(Value::as_str)
            .map(str::to_string);
        let action = Action::from_value(&raw);
        Self {
            raw,
            intend,
            action,
        }
    }

    /// Wire kind as written by the decision-maker, lowercased.
    pub fn kind(&self) -> String {
        self.raw
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }

    pub fn is_done(&self) -> bool {
        self.kind() == "done"
    }

    /// Short label for progress output and events.
    pub fn describe(&self) -> String {
        match &self.intend {
            Some(intend) if !intend.trim().is_empty() => intend.clone(),
            _ => self.kind(),
        }
    }
}

/// Events streamed to observers of the agent (web UI, sound cues).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    TaskStarted { task: String },
    Thinking,
    Step { number: usize, description: String },
    StepSucceeded { number: usize, result: String },
    StepError { number: usize, message: String },
    TaskComplete { summary: String },
    TaskCancelled,
    TaskAborted { reason: String },
    Ready,
}
