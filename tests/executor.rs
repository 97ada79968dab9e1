mod common;

use common::{ScriptedPage, login_page};
use serde_json::json;
use voice_browser_agent::config::Timings;
use voice_browser_agent::dispatch::consolidate_tabs;
use voice_browser_agent::dom::{self, Snapshot};
use voice_browser_agent::error::{ActionFailure, ValidationError};
use voice_browser_agent::executor::{ExecContext, execute};
use voice_browser_agent::signals::Signals;
use voice_browser_agent::types::{Action, ActionData, ActionOutcome, BoundingBox, Rect};

struct Fixture {
    page: ScriptedPage,
    snapshot: Snapshot,
    signals: Signals,
    timings: Timings,
}

impl Fixture {
    fn new() -> Self {
        let page = ScriptedPage::new(login_page());
        let snapshot = dom::capture(&page).unwrap();
        page.state().calls.clear();
        Self {
            page,
            snapshot,
            signals: Signals::new(),
            timings: Timings::immediate(),
        }
    }

    fn run(&self, raw: serde_json::Value) -> ActionOutcome {
        let action = Action::from_value(&raw).unwrap();
        let cx = ExecContext {
            snapshot: &self.snapshot,
            signals: &self.signals,
            timings: &self.timings,
        };
        execute(&self.page, &action, &cx)
    }
}

#[test]
fn click_resolves_the_handle_through_the_snapshot() {
    let fx = Fixture::new();
    let outcome = fx.run(json!({"action": "click", "element_id": 4, "intend": "Sign in"}));

    assert_eq!(outcome, ActionOutcome::ok());
    assert_eq!(
        fx.page.interactions(),
        ["click body > form#login > button.btn.primary"]
    );
}

#[test]
fn unlabelled_elements_use_nth_of_type() {
    let fx = Fixture::new();
    fx.run(json!({"action": "fill", "element_id": 3, "text": "hunter2"}));
    assert_eq!(
        fx.page.interactions(),
        ["fill body > form#login > input:nth-of-type(2) hunter2"]
    );
}

#[test]
fn unknown_handle_fails_without_touching_the_page() {
    let fx = Fixture::new();
    let outcome = fx.run(json!({"action": "click", "element_id": 42}));

    assert_eq!(
        outcome,
        ActionOutcome::Failure(ActionFailure::Validation(ValidationError::UnknownHandle(42)))
    );
    assert!(fx.page.interactions().is_empty());
}

#[test]
fn ambiguous_and_vanished_elements_are_failures() {
    let fx = Fixture::new();
    fx.page
        .state()
        .match_counts
        .insert("body > form#login > input#email".into(), 2);
    fx.page
        .state()
        .match_counts
        .insert("body > div.view".into(), 0);

    assert_eq!(
        fx.run(json!({"action": "press_enter", "element_id": 2})),
        ActionOutcome::Failure(ActionFailure::Execution {
            category: "AmbiguousSelector"
        })
    );
    assert_eq!(
        fx.run(json!({"action": "extract", "element_id": 7})),
        ActionOutcome::Failure(ActionFailure::Execution {
            category: "ElementNotFound"
        })
    );
    assert!(fx.page.interactions().is_empty());
}

#[test]
fn page_errors_are_reported_by_category_only() {
    let fx = Fixture::new();
    fx.page.state().fail_clicks = true;
    let outcome = fx.run(json!({"action": "click", "element_id": 4}));
    assert_eq!(
        outcome.to_string(),
        "Error occurred while trying to execute command, Error: Timeout"
    );
}

#[test]
fn extract_and_coordinates_return_data() {
    let fx = Fixture::new();
    assert_eq!(
        fx.run(json!({"action": "extract", "element_id": 4})),
        ActionOutcome::Success(Some(ActionData::Text("Sign in".into())))
    );
    assert_eq!(
        fx.run(json!({"action": "get_coordinates", "element_id": 4})),
        ActionOutcome::Success(Some(ActionData::Coordinates(BoundingBox {
            left: 10,
            top: 20,
            right: 110,
            bottom: 50,
        })))
    );
}

#[test]
fn scroll_defaults_to_500_pixels_down() {
    let fx = Fixture::new();
    fx.run(json!({"action": "scroll"}));
    fx.run(json!({"action": "scroll", "direction": "up", "pixels": 120}));
    assert_eq!(fx.page.interactions(), ["scroll 500", "scroll -120"]);
}

#[test]
fn goto_and_history_navigation() {
    let fx = Fixture::new();
    fx.run(json!({"action": "goto", "url": "https://app.example/projects"}));
    fx.run(json!({"action": "navigate", "direction": "back"}));
    assert_eq!(
        fx.page.interactions(),
        ["goto https://app.example/projects", "history Back"]
    );
}

#[test]
fn zoom_with_unknown_direction_makes_no_page_calls() {
    let fx = Fixture::new();
    let outcome = fx.run(json!({
        "action": "zoom", "scan_name": "Axial", "target_zoom": 2.0, "direction": "upper left"
    }));

    assert!(matches!(
        outcome,
        ActionOutcome::Failure(ActionFailure::Validation(
            ValidationError::UnsupportedDirection(_)
        ))
    ));
    assert!(fx.page.calls().is_empty());
}

#[test]
fn zoom_anchors_at_the_directional_focal_point() {
    let fx = Fixture::new();
    fx.page.state().views.insert(
        "Axial".into(),
        Rect {
            x: 100.0,
            y: 50.0,
            width: 400.0,
            height: 200.0,
        },
    );

    let outcome = fx.run(json!({
        "action": "zoom", "scan_name": "Axial", "target_zoom": 1.5, "direction": "Top  Left"
    }));

    assert_eq!(outcome, ActionOutcome::ok());
    assert_eq!(
        fx.page.interactions(),
        ["canvas Axial", "zoom Axial 1.5 (120, 70)"]
    );
}

#[test]
fn absolute_slider_moves_from_the_current_value() {
    let fx = Fixture::new();
    fx.page.state().sliders.insert("Axial".into(), 30);

    let outcome = fx.run(json!({
        "action": "move_slider", "target_text": "Axial", "target_value": 27,
        "increment_mode": 0, "slides_per_sec": 101
    }));

    assert_eq!(
        outcome.to_string(),
        "Slider action completed. 3 of 3 steps performed."
    );
    assert_eq!(fx.page.state().sliders["Axial"], 27);
}

#[test]
fn relative_slider_ignores_the_current_value() {
    let fx = Fixture::new();
    fx.page.state().sliders.insert("Coronal".into(), 80);

    fx.run(json!({
        "action": "move_slider", "target_text": "Coronal", "target_value": 2,
        "increment_mode": 1, "slides_per_sec": 101
    }));

    assert_eq!(fx.page.state().sliders["Coronal"], 82);
    assert!(
        !fx.page
            .calls()
            .iter()
            .any(|c| c.starts_with("slider_value"))
    );
}

#[test]
fn slider_stop_reports_partial_progress() {
    let fx = Fixture::new();
    {
        let mut state = fx.page.state();
        state.sliders.insert("Axial".into(), 0);
        state.stop_slider_after = Some((2, fx.signals.clone()));
    }

    let outcome = fx.run(json!({
        "action": "move_slider", "target_text": "Axial", "target_value": 5,
        "increment_mode": 1, "slides_per_sec": 101
    }));

    assert_eq!(
        outcome,
        ActionOutcome::Success(Some(ActionData::SliderSteps {
            performed: 2,
            requested: 5
        }))
    );
}

#[test]
fn a_stale_slider_stop_does_not_block_the_next_move() {
    let fx = Fixture::new();
    fx.page.state().sliders.insert("Axial".into(), 0);
    fx.signals.request_slider_stop();

    fx.run(json!({
        "action": "move_slider", "target_text": "Axial", "target_value": -2,
        "increment_mode": 1, "slides_per_sec": 101
    }));
    assert_eq!(fx.page.state().sliders["Axial"], -2);
}

#[test]
fn switch_tab_rejects_out_of_range_indices() {
    let fx = Fixture::new();
    assert_eq!(
        fx.run(json!({"action": "switch_tab", "index": 3})),
        ActionOutcome::Failure(ActionFailure::Validation(
            ValidationError::TabIndexOutOfRange { index: 3, open: 1 }
        ))
    );
    assert_eq!(fx.run(json!({"action": "switch_tab", "index": 0})), ActionOutcome::ok());
}

#[test]
fn fullscreen_targets_the_named_view() {
    let fx = Fixture::new();
    fx.run(json!({"action": "enter_fullscreen", "scan_name": "Sagittal"}));
    assert_eq!(fx.page.interactions(), ["fullscreen Sagittal"]);
}

#[test]
fn consolidation_keeps_only_the_new_tab() {
    let fx = Fixture::new();
    fx.page.state().tabs.push("tab-2".into());

    assert!(consolidate_tabs(&fx.page).unwrap());
    let state = fx.page.state();
    assert_eq!(state.tabs, ["tab-2"]);
    assert_eq!(state.active, "tab-2");
}

#[test]
fn consolidation_is_a_no_op_with_one_tab() {
    let fx = Fixture::new();
    assert!(!consolidate_tabs(&fx.page).unwrap());
}
