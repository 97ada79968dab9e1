//! Executes one validated [`Action`] against the page.
//!
//! Every target element is resolved through the handle table of the current snapshot and
//! must match exactly one element on the live page. Failures never escape as errors: they
//! become an [`ActionOutcome::Failure`] carrying a validation reason or an error category.

use std::thread;
use std::time::Duration;

use crate::config::Timings;
use crate::dom::Snapshot;
use crate::error::{ActionFailure, PageError, ValidationError};
use crate::hands::Page;
use crate::signals::Signals;
use crate::types::{
    Action, ActionData, ActionOutcome, BoundingBox, Handle, ScrollDirection, SliderMode,
    ZoomDirection,
};

type ExecResult = Result<Option<ActionData>, ActionFailure>;

/// What an action may consult besides the page.
pub struct ExecContext<'a> {
    pub snapshot: &'a Snapshot,
    pub signals: &'a Signals,
    pub timings: &'a Timings,
}

pub fn execute<P: Page + ?Sized>(page: &P, action: &Action, cx: &ExecContext<'_>) -> ActionOutcome {
    let result = match action {
        Action::Click { element_id } => click(page, cx, *element_id),
        Action::Fill { element_id, text } => fill(page, cx, *element_id, text),
        Action::PressEnter { element_id } => press_enter(page, cx, *element_id),
        Action::GetCoordinates { element_id } => get_coordinates(page, cx, *element_id),
        Action::Extract { element_id } => extract(page, cx, *element_id),
        Action::Scroll { direction, pixels } => scroll(page, *direction, *pixels),
        Action::Wait { seconds } => {
            thread::sleep(Duration::from_secs_f64(*seconds));
            Ok(None)
        }
        Action::Navigate { direction } => page
            .history(*direction)
            .map(|_| None)
            .map_err(ActionFailure::from),
        Action::Goto { url } => goto(page, cx, url),
        Action::MoveSlider {
            target_text,
            target_value,
            increment_mode,
            slides_per_sec,
        } => move_slider(
            page,
            cx,
            target_text,
            *target_value,
            *increment_mode,
            *slides_per_sec,
        ),
        Action::Zoom {
            scan_name,
            target_zoom,
            direction,
        } => zoom(page, scan_name, *target_zoom, direction),
        Action::SwitchTab { index } => switch_tab(page, *index),
        Action::EnterFullscreen { scan_name } => page
            .enter_fullscreen(scan_name)
            .map(|_| None)
            .map_err(ActionFailure::from),
        Action::Done {} => Ok(None),
    };

    if let Err(failure) = &result {
        tracing::warn!(action = action.kind(), %failure, "action failed");
    }
    result.into()
}

/// Look up `handle` in the current snapshot and check the selector still names exactly one
/// element. Zero or several matches mean the page moved on since the snapshot.
fn resolve<'s, P: Page + ?Sized>(
    page: &P,
    snapshot: &'s Snapshot,
    handle: Handle,
) -> Result<&'s str, ActionFailure> {
    let selector = snapshot.selector(handle)?;
    match page.match_count(selector)? {
        1 => Ok(selector),
        0 => Err(PageError::ElementNotFound(selector.to_string()).into()),
        count => Err(PageError::AmbiguousSelector {
            selector: selector.to_string(),
            count,
        }
        .into()),
    }
}

fn click<P: Page + ?Sized>(page: &P, cx: &ExecContext<'_>, handle: Handle) -> ExecResult {
    let selector = resolve(page, cx.snapshot, handle)?;
    page.click(selector)?;
    Ok(None)
}

fn fill<P: Page + ?Sized>(page: &P, cx: &ExecContext<'_>, handle: Handle, text: &str) -> ExecResult {
    let selector = resolve(page, cx.snapshot, handle)?;
    page.fill(selector, text)?;
    Ok(None)
}

fn press_enter<P: Page + ?Sized>(page: &P, cx: &ExecContext<'_>, handle: Handle) -> ExecResult {
    let selector = resolve(page, cx.snapshot, handle)?;
    page.press_enter(selector)?;
    Ok(None)
}

fn get_coordinates<P: Page + ?Sized>(page: &P, cx: &ExecContext<'_>, handle: Handle) -> ExecResult {
    let selector = resolve(page, cx.snapshot, handle)?;
    let rect = page.bounding_rect(selector)?;
    Ok(Some(ActionData::Coordinates(BoundingBox::from(rect))))
}

fn extract<P: Page + ?Sized>(page: &P, cx: &ExecContext<'_>, handle: Handle) -> ExecResult {
    let selector = resolve(page, cx.snapshot, handle)?;
    Ok(Some(ActionData::Text(page.inner_text(selector)?)))
}

fn scroll<P: Page + ?Sized>(page: &P, direction: ScrollDirection, pixels: i64) -> ExecResult {
    let dy = match direction {
        ScrollDirection::Down => pixels,
        ScrollDirection::Up => -pixels,
    };
    page.scroll_by(dy)?;
    Ok(None)
}

fn goto<P: Page + ?Sized>(page: &P, cx: &ExecContext<'_>, url: &str) -> ExecResult {
    page.goto(url)?;
    thread::sleep(cx.timings.after_goto);
    Ok(None)
}

fn switch_tab<P: Page + ?Sized>(page: &P, index: usize) -> ExecResult {
    let tabs = page.tabs()?;
    let tab = tabs
        .get(index)
        .ok_or(ValidationError::TabIndexOutOfRange {
            index,
            open: tabs.len(),
        })?;
    page.activate_tab(tab)?;
    Ok(None)
}

/// Signed number of slider steps needed.
///
/// Absolute mode moves from `current` to `target`; relative mode moves by `target` and
/// ignores `current`.
pub fn compute_slider_delta(mode: SliderMode, target: i64, current: i64) -> i64 {
    match mode {
        SliderMode::Absolute => target.saturating_sub(current),
        SliderMode::Relative => target,
    }
}

/// Pause between two slider steps for the requested slides-per-second.
pub fn step_interval(slides_per_sec: u32) -> Duration {
    if slides_per_sec > 1 {
        Duration::from_secs_f64(1.0 / f64::from(slides_per_sec - 1))
    } else {
        Duration::from_secs(1)
    }
}

fn move_slider<P: Page + ?Sized>(
    page: &P,
    cx: &ExecContext<'_>,
    label: &str,
    target: i64,
    mode: SliderMode,
    slides_per_sec: u32,
) -> ExecResult {
    let current = match mode {
        SliderMode::Absolute => page.slider_value(label)?,
        SliderMode::Relative => 0,
    };
    let delta = compute_slider_delta(mode, target, current);
    let forward = delta > 0;
    let requested = delta.unsigned_abs();
    let interval = step_interval(slides_per_sec);

    cx.signals.clear_slider_stop();
    let mut performed = 0;
    while performed < requested {
        if cx.signals.slider_should_stop() {
            tracing::info!(performed, requested, "slider movement stopped");
            break;
        }
        page.step_slider(label, forward)?;
        performed += 1;
        if performed < requested {
            thread::sleep(interval);
        }
    }

    Ok(Some(ActionData::SliderSteps {
        performed,
        requested,
    }))
}

fn zoom<P: Page + ?Sized>(page: &P, view: &str, scale: f64, direction: &str) -> ExecResult {
    let direction: ZoomDirection = direction.parse()?;
    let rect = page.view_canvas_rect(view)?;
    let focal = direction.focal_point(&rect);
    tracing::debug!(view, scale, ?focal, "zooming");
    page.zoom_view(view, scale, focal)?;
    Ok(None)
}
