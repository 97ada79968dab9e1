#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use voice_browser_agent::brain::{DecisionClient, DecisionRequest};
use voice_browser_agent::config::{EngineConfig, Timings};
use voice_browser_agent::dom::{RawElement, RawNode, Snapshot};
use voice_browser_agent::error::{DecisionError, PageError};
use voice_browser_agent::hands::{Page, TabId};
use voice_browser_agent::signals::Signals;
use voice_browser_agent::types::{HistoryDirection, Rect};

pub fn quiet() -> EngineConfig {
    EngineConfig {
        timings: Timings::immediate(),
        show_progress: false,
    }
}

/// Handles: 0 body, 1 form#login, 2 input#email, 3 input:nth-of-type(2), 4 button.btn.primary,
/// 5 select#dataset, 6 option, 7 div.view
pub fn login_page() -> RawElement {
    RawElement::new("body")
        .child(
            RawElement::new("form")
                .attr("id", "login")
                .child(RawElement::new("input").attr("id", "email").attr("type", "text"))
                .child(
                    RawElement::new("input")
                        .attr("name", "password")
                        .attr("type", "password"),
                )
                .child(
                    RawElement::new("button")
                        .attr("class", "btn primary")
                        .text("Sign in"),
                ),
        )
        .child(
            RawElement::new("select")
                .attr("id", "dataset")
                .child(RawElement::new("option").attr("value", "1").text("Brain MRI")),
        )
        .child(RawElement::new("div").attr("class", "view").text("Axial"))
        .child(RawElement::new("script").text("track()"))
}

#[derive(Debug, Default)]
pub struct PageState {
    /// `None` makes every capture fail.
    pub dom: Option<RawElement>,
    pub url: String,
    pub tabs: Vec<TabId>,
    pub active: TabId,
    /// Overrides the number of elements a selector matches.
    pub match_counts: HashMap<String, usize>,
    pub fail_clicks: bool,
    pub fail_fullscreen: bool,
    /// Tab opened by the next click.
    pub click_opens_tab: Option<TabId>,
    pub typed: HashMap<String, String>,
    pub sliders: HashMap<String, i64>,
    pub views: HashMap<String, Rect>,
    /// Raise the slider stop after this many steps.
    pub stop_slider_after: Option<(u64, Signals)>,
    pub slider_steps: u64,
    pub calls: Vec<String>,
}

pub struct ScriptedPage {
    state: Mutex<PageState>,
}

impl ScriptedPage {
    pub fn new(dom: RawElement) -> Self {
        Self {
            state: Mutex::new(PageState {
                dom: Some(dom),
                url: "https://app.example/start".into(),
                tabs: vec!["tab-1".into()],
                active: "tab-1".into(),
                ..PageState::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls other than captures, normalization and URL reads.
    pub fn interactions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                !matches!(
                    c.as_str(),
                    "capture" | "normalize" | "url" | "tabs" | "active_tab" | "match_count"
                )
            })
            .collect()
    }

    fn log(&self, call: impl Into<String>) -> MutexGuard<'_, PageState> {
        let mut state = self.state();
        state.calls.push(call.into());
        state
    }

    fn handle_of(dom: &RawElement, selector: &str) -> Option<usize> {
        Snapshot::from_raw(dom.clone())
            .selectors()
            .iter()
            .position(|(_, s)| s == selector)
    }
}

fn nth_element<'a>(el: &'a mut RawElement, n: &mut usize) -> Option<&'a mut RawElement> {
    if *n == 0 {
        return Some(el);
    }
    *n -= 1;
    for child in el.children.iter_mut() {
        if let RawNode::Element(child) = child {
            if let Some(found) = nth_element(child, n) {
                return Some(found);
            }
        }
    }
    None
}

impl Page for ScriptedPage {
    fn current_url(&self) -> Result<String, PageError> {
        Ok(self.log("url").url.clone())
    }

    fn capture_markup(&self) -> Result<String, PageError> {
        let state = self.log("capture");
        state
            .dom
            .as_ref()
            .map(RawElement::to_markup)
            .ok_or_else(|| PageError::Script("document is gone".into()))
    }

    fn normalize_form_values(&self) -> Result<(), PageError> {
        let mut state = self.log("normalize");
        let typed = state.typed.clone();
        let Some(dom) = state.dom.as_mut() else {
            return Ok(());
        };
        for (selector, value) in typed {
            // Scripts are stripped before handles are assigned; test pages keep them last.
            if let Some(mut n) = Self::handle_of(dom, &selector) {
                if let Some(el) = nth_element(dom, &mut n) {
                    el.attrs.retain(|(k, _)| k != "data-value");
                    el.attrs.push(("data-value".into(), value));
                }
            }
        }
        Ok(())
    }

    fn match_count(&self, selector: &str) -> Result<usize, PageError> {
        let state = self.log("match_count");
        if let Some(count) = state.match_counts.get(selector) {
            return Ok(*count);
        }
        Ok(match &state.dom {
            Some(dom) => Snapshot::from_raw(dom.clone())
                .selectors()
                .iter()
                .filter(|(_, s)| *s == selector)
                .count(),
            None => 0,
        })
    }

    fn click(&self, selector: &str) -> Result<(), PageError> {
        let mut state = self.log(format!("click {}", selector));
        if state.fail_clicks {
            return Err(PageError::Timeout("click".into()));
        }
        if let Some(tab) = state.click_opens_tab.take() {
            state.tabs.push(tab);
        }
        Ok(())
    }

    fn fill(&self, selector: &str, text: &str) -> Result<(), PageError> {
        let mut state = self.log(format!("fill {} {}", selector, text));
        state.typed.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    fn press_enter(&self, selector: &str) -> Result<(), PageError> {
        self.log(format!("enter {}", selector));
        Ok(())
    }

    fn inner_text(&self, selector: &str) -> Result<String, PageError> {
        self.log(format!("text {}", selector));
        Ok("Sign in".into())
    }

    fn bounding_rect(&self, selector: &str) -> Result<Rect, PageError> {
        self.log(format!("rect {}", selector));
        Ok(Rect {
            x: 10.4,
            y: 20.0,
            width: 100.0,
            height: 30.6,
        })
    }

    fn scroll_by(&self, dy: i64) -> Result<(), PageError> {
        self.log(format!("scroll {}", dy));
        Ok(())
    }

    fn history(&self, direction: HistoryDirection) -> Result<(), PageError> {
        self.log(format!("history {:?}", direction));
        Ok(())
    }

    fn goto(&self, url: &str) -> Result<(), PageError> {
        let mut state = self.log(format!("goto {}", url));
        state.url = url.to_string();
        Ok(())
    }

    fn tabs(&self) -> Result<Vec<TabId>, PageError> {
        Ok(self.log("tabs").tabs.clone())
    }

    fn active_tab(&self) -> Result<TabId, PageError> {
        Ok(self.log("active_tab").active.clone())
    }

    fn activate_tab(&self, tab: &TabId) -> Result<(), PageError> {
        let mut state = self.log(format!("activate {}", tab));
        if !state.tabs.contains(tab) {
            return Err(PageError::TabNotFound(tab.clone()));
        }
        state.active = tab.clone();
        Ok(())
    }

    fn close_tab(&self, tab: &TabId) -> Result<(), PageError> {
        let mut state = self.log(format!("close {}", tab));
        state.tabs.retain(|t| t != tab);
        Ok(())
    }

    fn slider_value(&self, view: &str) -> Result<i64, PageError> {
        let state = self.log(format!("slider_value {}", view));
        state
            .sliders
            .get(view)
            .copied()
            .ok_or_else(|| PageError::ViewNotFound(view.to_string()))
    }

    fn step_slider(&self, view: &str, forward: bool) -> Result<(), PageError> {
        let mut state = self.log(format!("step {} {}", view, if forward { "+" } else { "-" }));
        let value = state
            .sliders
            .get_mut(view)
            .ok_or_else(|| PageError::ViewNotFound(view.to_string()))?;
        *value += if forward { 1 } else { -1 };
        state.slider_steps += 1;
        if let Some((after, signals)) = &state.stop_slider_after {
            if state.slider_steps >= *after {
                signals.request_slider_stop();
            }
        }
        Ok(())
    }

    fn view_canvas_rect(&self, view: &str) -> Result<Rect, PageError> {
        let state = self.log(format!("canvas {}", view));
        state
            .views
            .get(view)
            .copied()
            .ok_or_else(|| PageError::ViewNotFound(view.to_string()))
    }

    fn zoom_view(&self, view: &str, scale: f64, focal: (i64, i64)) -> Result<(), PageError> {
        self.log(format!("zoom {} {} {:?}", view, scale, focal));
        Ok(())
    }

    fn enter_fullscreen(&self, view: &str) -> Result<(), PageError> {
        let state = self.log(format!("fullscreen {}", view));
        if state.fail_fullscreen {
            return Err(PageError::ViewNotFound(view.to_string()));
        }
        Ok(())
    }
}

/// What the decision-maker was shown on one call.
#[derive(Debug, Clone)]
pub struct Seen {
    pub task: String,
    pub prior_tasks: Vec<String>,
    pub history: Vec<String>,
    pub snapshot: String,
    pub snapshot_len: usize,
    pub focus: Option<String>,
    pub url: String,
}

/// Replays canned responses in order; answers `done` once they run out.
#[derive(Clone, Default)]
pub struct ScriptedBrain {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
    seen: Arc<Mutex<Vec<Seen>>>,
    cancel_on_call: Option<(usize, Signals)>,
}

impl ScriptedBrain {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.iter().map(|r| Ok(r.to_string())).collect(),
            )),
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        let brain = Self::default();
        brain
            .responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        brain
    }

    /// Raise the cancel flag while answering the `n`th (1-based) request.
    pub fn cancel_on_call(mut self, n: usize, signals: Signals) -> Self {
        self.cancel_on_call = Some((n, signals));
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionClient for ScriptedBrain {
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<String, DecisionError> {
        let calls = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(Seen {
                task: request.task.to_string(),
                prior_tasks: request.prior_tasks.to_vec(),
                history: request
                    .history
                    .iter()
                    .map(|e| e.outcome.to_string())
                    .collect(),
                snapshot: request.snapshot.serialized(),
                snapshot_len: request.snapshot.len(),
                focus: request.focus.map(str::to_string),
                url: request.url.to_string(),
            });
            seen.len()
        };
        if let Some((n, signals)) = &self.cancel_on_call {
            if *n == calls {
                signals.request_cancel();
            }
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(message)) => Err(DecisionError::Api {
                status: 503,
                message,
            }),
            None => Ok(r#"[{"action": "done"}]"#.to_string()),
        }
    }
}
