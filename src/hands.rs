use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::dom::{CAPTURE_JS, NORMALIZE_FORM_VALUES_JS};
use crate::error::PageError;
use crate::types::{HistoryDirection, Rect};

pub type TabId = String;

/// Everything the engine needs from the browser.
///
/// The page is a singly-owned resource: implementations are not expected to serialize
/// concurrent callers, the dispatch loop guarantees only one call is in flight. Element
/// operations take a CSS selector that the executor has already checked to be unique.
/// Viewer operations address one labelled view of the imaging viewer (e.g. "Axial").
pub trait Page: Send + Sync {
    fn current_url(&self) -> Result<String, PageError>;

    /// Raw DOM in the flat capture format understood by [`crate::dom::Snapshot`].
    fn capture_markup(&self) -> Result<String, PageError>;

    /// Copy every form control's displayed value into its `data-value` attribute.
    fn normalize_form_values(&self) -> Result<(), PageError>;

    fn match_count(&self, selector: &str) -> Result<usize, PageError>;
    fn click(&self, selector: &str) -> Result<(), PageError>;
    fn fill(&self, selector: &str, text: &str) -> Result<(), PageError>;
    fn press_enter(&self, selector: &str) -> Result<(), PageError>;
    fn inner_text(&self, selector: &str) -> Result<String, PageError>;
    fn bounding_rect(&self, selector: &str) -> Result<Rect, PageError>;

    fn scroll_by(&self, dy: i64) -> Result<(), PageError>;
    fn history(&self, direction: HistoryDirection) -> Result<(), PageError>;
    fn goto(&self, url: &str) -> Result<(), PageError>;

    /// Open tabs in a stable order.
    fn tabs(&self) -> Result<Vec<TabId>, PageError>;
    fn active_tab(&self) -> Result<TabId, PageError>;
    fn activate_tab(&self, tab: &TabId) -> Result<(), PageError>;
    fn close_tab(&self, tab: &TabId) -> Result<(), PageError>;

    fn slider_value(&self, view: &str) -> Result<i64, PageError>;
    /// One discrete slider step; `forward` increments.
    fn step_slider(&self, view: &str, forward: bool) -> Result<(), PageError>;
    fn view_canvas_rect(&self, view: &str) -> Result<Rect, PageError>;
    /// Start an eased scale transition of the view's canvas anchored at `focal`, starting
    /// from the scale previously stored on the canvas.
    fn zoom_view(&self, view: &str, scale: f64, focal: (i64, i64)) -> Result<(), PageError>;
    fn enter_fullscreen(&self, view: &str) -> Result<(), PageError>;
}

/// How to obtain a browser.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// DevTools websocket of an already running Chrome, if one was discovered.
    pub attach_ws: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub profile_dir: PathBuf,
    pub headless: bool,
}

/// Ask a Chrome started with `--remote-debugging-port` for its browser websocket.
pub async fn discover_debugger(port: u16) -> Option<String> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let body: Value = client.get(&url).send().await.ok()?.json().await.ok()?;
    body["webSocketDebuggerUrl"].as_str().map(str::to_string)
}

// Locates a labelled view container of the imaging viewer.
const FIND_VIEW_JS: &str = r#"
const findView = (label) => {
  const wanted = label.trim().toLowerCase();
  for (const span of document.querySelectorAll("span.view-label")) {
    if (span.textContent.trim().toLowerCase().includes(wanted)) {
      return span.closest("div.orthographic-control-view");
    }
  }
  return null;
};
"#;

const SLIDER_INPUT: &str = "input.el-input__inner[type='text']";
const SLIDER_NEXT: &str = "i.mdi.mdi-chevron-right";
const SLIDER_PREV: &str = "i.mdi.mdi-chevron-left";
const FULLSCREEN_BUTTON: &str = "i.mdi.mdi-fullscreen";

const SMOOTH_ZOOM_JS: &str = r#"
const smoothZoom = (canvas, target, clientX, clientY, duration) => {
  const rect = canvas.getBoundingClientRect();
  const start = parseFloat(canvas.dataset.zoom) || 1;
  canvas.style.transformOrigin = `${clientX - rect.left}px ${clientY - rect.top}px`;
  let began = null;
  const frame = (now) => {
    if (began === null) began = now;
    const t = Math.min((now - began) / duration, 1);
    const eased = t < 0.5 ? 2 * t * t : -1 + (4 - 2 * t) * t;
    const scale = start + (target - start) * eased;
    canvas.style.transform = `scale(${scale})`;
    if (t < 1) {
      requestAnimationFrame(frame);
    } else {
      canvas.dataset.zoom = scale;
    }
  };
  requestAnimationFrame(frame);
};
"#;

const ZOOM_DURATION_MS: u32 = 200;

/// Chrome driven over the DevTools protocol. Tracks which tab is the active one.
pub struct ChromePage {
    browser: Browser,
    current: Mutex<Arc<Tab>>,
}

impl ChromePage {
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        if let Some(ws) = &config.attach_ws {
            tracing::info!(%ws, "attaching to running Chrome");
            match Browser::connect(ws.clone()) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser.get_tabs().lock().unwrap_or_else(|e| e.into_inner());
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(tab) => tab,
                        None => browser.new_tab()?,
                    };
                    return Ok(Self {
                        browser,
                        current: Mutex::new(tab),
                    });
                }
                Err(e) => tracing::warn!("could not attach ({:#}), launching a new Chrome", e),
            }
        }

        std::fs::create_dir_all(&config.profile_dir)?;
        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone().or_else(find_chrome),
            user_data_dir: Some(config.profile_dir.clone()),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
                OsStr::new("--log-level=3"),
            ],
            idle_browser_timeout: Duration::from_secs(60 * 60 * 24),
            ..Default::default()
        };

        tracing::info!(profile = %config.profile_dir.display(), "launching Chrome");
        let browser =
            Browser::new(options).map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        Ok(Self {
            browser,
            current: Mutex::new(tab),
        })
    }

    fn tab(&self) -> Arc<Tab> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn find_tab(&self, id: &TabId) -> Result<Arc<Tab>, PageError> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        tabs.iter()
            .find(|t| t.get_target_id() == id)
            .cloned()
            .ok_or_else(|| PageError::TabNotFound(id.clone()))
    }

    fn eval(&self, js: &str) -> Result<Option<Value>, PageError> {
        let result = self
            .tab()
            .evaluate(js, false)
            .map_err(|e| PageError::from_driver(&e))?;
        Ok(result.value)
    }

    /// Evaluate a script that returns `JSON.stringify(...)` and decode it.
    fn eval_json<T: DeserializeOwned>(&self, js: &str) -> Result<T, PageError> {
        match self.eval(js)? {
            Some(Value::String(text)) => serde_json::from_str(&text)
                .map_err(|e| PageError::UnexpectedResult(e.to_string())),
            other => Err(PageError::UnexpectedResult(format!("{:?}", other))),
        }
    }

    /// Run `body` with `view` bound to the labelled view container; a missing view is
    /// reported as [`PageError::ViewNotFound`].
    fn with_view<T: DeserializeOwned>(&self, label: &str, body: &str) -> Result<T, PageError> {
        let js = format!(
            "(() => {{ {find} {zoom} const view = findView({label}); \
             if (!view) return JSON.stringify({{ missing: true }}); \
             const result = (() => {{ {body} }})(); \
             return JSON.stringify({{ missing: false, result: result === undefined ? null : result }}); }})()",
            find = FIND_VIEW_JS,
            zoom = SMOOTH_ZOOM_JS,
            label = js_string(label),
            body = body,
        );
        let reply: ViewReply<T> = self.eval_json(&js)?;
        match reply {
            ViewReply {
                missing: false,
                result: Some(value),
            } => Ok(value),
            ViewReply { missing: true, .. } => Err(PageError::ViewNotFound(label.to_string())),
            ViewReply { result: None, .. } => {
                Err(PageError::UnexpectedResult(format!("empty result for view `{}`", label)))
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct ViewReply<T> {
    missing: bool,
    result: Option<T>,
}

/// Quote a string as a JavaScript literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

impl Page for ChromePage {
    fn current_url(&self) -> Result<String, PageError> {
        Ok(self.tab().get_url())
    }

    fn capture_markup(&self) -> Result<String, PageError> {
        match self.eval(CAPTURE_JS)? {
            Some(Value::String(markup)) => Ok(markup),
            other => Err(PageError::UnexpectedResult(format!("{:?}", other))),
        }
    }

    fn normalize_form_values(&self) -> Result<(), PageError> {
        self.eval(NORMALIZE_FORM_VALUES_JS).map(|_| ())
    }

    fn match_count(&self, selector: &str) -> Result<usize, PageError> {
        let js = format!("document.querySelectorAll({}).length", js_string(selector));
        match self.eval(&js)? {
            Some(Value::Number(n)) => Ok(n.as_u64().unwrap_or(0) as usize),
            other => Err(PageError::UnexpectedResult(format!("{:?}", other))),
        }
    }

    fn click(&self, selector: &str) -> Result<(), PageError> {
        let tab = self.tab();
        let element = tab
            .find_element(selector)
            .map_err(|_| PageError::ElementNotFound(selector.to_string()))?;
        element.click().map_err(|e| PageError::from_driver(&e))?;
        Ok(())
    }

    fn fill(&self, selector: &str, text: &str) -> Result<(), PageError> {
        self.click(selector)?;
        let js = format!(
            "(() => {{ const el = document.querySelector({}); el.value = ''; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); }})()",
            js_string(selector)
        );
        self.eval(&js)?;
        self.tab()
            .type_str(text)
            .map_err(|e| PageError::from_driver(&e))?;
        Ok(())
    }

    fn press_enter(&self, selector: &str) -> Result<(), PageError> {
        self.eval(&format!(
            "document.querySelector({}).focus()",
            js_string(selector)
        ))?;
        self.tab()
            .press_key("Enter")
            .map_err(|e| PageError::from_driver(&e))?;
        Ok(())
    }

    fn inner_text(&self, selector: &str) -> Result<String, PageError> {
        let js = format!(
            "document.querySelector({}).innerText || ''",
            js_string(selector)
        );
        match self.eval(&js)? {
            Some(Value::String(text)) => Ok(text),
            _ => Ok(String::new()),
        }
    }

    fn bounding_rect(&self, selector: &str) -> Result<Rect, PageError> {
        let js = format!(
            "(() => {{ const r = document.querySelector({}).getBoundingClientRect(); \
             return JSON.stringify({{ x: r.left, y: r.top, width: r.width, height: r.height }}); }})()",
            js_string(selector)
        );
        self.eval_json(&js)
    }

    fn scroll_by(&self, dy: i64) -> Result<(), PageError> {
        self.eval(&format!("window.scrollBy(0, {})", dy)).map(|_| ())
    }

    fn history(&self, direction: HistoryDirection) -> Result<(), PageError> {
        let js = match direction {
            HistoryDirection::Back => "history.back()",
            HistoryDirection::Forward => "history.forward()",
        };
        self.eval(js).map(|_| ())
    }

    fn goto(&self, url: &str) -> Result<(), PageError> {
        let tab = self.tab();
        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| PageError::Navigation(format!("{:#}", e)))?;
        Ok(())
    }

    fn tabs(&self) -> Result<Vec<TabId>, PageError> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(tabs.iter().map(|t| t.get_target_id().clone()).collect())
    }

    fn active_tab(&self) -> Result<TabId, PageError> {
        Ok(self.tab().get_target_id().clone())
    }

    fn activate_tab(&self, tab: &TabId) -> Result<(), PageError> {
        let target = self.find_tab(tab)?;
        target.activate().map_err(|e| PageError::from_driver(&e))?;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = target;
        Ok(())
    }

    fn close_tab(&self, tab: &TabId) -> Result<(), PageError> {
        let target = self.find_tab(tab)?;
        target.close(true).map_err(|e| PageError::from_driver(&e))?;
        Ok(())
    }

    fn slider_value(&self, view: &str) -> Result<i64, PageError> {
        let body = format!(
            "const input = view.querySelector({}); \
             if (!input) throw new Error('slider input missing'); \
             const value = parseInt(input.value, 10); \
             if (Number.isNaN(value)) throw new Error('slider value is not a number'); \
             return value;",
            js_string(SLIDER_INPUT)
        );
        self.with_view(view, &body)
    }

    fn step_slider(&self, view: &str, forward: bool) -> Result<(), PageError> {
        let button = if forward { SLIDER_NEXT } else { SLIDER_PREV };
        let body = format!(
            "const button = view.querySelector({}); \
             if (!button) throw new Error('slider button missing'); \
             button.click(); return true;",
            js_string(button)
        );
        self.with_view::<bool>(view, &body).map(|_| ())
    }

    fn view_canvas_rect(&self, view: &str) -> Result<Rect, PageError> {
        let body = "const canvas = view.querySelector('canvas'); \
                    if (!canvas) throw new Error('canvas missing'); \
                    const r = canvas.getBoundingClientRect(); \
                    return { x: r.left, y: r.top, width: r.width, height: r.height };";
        self.with_view(view, body)
    }

    fn zoom_view(&self, view: &str, scale: f64, focal: (i64, i64)) -> Result<(), PageError> {
        let body = format!(
            "const canvas = view.querySelector('canvas'); \
             if (!canvas) throw new Error('canvas missing'); \
             smoothZoom(canvas, {}, {}, {}, {}); return true;",
            scale, focal.0, focal.1, ZOOM_DURATION_MS
        );
        self.with_view::<bool>(view, &body).map(|_| ())
    }

    fn enter_fullscreen(&self, view: &str) -> Result<(), PageError> {
        let body = format!(
            "const button = view.querySelector({}); \
             if (!button) throw new Error('fullscreen button missing'); \
             button.click(); return true;",
            js_string(FULLSCREEN_BUTTON)
        );
        self.with_view::<bool>(view, &body).map(|_| ())
    }
}

// Helper to find a Chrome executable; None lets headless_chrome search on its own.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(
            local
                .join("Google")
                .join("Chrome")
                .join("Application")
                .join("chrome.exe"),
        );
    }
    candidates.into_iter().find(|p| p.exists())
}
