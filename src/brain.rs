use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::dom::Snapshot;
use crate::error::DecisionError;
use crate::types::{HistoryEntry, ProposedAction};

const SYSTEM_PROMPT: &str = "You control a web browser using JSON commands. Do not use natural language. \
If the task appears to be completed already based on the DOM or the last command result, \
return {\"action\": \"done\"} immediately. Only take actions you are confident are still necessary.";

const ACTION_CATALOGUE: &str = r#"Available actions (one JSON object each, `intend` is an optional short note):
1. click            {"action": "click", "element_id": 42, "intend": "Click the submit button"}
2. fill             {"action": "fill", "element_id": 17, "text": "user@example.com"}
3. scroll           {"action": "scroll", "direction": "down", "pixels": 500}
4. wait             {"action": "wait", "seconds": 3}
5. navigate         {"action": "navigate", "direction": "back"}   (back | forward)
6. goto             {"action": "goto", "url": "https://example.com/login"}
7. press_enter      {"action": "press_enter", "element_id": 19}
8. move_slider      {"action": "move_slider", "target_text": "Axial", "target_value": -10, "increment_mode": 1, "slides_per_sec": 1}
                    increment_mode 1 = relative (positive increases, negative decreases),
                    increment_mode 0 = go to the absolute, positive target_value.
9. get_coordinates  {"action": "get_coordinates", "element_id": 51}
10. extract         {"action": "extract", "element_id": 51}
11. zoom            {"action": "zoom", "scan_name": "Axial", "target_zoom": 1.5, "direction": "bottom left"}
                    direction is one of: "top left", "top right", "bottom left", "bottom right",
                    "center", "center top", "center bottom", "middle left", "middle right".
                    Resetting zoom is "center" with target_zoom 1.
12. switch_tab      {"action": "switch_tab", "index": 0}
13. enter_fullscreen {"action": "enter_fullscreen", "scan_name": "Coronal"}
14. done            {"action": "done", "intend": "Everything requested is finished"}"#;

const RULES: &str = r#"Rules:
- Refer to elements only through the `_element_id` values of the DOM snapshot; never invent selectors.
- `idx` is an element's 1-based position among its siblings; use it for ordinal references.
- When a scan name is not mentioned, use the current full screen scan.
- Check the command history: do not repeat an action that already succeeded; answer done instead.
- Only send several actions when filling a form and then submitting it.
- Return a raw JSON list of action objects, without markdown."#;

/// Everything the decision-maker sees for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub task: &'a str,
    /// Earlier task descriptions of this process, oldest first.
    pub prior_tasks: &'a [String],
    pub history: &'a [HistoryEntry],
    pub url: &'a str,
    pub snapshot: &'a Snapshot,
    pub focus: Option<&'a str>,
}

impl DecisionRequest<'_> {
    /// Render the single text payload sent to the decision-maker.
    pub fn render(&self) -> String {
        let prior = serde_json::to_string(self.prior_tasks).unwrap_or_else(|_| "[]".into());
        let history = serde_json::to_string(self.history).unwrap_or_else(|_| "[]".into());
        format!(
            "You are a browser automation assistant. Complete the user's request by returning \
             one or more browser actions in order.\n\n\
             User's request:\n{task}\n\n\
             Previous user requests:\n{prior}\n\n\
             {catalogue}\n\n\
             {rules}\n\n\
             Current page URL:\n{url}\n\n\
             Command history (latest last):\n{history}\n\n\
             DOM snapshot:\n{dom}\n\n\
             Current Full Screen Scan: {focus}\n\n\
             Now return the next action(s) to perform.",
            task = self.task,
            prior = prior,
            catalogue = ACTION_CATALOGUE,
            rules = RULES,
            url = self.url,
            history = history,
            dom = self.snapshot.serialized(),
            focus = self.focus.unwrap_or("none"),
        )
    }
}

/// The external decision-maker: prompt in, raw text out.
#[async_trait]
pub trait DecisionClient: Send + Sync {
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<String, DecisionError>;
}

/// Parse decision output into proposed actions.
///
/// Markdown fences are stripped; a single object is accepted as a one-element list.
/// Anything that is not a JSON list or object fails the whole cycle.
pub fn parse_decision(raw: &str) -> Result<Vec<ProposedAction>, DecisionError> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| DecisionError::Parse(format!("{} in {:?}", e, preview(cleaned))))?;
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(DecisionError::Parse(format!(
                "expected a list of actions, got {}",
                preview(&other.to_string())
            )));
        }
    };
    if let Some((position, item)) = items.iter().enumerate().find(|(_, item)| !item.is_object()) {
        return Err(DecisionError::Parse(format!(
            "item {} is not an action object: {}",
            position,
            preview(&item.to_string())
        )));
    }
    Ok(items.into_iter().map(ProposedAction::from_value).collect())
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// OpenAI-compatible chat completion client.
pub struct Brain {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl Brain {
    pub fn new(api_base: &str, api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl DecisionClient for Brain {
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<String, DecisionError> {
        let prompt = request.render();
        tracing::debug!(
            prompt_chars = prompt.len(),
            history = request.history.len(),
            "asking the model for the next actions"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt},
                ],
                "temperature": 0,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            tracing::error!(%status, %message, "decision API error");
            return Err(DecisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(DecisionError::EmptyResponse)?;
        tracing::debug!(%content, "model replied");
        Ok(content.to_string())
    }
}
