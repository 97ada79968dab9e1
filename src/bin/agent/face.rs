use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use voice_browser_agent::AgentEvent;

/// SSE event name and JSON payload for an agent event.
fn sse_parts(event: &AgentEvent) -> (&'static str, Value) {
    match event {
        AgentEvent::TaskStarted { task } => ("task_started", json!({ "task": task })),
        AgentEvent::Thinking => ("thinking", json!({})),
        AgentEvent::Step {
            number,
            description,
        } => (
            "step",
            json!({ "number": number, "description": description }),
        ),
        AgentEvent::StepSucceeded { number, result } => (
            "step_succeeded",
            json!({ "number": number, "result": result }),
        ),
        AgentEvent::StepError { number, message } => (
            "step_error",
            json!({ "number": number, "message": message }),
        ),
        AgentEvent::TaskComplete { summary } => ("task_complete", json!({ "summary": summary })),
        AgentEvent::TaskCancelled => ("task_cancelled", json!({})),
        AgentEvent::TaskAborted { reason } => ("task_aborted", json!({ "reason": reason })),
        AgentEvent::Ready => ("ready", json!({})),
    }
}

fn to_sse_event(event: &AgentEvent) -> Event {
    let (name, data) = sse_parts(event);
    Event::default().event(name).data(data.to_string())
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::UnboundedSender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Serve the web UI on the first free port from `first_port` to `first_port + 9`.
/// Commands posted by the page are queued on `cmd_tx`.
pub async fn start_server(
    first_port: u16,
    cmd_tx: mpsc::UnboundedSender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
) -> Result<u16> {
    let state = Arc::new(AppState { cmd_tx, event_tx });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for port in first_port..first_port.saturating_add(10) {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port {}-{}; is another agent running?",
            first_port,
            first_port.saturating_add(9)
        )
    })?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "web UI stopped");
        }
    });

    Ok(port)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> &'static str {
    let command = payload.command.trim();
    if command.is_empty() {
        return "empty";
    }
    tracing::info!(%command, "command from web UI");
    let _ = state.cmd_tx.send(command.to_string());
    "queued"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Voice Browser Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0b0d12;
    color: #dde3ea;
    font-family: system-ui, -apple-system, 'Segoe UI', sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 28px;
    border-bottom: 1px solid #1c2230;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 18px; font-weight: 600; color: #fff; }
  header .hint { margin-left: auto; font-size: 12px; color: #6b7686; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #eab308; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 860px;
    width: 100%;
    margin: 0 auto;
    padding: 20px 28px;
    gap: 14px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; line-height: 1.45; }
  .entry.task { background: #161c2a; border-left: 3px solid #818cf8; }
  .entry.step { background: #10141c; border-left: 3px solid #38bdf8; font-family: ui-monospace, monospace; font-size: 13px; }
  .entry.result { background: #10141c; border-left: 3px solid #334155; color: #94a3b8; font-size: 13px; }
  .entry.error { background: #1c0f10; border-left: 3px solid #f87171; color: #fecaca; }
  .entry.done { background: #0d1a12; border-left: 3px solid #4ade80; color: #bbf7d0; }
  .entry.info { background: #1a170d; border-left: 3px solid #facc15; color: #fef08a; }
  .input-area { display: flex; gap: 8px; }
  #cmd {
    flex: 1;
    background: #10141c;
    border: 1px solid #222a38;
    border-radius: 6px;
    padding: 11px 14px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  #cmd:focus { border-color: #818cf8; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 6px;
    padding: 11px 22px;
    font-size: 14px;
    font-weight: 600;
    cursor: pointer;
  }
  button:hover { background: #4f46e5; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>Voice Browser Agent</h1>
    <span class="hint">Ctrl+Alt+F record &middot; Ctrl+Alt+G log &middot; Ctrl+Alt+X cancel &middot; Ctrl+Alt+P stop slider</span>
  </header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="cmd" placeholder="Type a task, or hold a voice command..." autofocus />
      <button onclick="send()">Queue</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const dot = document.getElementById('status-dot');
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function add(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));

  on('task_started', d => { dot.className = 'dot busy'; add('task', '<strong>Task:</strong> ' + esc(d.task)); });
  on('thinking', () => add('info', 'Thinking...'));
  on('step', d => add('step', 'Step ' + d.number + ': ' + esc(d.description)));
  on('step_succeeded', d => add('result', esc(d.result)));
  on('step_error', d => add('error', esc(d.message)));
  on('task_complete', d => add('done', '<strong>Done:</strong> ' + esc(d.summary)));
  on('task_cancelled', () => add('info', 'Task cancelled.'));
  on('task_aborted', d => add('error', '<strong>Task aborted:</strong> ' + esc(d.reason)));
  on('ready', () => { dot.className = 'dot'; });

  add('done', 'Agent ready. Type a task or use the recording hotkey.');
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_their_payload() {
        let (name, data) = sse_parts(&AgentEvent::StepError {
            number: 3,
            message: "Error occurred while trying to execute command, Error: Timeout".into(),
        });
        assert_eq!(name, "step_error");
        assert_eq!(data["number"], 3);
        assert!(data["message"].as_str().unwrap().ends_with("Timeout"));

        let (name, data) = sse_parts(&AgentEvent::TaskAborted {
            reason: "stopped".into(),
        });
        assert_eq!(name, "task_aborted");
        assert_eq!(data, json!({"reason": "stopped"}));
    }
}
