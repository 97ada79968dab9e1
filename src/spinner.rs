//! Cosmetic progress indicator around a protected operation.
//!
//! The ticker runs as its own task and never touches the page. [`Spinner::run`] stops and
//! joins it once the operation finishes; if the operation panics or the surrounding future
//! is dropped, the guard aborts the ticker instead.

use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

const FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const MAX_MESSAGE_CHARS: usize = 100;

/// Where the indicator is drawn. Defaults to stdout; log lines go to stderr.
pub type Sink = Arc<Mutex<dyn Write + Send>>;

pub struct Spinner {
    message: String,
    tick: Duration,
    sink: Sink,
}

impl Spinner {
    pub fn new(message: impl Into<String>, tick: Duration) -> Self {
        Self {
            message: truncate(&message.into()),
            tick,
            sink: Arc::new(Mutex::new(std::io::stdout())),
        }
    }

    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    /// Drive `work` while the indicator spins; `succeeded` picks the final mark.
    pub async fn run<F, T>(self, work: F, succeeded: impl FnOnce(&T) -> bool) -> T
    where
        F: Future<Output = T>,
    {
        let mut ticker = Ticker::start(self.message, self.tick, self.sink);
        let output = work.await;
        ticker.finish(succeeded(&output)).await;
        output
    }
}

/// Run `work` behind a spinner when the engine is configured to show progress.
pub async fn with_progress<F, T>(
    config: &EngineConfig,
    message: impl Into<String>,
    work: F,
    succeeded: impl FnOnce(&T) -> bool,
) -> T
where
    F: Future<Output = T>,
{
    if config.show_progress {
        Spinner::new(message, config.timings.spinner_tick)
            .run(work, succeeded)
            .await
    } else {
        work.await
    }
}

struct Ticker {
    stop: Option<oneshot::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn start(message: String, tick: Duration, sink: Sink) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<bool>();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut frame = 0usize;
            let ok = loop {
                tokio::select! {
                    result = &mut stop_rx => break result.unwrap_or(false),
                    _ = interval.tick() => {
                        draw(&sink, &format!("\r{} {}", message, FRAMES[frame % FRAMES.len()]));
                        frame += 1;
                    }
                }
            };
            let mark = if ok { '✅' } else { '❌' };
            draw(&sink, &format!("\r{} {}\n", message, mark));
        });
        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    async fn finish(&mut self, ok: bool) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(ok);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn draw(sink: &Sink, text: &str) {
    let mut out = sink.lock().unwrap_or_else(|e| e.into_inner());
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

fn truncate(message: &str) -> String {
    if message.chars().count() > MAX_MESSAGE_CHARS {
        let cut: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{}...", cut)
    } else {
        message.to_string()
    }
}
