//! Operator input signals and the shared stop flags they raise.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, anyhow};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::mpsc;

/// Discrete events emitted by the input-signal collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    ToggleRecording,
    ToggleLogging,
    /// Cancel the task in flight.
    Cancel,
    /// Stop a running slider movement without cancelling the task.
    StopSlider,
}

/// Cooperative stop flags, cloned into every component that has to observe them.
///
/// Nothing is preempted: the task loop looks at `cancel` at the top of each cycle and the
/// slider stepper looks at both flags between steps.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    cancel: Arc<AtomicBool>,
    slider_stop: Arc<AtomicBool>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn request_slider_stop(&self) {
        self.slider_stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_slider_stop(&self) {
        self.slider_stop.store(false, Ordering::SeqCst);
    }

    pub fn slider_should_stop(&self) -> bool {
        self.slider_stop.load(Ordering::SeqCst) || self.is_cancelled()
    }

    /// Raise the flag belonging to `signal`, if it has one.
    pub fn apply(&self, signal: InputSignal) {
        match signal {
            InputSignal::Cancel => self.request_cancel(),
            InputSignal::StopSlider => self.request_slider_stop(),
            InputSignal::ToggleRecording | InputSignal::ToggleLogging => {}
        }
    }
}

/// Global hotkeys bound to each signal.
#[derive(Debug, Clone, Copy)]
pub struct HotkeyBindings {
    pub record: HotKey,
    pub log: HotKey,
    pub cancel: HotKey,
    pub stop_slider: HotKey,
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        let ctrl_alt = Some(Modifiers::CONTROL | Modifiers::ALT);
        Self {
            record: HotKey::new(ctrl_alt, Code::KeyF),
            log: HotKey::new(ctrl_alt, Code::KeyG),
            cancel: HotKey::new(ctrl_alt, Code::KeyX),
            stop_slider: HotKey::new(ctrl_alt, Code::KeyP),
        }
    }
}

impl HotkeyBindings {
    fn signal_for(&self, id: u32) -> Option<InputSignal> {
        [
            (self.record, InputSignal::ToggleRecording),
            (self.log, InputSignal::ToggleLogging),
            (self.cancel, InputSignal::Cancel),
            (self.stop_slider, InputSignal::StopSlider),
        ]
        .into_iter()
        .find(|(key, _)| key.id() == id)
        .map(|(_, signal)| signal)
    }
}

/// Listen for hotkeys on a dedicated thread.
///
/// Stop flags are raised directly on the listener thread so they take effect while the task
/// worker is busy; every signal is also forwarded on `tx`.
pub fn spawn_hotkey_listener(
    bindings: HotkeyBindings,
    signals: Signals,
    tx: mpsc::UnboundedSender<InputSignal>,
) -> Result<thread::JoinHandle<()>> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

    let handle = thread::Builder::new()
        .name("hotkeys".into())
        .spawn(move || {
            // The manager must live on the thread that receives its events.
            let manager = match register(&bindings) {
                Ok(manager) => {
                    let _ = ready_tx.send(Ok(()));
                    manager
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                    return;
                }
            };

            let events = GlobalHotKeyEvent::receiver();
            while let Ok(event) = events.recv() {
                if event.state != HotKeyState::Pressed {
                    continue;
                }
                let Some(signal) = bindings.signal_for(event.id) else {
                    continue;
                };
                tracing::debug!(?signal, "hotkey pressed");
                signals.apply(signal);
                if tx.send(signal).is_err() {
                    break;
                }
            }
            drop(manager);
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(anyhow!("could not register hotkeys: {}", e)),
        Err(_) => Err(anyhow!("hotkey thread exited during start-up")),
    }
}

fn register(bindings: &HotkeyBindings) -> Result<GlobalHotKeyManager> {
    let manager = GlobalHotKeyManager::new()?;
    manager.register_all(&[
        bindings.record,
        bindings.log,
        bindings.cancel,
        bindings.stop_slider,
    ])?;
    Ok(manager)
}
