mod face;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use voice_browser_agent::config::AgentArgs;
use voice_browser_agent::hands::{self, ChromePage, Page};
use voice_browser_agent::signals::{self, HotkeyBindings, InputSignal, Signals};
use voice_browser_agent::sounds::{self, SoundBoard};
use voice_browser_agent::voice::{
    self, CommandRecorder, VoiceConsole, VoiceControl, WhisperTranscriber,
};
use voice_browser_agent::{AgentEvent, Brain, EngineConfig, TaskRunner};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = AgentArgs::parse();
    let api_key = args.api_key()?;
    tracing::info!("starting voice browser agent");

    // 1. Web UI first so there is something to look at while Chrome starts
    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<String>();
    let (event_tx, _) = broadcast::channel::<AgentEvent>(256);
    let port = face::start_server(args.ui_port, task_tx.clone(), event_tx.clone()).await?;
    tracing::info!("web UI running at http://localhost:{}", port);

    // 2. Attach to a running Chrome, or launch one with the persistent profile
    let attach = hands::discover_debugger(args.attach_port).await;
    if attach.is_some() {
        tracing::info!(port = args.attach_port, "attaching to running Chrome");
    }
    let launch = args.launch_config(attach);
    let page = tokio::task::spawn_blocking(move || ChromePage::launch(&launch))
        .await
        .context("browser launch panicked")??;
    let page = Arc::new(page);
    {
        let page = Arc::clone(&page);
        let url = args.start_url.clone();
        let opened = tokio::task::spawn_blocking(move || page.goto(&url))
            .await
            .context("navigation panicked")?;
        if let Err(e) = opened {
            tracing::warn!(error = %e, url = %args.start_url, "could not open start page");
        }
    }
    tracing::info!("browser ready");

    // 3. Operator input: hotkeys raise stop flags and feed the voice console
    let signals = Signals::new();
    let sounds = if args.no_sounds {
        SoundBoard::disabled()
    } else {
        SoundBoard::new(&args.sounds_dir)
    };

    let (signal_tx, signal_rx) = mpsc::unbounded_channel::<InputSignal>();
    if args.no_hotkeys {
        drop(signal_tx);
    } else {
        match signals::spawn_hotkey_listener(HotkeyBindings::default(), signals.clone(), signal_tx) {
            Ok(_) => tracing::info!(
                "Ctrl+Alt+F record, Ctrl+Alt+G log, Ctrl+Alt+X cancel, Ctrl+Alt+P stop slider"
            ),
            Err(e) => tracing::warn!(error = %e, "hotkeys unavailable"),
        }
    }

    let console = match &args.recorder {
        Some(recorder) => Some(VoiceConsole::new(
            CommandRecorder::new(recorder.as_str()),
            WhisperTranscriber::new(&args.api_base, api_key.clone(), args.transcription_model.clone()),
            task_tx.clone(),
            sounds.clone(),
            &args.log_dir,
        )),
        None => {
            tracing::info!("no recorder configured, voice input disabled");
            None
        }
    };
    tokio::spawn(voice_loop(console, signal_rx));
    tokio::spawn(sound_loop(sounds, event_tx.subscribe()));

    // 4. One task at a time, in arrival order
    let brain = Brain::new(&args.api_base, api_key, args.model.clone());
    let mut runner = TaskRunner::new(page, brain, signals, EngineConfig::default())
        .with_events(event_tx.clone());
    let _ = event_tx.send(AgentEvent::Ready);
    tracing::info!("waiting for tasks");

    while let Some(task) = task_rx.recv().await {
        let task = task.trim();
        if task.is_empty() {
            continue;
        }
        if voice::is_exit(task) {
            tracing::info!("exiting");
            break;
        }
        runner.run_task(task).await;
        let _ = event_tx.send(AgentEvent::Ready);
    }

    Ok(())
}

/// Forward input signals to the voice console. Keeps draining when voice is disabled so the
/// hotkey thread stays alive for cancel and slider stop.
async fn voice_loop(
    mut console: Option<VoiceConsole<CommandRecorder, WhisperTranscriber>>,
    mut signal_rx: mpsc::UnboundedReceiver<InputSignal>,
) {
    while let Some(signal) = signal_rx.recv().await {
        let Some(console) = console.as_mut() else {
            continue;
        };
        match console.handle(signal).await {
            Ok(VoiceControl::Continue) => {}
            Ok(VoiceControl::Exit) => break,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(error = %message, "voice input failed");
            }
        }
    }
}

async fn sound_loop(sounds: SoundBoard, mut events: broadcast::Receiver<AgentEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(cue) = sounds::cue_for(&event) {
                    sounds.play(cue);
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
