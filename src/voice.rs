//! Voice input: audio capture, speech-to-text and the recording/logging toggles.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::journal::Journal;
use crate::signals::InputSignal;
use crate::sounds::{Cue, SoundBoard};
use crate::spinner::Spinner;

/// Turns recorded audio into text. Silence yields an empty transcript.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;
}

/// Records audio between `start` and `stop`.
#[async_trait]
pub trait AudioCapture: Send {
    async fn start(&mut self) -> Result<()>;
    /// Stop recording and return the captured WAV bytes.
    async fn stop(&mut self) -> Result<Vec<u8>>;
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct WhisperTranscriber {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(api_base: &str, api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let audio = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .text("model", self.model.clone())
            .part("file", audio);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("transcription API error ({}): {}", status, body);
        }
        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text.trim().to_string())
    }
}

/// Records through an external program such as ffmpeg or arecord.
///
/// `{output}` in the command template is replaced with the WAV path to write. Recording is
/// stopped by sending `q` on stdin, falling back to killing the process.
pub struct CommandRecorder {
    template: String,
    output: PathBuf,
    child: Option<Child>,
}

const RECORDER_GRACE: Duration = Duration::from_secs(3);

impl CommandRecorder {
    pub fn new(template: impl Into<String>) -> Self {
        let output = std::env::temp_dir().join(format!("agent-recording-{}.wav", std::process::id()));
        Self {
            template: template.into(),
            output,
            child: None,
        }
    }

    fn argv(&self) -> Vec<String> {
        let output = self.output.to_string_lossy();
        self.template
            .split_whitespace()
            .map(|part| part.replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl AudioCapture for CommandRecorder {
    async fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            bail!("recorder already running");
        }
        let argv = self.argv();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("recorder command is empty"))?;
        let _ = tokio::fs::remove_file(&self.output).await;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("starting recorder `{}`", program))?;
        tracing::debug!(%program, "recorder started");
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<u8>> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("recorder is not running"))?;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
        }
        match tokio::time::timeout(RECORDER_GRACE, child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                tracing::warn!("recorder did not stop in time, killing it");
                child.kill().await?;
            }
        }
        let wav = tokio::fs::read(&self.output)
            .await
            .with_context(|| format!("reading {}", self.output.display()))?;
        let _ = tokio::fs::remove_file(&self.output).await;
        Ok(wav)
    }
}

/// True for transcripts that ask the agent to shut down.
pub fn is_exit(transcript: &str) -> bool {
    let cleaned: String = transcript
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    cleaned.eq_ignore_ascii_case("exit")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceMode {
    Idle,
    Recording,
    Logging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceControl {
    Continue,
    Exit,
}

/// Reacts to recording and logging toggles: commands go to the task queue, log entries go
/// to the voice log.
pub struct VoiceConsole<C, T> {
    capture: C,
    transcriber: T,
    tasks: mpsc::UnboundedSender<String>,
    sounds: SoundBoard,
    log_dir: PathBuf,
    journal: Option<Journal>,
    mode: VoiceMode,
}

impl<C: AudioCapture, T: Transcriber> VoiceConsole<C, T> {
    pub fn new(
        capture: C,
        transcriber: T,
        tasks: mpsc::UnboundedSender<String>,
        sounds: SoundBoard,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            capture,
            transcriber,
            tasks,
            sounds,
            log_dir: log_dir.into(),
            journal: None,
            mode: VoiceMode::Idle,
        }
    }

    pub fn mode(&self) -> VoiceMode {
        self.mode
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    pub async fn handle(&mut self, signal: InputSignal) -> Result<VoiceControl> {
        match (signal, self.mode) {
            (InputSignal::ToggleRecording, VoiceMode::Idle) => {
                self.begin(VoiceMode::Recording).await?;
                tracing::info!("recording started");
            }
            (InputSignal::ToggleRecording, VoiceMode::Recording) => {
                let transcript = self.finish("Transcribing audio..").await?;
                return Ok(self.submit(&transcript));
            }
            (InputSignal::ToggleLogging, VoiceMode::Idle) => {
                if self.journal.is_none() {
                    self.journal = Some(Journal::create_in(&self.log_dir)?);
                }
                self.begin(VoiceMode::Logging).await?;
                tracing::info!("logging started, speak your log now");
            }
            (InputSignal::ToggleLogging, VoiceMode::Logging) => {
                let transcript = self.finish("Transcribing your log entry...").await?;
                self.write_log(&transcript)?;
            }
            (InputSignal::ToggleRecording | InputSignal::ToggleLogging, mode) => {
                tracing::warn!(?mode, ?signal, "ignoring toggle while another capture runs");
            }
            (InputSignal::Cancel | InputSignal::StopSlider, _) => {}
        }
        Ok(VoiceControl::Continue)
    }

    async fn begin(&mut self, mode: VoiceMode) -> Result<()> {
        self.sounds.play(Cue::Start);
        self.capture.start().await?;
        self.mode = mode;
        Ok(())
    }

    async fn finish(&mut self, message: &str) -> Result<String> {
        self.mode = VoiceMode::Idle;
        self.sounds.play(Cue::Stop);
        let wav = self.capture.stop().await?;
        Spinner::new(message, Duration::from_millis(100))
            .run(self.transcriber.transcribe(wav), |r| r.is_ok())
            .await
    }

    fn submit(&self, transcript: &str) -> VoiceControl {
        if is_exit(transcript) {
            tracing::info!("exit requested");
            let _ = self.tasks.send("exit".to_string());
            return VoiceControl::Exit;
        }
        let text = transcript.trim();
        if text.is_empty() {
            tracing::info!("no speech detected");
            return VoiceControl::Continue;
        }
        tracing::info!(transcript = %text, "transcribed");
        let _ = self.tasks.send(text.to_string());
        VoiceControl::Continue
    }

    fn write_log(&mut self, transcript: &str) -> Result<()> {
        let text = transcript.trim();
        if text.is_empty() {
            tracing::warn!("no speech detected, nothing written to log");
            return Ok(());
        }
        if let Some(journal) = self.journal.as_mut() {
            let number = journal.append(text)?;
            tracing::info!(number, entry = %text, "logged");
        }
        Ok(())
    }
}
