use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::hands::LaunchConfig;

/// Consecutive action failures after which a task is aborted.
pub const ERROR_THRESHOLD: u32 = 6;

pub const DEFAULT_START_URL: &str = "https://app.supervisely.com/";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Delays the engine inserts to let asynchronous page effects settle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    /// Between two decide/dispatch cycles, before the next snapshot.
    pub cycle_settle: Duration,
    /// After each executed action, before the page is re-captured.
    pub action_settle: Duration,
    /// After focus moved to a freshly opened tab.
    pub new_tab_settle: Duration,
    /// After a `goto` navigation finished.
    pub after_goto: Duration,
    /// Redraw period of the progress indicator.
    pub spinner_tick: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            cycle_settle: Duration::from_millis(1200),
            action_settle: Duration::from_millis(1500),
            new_tab_settle: Duration::from_secs(5),
            after_goto: Duration::from_secs(3),
            spinner_tick: Duration::from_millis(100),
        }
    }
}

impl Timings {
    /// No waiting at all; for scripted pages.
    pub fn immediate() -> Self {
        Self {
            cycle_settle: Duration::ZERO,
            action_settle: Duration::ZERO,
            new_tab_settle: Duration::ZERO,
            after_goto: Duration::ZERO,
            spinner_tick: Duration::from_millis(100),
        }
    }
}

/// Engine settings shared by every task of a runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub timings: Timings,
    /// Draw a terminal progress indicator around decisions and actions.
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            show_progress: true,
        }
    }
}

/// Voice-driven browser agent for the annotation tool.
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", version, about)]
pub struct AgentArgs {
    /// Page opened when the browser starts.
    #[arg(long, env = "AGENT_START_URL", default_value = DEFAULT_START_URL)]
    pub start_url: String,

    /// Chrome user-data directory, kept between runs so logins persist.
    #[arg(long, env = "AGENT_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Chrome executable; searched for when omitted.
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Remote-debugging port of a running Chrome to attach to before launching one.
    #[arg(long, default_value_t = 9222)]
    pub attach_port: u16,

    #[arg(long)]
    pub headless: bool,

    /// First port tried for the local web UI.
    #[arg(long, default_value_t = 3000)]
    pub ui_port: u16,

    /// Directory of voice log files.
    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Directory holding start/stop/error/success/step_success .wav cues.
    #[arg(long, default_value = "./sound effects")]
    pub sounds_dir: PathBuf,

    #[arg(long)]
    pub no_sounds: bool,

    #[arg(long)]
    pub no_hotkeys: bool,

    /// External audio recorder; `{output}` is replaced by the WAV path to write.
    /// Example: `ffmpeg -y -f dshow -i audio=Microphone -ac 1 -ar 16000 {output}`
    #[arg(long, env = "AGENT_RECORDER")]
    pub recorder: Option<String>,

    #[arg(long, env = "MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "TRANSCRIPTION_MODEL", default_value = DEFAULT_TRANSCRIPTION_MODEL)]
    pub transcription_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

impl AgentArgs {
    pub fn profile_dir(&self) -> PathBuf {
        self.profile_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("voice-browser-agent").join("profile"))
                .unwrap_or_else(|| PathBuf::from("agent_profile"))
        })
    }

    pub fn launch_config(&self, attach_ws: Option<String>) -> LaunchConfig {
        LaunchConfig {
            attach_ws,
            chrome_path: self.chrome_path.clone(),
            profile_dir: self.profile_dir(),
            headless: self.headless,
        }
    }

    pub fn api_key(&self) -> anyhow::Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set in environment"))
    }
}
