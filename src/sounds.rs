//! Fire-and-forget audio cues.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::types::AgentEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Start,
    Stop,
    Error,
    Success,
    StepSuccess,
}

impl Cue {
    pub fn file_name(self) -> &'static str {
        match self {
            Cue::Start => "start.wav",
            Cue::Stop => "stop.wav",
            Cue::Error => "error.wav",
            Cue::Success => "success.wav",
            Cue::StepSuccess => "step_success.wav",
        }
    }
}

/// Cue played for an agent event, if any.
pub fn cue_for(event: &AgentEvent) -> Option<Cue> {
    match event {
        AgentEvent::StepSucceeded { .. } => Some(Cue::StepSuccess),
        AgentEvent::StepError { .. } | AgentEvent::TaskAborted { .. } => Some(Cue::Error),
        AgentEvent::TaskComplete { .. } => Some(Cue::Success),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct SoundBoard {
    dir: PathBuf,
    enabled: bool,
}

impl SoundBoard {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn path(&self, cue: Cue) -> PathBuf {
        self.dir.join(cue.file_name())
    }

    /// Start playing `cue` and return immediately. Failures are logged only.
    /// Must be called from within a tokio runtime.
    pub fn play(&self, cue: Cue) {
        if !self.enabled {
            return;
        }
        let path = self.path(cue);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "sound file missing");
            return;
        }
        let (program, args) = player_command(&path);
        match Command::new(program).args(&args).spawn() {
            Ok(mut child) => {
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => tracing::warn!(program, error = %e, "could not play sound"),
        }
    }
}

fn player_command(path: &Path) -> (&'static str, Vec<String>) {
    let file = path.to_string_lossy().into_owned();
    if cfg!(target_os = "macos") {
        ("afplay", vec![file])
    } else {
        (
            "ffplay",
            vec![
                "-nodisp".into(),
                "-autoexit".into(),
                "-loglevel".into(),
                "quiet".into(),
                file,
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_and_task_events_have_cues() {
        assert_eq!(
            cue_for(&AgentEvent::StepSucceeded {
                number: 1,
                result: "ok".into()
            }),
            Some(Cue::StepSuccess)
        );
        assert_eq!(
            cue_for(&AgentEvent::TaskAborted {
                reason: "x".into()
            }),
            Some(Cue::Error)
        );
        assert_eq!(cue_for(&AgentEvent::Thinking), None);
    }

    #[test]
    fn cues_resolve_inside_the_sounds_dir() {
        let board = SoundBoard::new("./sound effects");
        assert_eq!(
            board.path(Cue::StepSuccess),
            PathBuf::from("./sound effects/step_success.wav")
        );
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn ffplay_runs_without_a_window() {
        let (program, args) = player_command(Path::new("a.wav"));
        assert_eq!(program, "ffplay");
        assert_eq!(args, ["-nodisp", "-autoexit", "-loglevel", "quiet", "a.wav"]);
    }
}
