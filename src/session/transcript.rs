//! # Transcript Store
//!
//! Owns the ordered conversation of one session and the audio artifacts
//! produced for it.
//!
//! ## Invariants:
//! - The first turn is the only system turn; `reset` is the only way to set it.
//! - Turns are only ever appended; indices returned by `append` never change.
//! - Every artifact names the assistant turn it voices through `turn_index`,
//!   and each assistant turn has at most one artifact.

use crate::error::{SessionError, SessionResult};
use crate::speech::Viseme;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Speaker of a turn, serialized the way the completion API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Audio file of the artifact recorded for this turn, if any
    pub audio: Option<PathBuf>,
}

/// Synthesized audio plus lip-sync timing for one assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    turn_index: usize,
    audio_path: PathBuf,
    visemes: Vec<Viseme>,
}

impl AudioArtifact {
    pub fn new(turn_index: usize, audio_path: PathBuf, visemes: Vec<Viseme>) -> Self {
        Self {
            turn_index,
            audio_path,
            visemes,
        }
    }

    /// Index of the assistant turn this artifact belongs to.
    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }

    pub fn visemes(&self) -> &[Viseme] {
        &self.visemes
    }
}

/// A user or assistant turn as written to an exported transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTurn {
    pub role: Role,
    pub content: String,
    pub audio: Option<String>,
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
    artifacts: Vec<AudioArtifact>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole conversation with a single system turn.
    pub fn reset(&mut self, system_prompt: String) {
        self.turns.clear();
        self.artifacts.clear();
        self.turns.push(Turn {
            role: Role::System,
            content: system_prompt,
            audio: None,
        });
    }

    /// Drop everything, including the system turn.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.artifacts.clear();
    }

    /// Append a user or assistant turn and return its index.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> SessionResult<usize> {
        if role == Role::System {
            return Err(SessionError::State(
                "system turn can only be set by a reset".to_string(),
            ));
        }
        if self.turns.is_empty() {
            return Err(SessionError::State(
                "transcript has no system turn".to_string(),
            ));
        }

        self.turns.push(Turn {
            role,
            content: content.into(),
            audio: None,
        });
        Ok(self.turns.len() - 1)
    }

    /// Attach an artifact to the assistant turn it names.
    pub fn record_artifact(&mut self, artifact: AudioArtifact) -> SessionResult<()> {
        let index = artifact.turn_index;
        let turn = self.turns.get_mut(index).ok_or_else(|| {
            SessionError::State(format!("artifact references missing turn {}", index))
        })?;

        if turn.role != Role::Assistant {
            return Err(SessionError::State(format!(
                "artifact references turn {} which is not an assistant turn",
                index
            )));
        }
        if turn.audio.is_some() {
            return Err(SessionError::State(format!(
                "turn {} already has an audio artifact",
                index
            )));
        }

        turn.audio = Some(artifact.audio_path.clone());
        self.artifacts.push(artifact);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn artifacts(&self) -> &[AudioArtifact] {
        &self.artifacts
    }

    /// Number of turns, including the system turn.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// User and assistant turns with their audio, in conversation order.
    pub fn exchange(&self) -> Vec<ExportedTurn> {
        self.turns
            .iter()
            .filter(|turn| turn.role != Role::System)
            .map(|turn| ExportedTurn {
                role: turn.role,
                content: turn.content.clone(),
                audio: turn.audio.as_ref().map(|p| p.display().to_string()),
            })
            .collect()
    }
}
