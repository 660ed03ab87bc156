//! # Session Controller
//!
//! One conversational session: settings, transcript, speech bridge and
//! scoped storage, driven through a small state machine.
//!
//! ```text
//! Uninitialized --initialize--> Ready --handle_question--> Busy --> Ready
//!       ^                         |
//!       +---- failed initialize --+            any --dispose--> Closed
//! ```
//!
//! ## Concurrency:
//! `initialize`, `handle_question` and `dispose` queue on one FIFO async
//! mutex, so questions are answered strictly in arrival order and a second
//! `initialize` fully supersedes the first. `export_transcript` and `info`
//! only take a short read lock on the transcript and never wait for an
//! in-flight question.

use crate::error::{SessionError, SessionResult};
use crate::session::settings::Settings;
use crate::session::storage::SessionStorage;
use crate::session::transcript::{AudioArtifact, Role, TranscriptStore};
use crate::session::SessionServices;
use crate::speech::{SpeechBridge, SpeechProfile, Viseme};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, or the last `initialize` failed
    Uninitialized,
    /// Waiting for a question
    Ready,
    /// Answering a question
    Busy,
    /// Disposed; every operation fails
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Closed => "closed",
        }
    }
}

/// The spoken reply to one question.
#[derive(Debug, Clone, PartialEq)]
pub struct SpokenAnswer {
    pub text: String,
    pub audio_path: PathBuf,
    pub visemes: Vec<Viseme>,
}

/// Snapshot of a session for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub turns: usize,
    pub questions_answered: u64,
    pub answers: Vec<AnswerInfo>,
    pub candidate: Option<String>,
    pub position: Option<String>,
}

/// One voiced answer as listed by the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerInfo {
    pub turn_index: usize,
    pub audio: String,
    pub visemes: usize,
}

pub struct SessionController {
    id: String,
    created_at: DateTime<Utc>,
    services: SessionServices,
    storage: SessionStorage,

    /// Serializes initialize, handle_question and dispose
    ops: Mutex<()>,

    state: StdRwLock<SessionState>,
    settings: StdRwLock<Option<Settings>>,
    transcript: RwLock<TranscriptStore>,
    bridge: RwLock<Option<Arc<SpeechBridge>>>,
    questions_answered: AtomicU64,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Puts a busy session back to `Ready` however the question ends,
/// including when the answering future is dropped.
struct BusyGuard<'a> {
    controller: &'a SessionController,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.controller
            .transition(SessionState::Busy, SessionState::Ready);
    }
}

impl SessionController {
    pub fn new(id: impl Into<String>, services: SessionServices) -> Self {
        let id = id.into();
        let storage = SessionStorage::new(&services.storage_root, &id);

        Self {
            id,
            created_at: Utc::now(),
            services,
            storage,
            ops: Mutex::new(()),
            state: StdRwLock::new(SessionState::Uninitialized),
            settings: StdRwLock::new(None),
            transcript: RwLock::new(TranscriptStore::new()),
            bridge: RwLock::new(None),
            questions_answered: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Move from `from` to `to`; returns false if the session was elsewhere.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state() == SessionState::Closed {
            return Err(SessionError::State("session is closed".to_string()));
        }
        Ok(())
    }

    /// Start (or restart) the session with new settings.
    ///
    /// ## Process:
    /// 1. Tear down whatever the previous `initialize` set up
    /// 2. Validate settings and download the resume
    /// 3. Open a speech bridge for the configured voice and language
    /// 4. Seed the transcript with the system prompt
    ///
    /// On failure the session stays `Uninitialized` with an empty transcript.
    pub async fn initialize(&self, settings: Settings) -> SessionResult<()> {
        let _ops = self.ops.lock().await;
        self.ensure_open()?;

        info!(
            session_id = %self.id,
            candidate = %format!("{} {}", settings.my_name, settings.my_surname),
            company = %settings.company_name,
            "Initializing session"
        );

        self.set_state(SessionState::Uninitialized);
        self.teardown().await;

        let started = Instant::now();
        match self.prepare(&settings).await {
            Ok((bridge, system_prompt)) => {
                self.transcript.write().await.reset(system_prompt);
                *self.bridge.write().await = Some(Arc::new(bridge));
                *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(settings);
                self.questions_answered.store(0, Ordering::Relaxed);
                self.set_state(SessionState::Ready);

                info!(
                    session_id = %self.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Session ready"
                );
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Session initialization failed");
                Err(e)
            }
        }
    }

    async fn prepare(&self, settings: &Settings) -> SessionResult<(SpeechBridge, String)> {
        settings.validate()?;

        let resume_text = self
            .services
            .resume
            .fetch(&settings.link_to_resume, &self.storage)
            .await?;

        let bridge = SpeechBridge::open(
            self.services.speech.clone(),
            SpeechProfile::from(settings),
            self.services.synthesis_timeout,
        )?;

        Ok((bridge, settings.system_prompt(&resume_text)))
    }

    /// Release the bridge and forget the conversation and its files.
    async fn teardown(&self) {
        let previous = self.bridge.write().await.take();
        if let Some(bridge) = previous {
            bridge.dispose().await;
        }

        self.transcript.write().await.clear();
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = None;

        if let Err(e) = self.storage.remove().await {
            warn!(session_id = %self.id, error = %e, "Failed to remove session storage");
        }
    }

    /// Answer one interviewer question with text, audio and visemes.
    ///
    /// ## Failure Handling:
    /// - Completion failure: the user turn stays, no assistant turn is added
    /// - Synthesis failure: the assistant turn stays without an artifact
    ///
    /// Either way the session returns to `Ready`.
    pub async fn handle_question(&self, question: &str) -> SessionResult<SpokenAnswer> {
        let _ops = self.ops.lock().await;

        let state = self.state();
        if state != SessionState::Ready {
            return Err(SessionError::State(format!(
                "cannot answer a question while {}",
                state.as_str()
            )));
        }
        if question.trim().is_empty() {
            return Err(SessionError::State("question is empty".to_string()));
        }

        let bridge = self
            .bridge
            .read()
            .await
            .clone()
            .ok_or_else(|| SessionError::State("session has no speech bridge".to_string()))?;

        self.set_state(SessionState::Busy);
        let _busy = BusyGuard { controller: self };

        info!(session_id = %self.id, question = %question, "Question received");
        let answer = self.answer(question, &bridge).await?;
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
        Ok(answer)
    }

    async fn answer(&self, question: &str, bridge: &SpeechBridge) -> SessionResult<SpokenAnswer> {
        let turns = {
            let mut transcript = self.transcript.write().await;
            transcript.append(Role::User, question)?;
            transcript.turns().to_vec()
        };

        let started = Instant::now();
        let reply = self.services.completion.complete(&turns).await?;
        debug!(
            session_id = %self.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );

        let turn_index = self
            .transcript
            .write()
            .await
            .append(Role::Assistant, reply.as_str())?;
        info!(session_id = %self.id, response = %reply, "Answer generated");

        let audio_dir = self.storage.audio_dir().await?;
        let (audio_path, visemes) = bridge.synthesize(&reply, &audio_dir).await?;

        self.transcript.write().await.record_artifact(AudioArtifact::new(
            turn_index,
            audio_path.clone(),
            visemes.clone(),
        ))?;
        info!(
            session_id = %self.id,
            audio = %audio_path.display(),
            visemes = visemes.len(),
            "Answer synthesized"
        );

        Ok(SpokenAnswer {
            text: reply,
            audio_path,
            visemes,
        })
    }

    /// Write the user/assistant exchange to a new JSON file and return its path.
    pub async fn export_transcript(&self) -> SessionResult<PathBuf> {
        let state = self.state();
        if !matches!(state, SessionState::Ready | SessionState::Busy) {
            return Err(SessionError::State(format!(
                "cannot export a transcript while {}",
                state.as_str()
            )));
        }

        let exchange = self.transcript.read().await.exchange();
        let json = serde_json::to_vec(&exchange).map_err(io::Error::other)?;

        let written = async {
            let path = self.storage.new_chat_path().await?;
            tokio::fs::write(&path, json).await?;
            Ok::<_, io::Error>(path)
        }
        .await;
        let path = self.confirm_export(written).await?;

        info!(session_id = %self.id, path = %path.display(), turns = exchange.len(), "Transcript exported");
        Ok(path)
    }

    /// A dispose that ran while the file was written has removed, or is about
    /// to remove, the session directory; the export must not report success.
    /// The write may also have recreated the directory after dispose cleaned
    /// it, so it is removed again here.
    async fn confirm_export(&self, written: io::Result<PathBuf>) -> SessionResult<PathBuf> {
        if self.state() != SessionState::Closed {
            return Ok(written?);
        }

        if let Err(e) = self.storage.remove().await {
            warn!(session_id = %self.id, error = %e, "Failed to remove session storage");
        }
        Err(SessionError::State(
            "session was closed during export".to_string(),
        ))
    }

    /// Close the session for good. Safe to call more than once.
    pub async fn dispose(&self) {
        let _ops = self.ops.lock().await;
        if self.state() == SessionState::Closed {
            debug!(session_id = %self.id, "Session already disposed");
            return;
        }

        self.set_state(SessionState::Closed);
        self.teardown().await;
        info!(session_id = %self.id, "Session disposed");
    }

    pub async fn info(&self) -> SessionInfo {
        let (candidate, position) = {
            let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
            match settings.as_ref() {
                Some(s) => (
                    Some(format!("{} {}", s.my_name, s.my_surname).trim().to_string()),
                    Some(format!("{} at {}", s.job_title, s.company_name)),
                ),
                None => (None, None),
            }
        };

        let (turns, answers) = {
            let transcript = self.transcript.read().await;
            let answers = transcript
                .artifacts()
                .iter()
                .map(|artifact| AnswerInfo {
                    turn_index: artifact.turn_index(),
                    audio: self.storage.public_path(artifact.audio_path()),
                    visemes: artifact.visemes().len(),
                })
                .collect();
            (transcript.len(), answers)
        };

        SessionInfo {
            session_id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            turns,
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            answers,
            candidate,
            position,
        }
    }
}
