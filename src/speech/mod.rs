//! # Speech Bridge
//!
//! Wraps the speech engine's two capabilities behind one per-session object:
//!
//! - **Synthesis**: text → WAV file + viseme timeline. Single shot, bounded by
//!   a timeout, no client-side cancellation.
//! - **Recognition**: default audio input → text. One shot, ends on an engine
//!   result or an explicit stop signal. Only used by the interactive
//!   `--listen` mode; the socket flow never records audio.
//!
//! The two are lifecycled independently: every synthesis opens and closes its
//! own engine connection, while the recognizer is opened once per session and
//! released by `dispose`.
//!
//! ## Engine Seam:
//! `SpeechEngine` and `Recognizer` are the traits the Azure implementation
//! (`azure.rs`) plugs into; session tests substitute in-memory engines.

pub mod azure;
pub mod microphone;
pub mod pcm;
pub mod ssml;

use crate::error::{SessionError, SessionResult};
use crate::session::settings::Settings;
use crate::session::storage::short_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

pub use azure::AzureSpeechEngine;

/// One mouth-shape event, with its position in the audio in 100ns ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viseme {
    pub viseme_id: u32,
    pub audio_offset: u64,
}

/// Voice and recognition language shared by both capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechProfile {
    pub voice: String,
    pub language: String,
}

impl From<&Settings> for SpeechProfile {
    fn from(settings: &Settings) -> Self {
        Self {
            voice: settings.tts_voice.clone(),
            language: settings.speech_language.clone(),
        }
    }
}

/// A text-to-speech and speech-to-text backend.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Render `ssml` into a WAV file at `output`, returning the visemes in
    /// the order the engine emitted them.
    async fn synthesize(&self, ssml: &str, output: &Path) -> SessionResult<Vec<Viseme>>;

    /// Open a recognizer bound to the profile's language.
    fn open_recognizer(&self, profile: &SpeechProfile) -> SessionResult<Box<dyn Recognizer>>;
}

/// An open speech recognizer.
#[async_trait]
pub trait Recognizer: Send {
    /// Recognize one utterance, or return an empty string once `stop` fires.
    async fn recognize_once(&mut self, stop: oneshot::Receiver<()>) -> SessionResult<String>;

    /// Release the underlying resource.
    fn close(&mut self);
}

/// Per-session speech configuration plus the session's recognizer.
pub struct SpeechBridge {
    engine: Arc<dyn SpeechEngine>,
    profile: SpeechProfile,
    recognizer: Mutex<Option<Box<dyn Recognizer>>>,
    synthesis_timeout: Duration,
}

impl SpeechBridge {
    /// Configure the bridge and open its recognizer.
    pub fn open(
        engine: Arc<dyn SpeechEngine>,
        profile: SpeechProfile,
        synthesis_timeout: Duration,
    ) -> SessionResult<Self> {
        let recognizer = engine.open_recognizer(&profile)?;
        debug!(voice = %profile.voice, language = %profile.language, "Speech bridge opened");

        Ok(Self {
            engine,
            profile,
            recognizer: Mutex::new(Some(recognizer)),
            synthesis_timeout,
        })
    }

    pub fn profile(&self) -> &SpeechProfile {
        &self.profile
    }

    /// Synthesize `text` into a new WAV file inside `audio_dir`.
    ///
    /// ## Returns:
    /// - **Ok((path, visemes))**: the freshly written file and its timeline
    /// - **Err(SessionError::Synthesis)**: engine failure or timeout; no
    ///   partial file is left behind
    pub async fn synthesize(&self, text: &str, audio_dir: &Path) -> SessionResult<(PathBuf, Vec<Viseme>)> {
        let audio_path = audio_dir.join(format!("{}.wav", short_id()));
        let document = ssml::build(&self.profile.voice, text);

        let outcome = tokio::time::timeout(
            self.synthesis_timeout,
            self.engine.synthesize(&document, &audio_path),
        )
        .await
        .unwrap_or_else(|_| {
            Err(SessionError::Synthesis(format!(
                "no result within {:?}",
                self.synthesis_timeout
            )))
        });

        match outcome {
            Ok(visemes) => {
                debug!(path = %audio_path.display(), visemes = visemes.len(), "Synthesis completed");
                Ok((audio_path, visemes))
            }
            Err(err) => {
                if tokio::fs::remove_file(&audio_path).await.is_ok() {
                    debug!(path = %audio_path.display(), "Removed partial audio file");
                }
                Err(err)
            }
        }
    }

    /// Run one recognition against the session's recognizer.
    pub async fn recognize_once(&self, stop: oneshot::Receiver<()>) -> SessionResult<String> {
        let mut guard = self.recognizer.lock().await;
        let recognizer = guard
            .as_mut()
            .ok_or_else(|| SessionError::State("recognizer has been released".to_string()))?;

        info!("Starting recognition...");
        let text = recognizer.recognize_once(stop).await?;
        info!(text = %text, "Recognition finished");
        Ok(text)
    }

    /// Release the recognizer. Later calls do nothing.
    pub async fn dispose(&self) {
        match self.recognizer.lock().await.take() {
            Some(mut recognizer) => {
                recognizer.close();
                debug!("Recognizer released");
            }
            None => warn!("Speech bridge already disposed"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// In-memory engine: writes a tiny WAV and emits one viseme per character.
    #[derive(Default)]
    pub(crate) struct MockSpeechEngine {
        pub released: Arc<AtomicUsize>,
        pub opened: AtomicUsize,
        pub fail_synthesis: bool,
        /// Keep the call open this long after the audio file is written
        pub stall_after_write: Option<Duration>,
        pub recognized: Option<String>,
        pub ssml_seen: StdMutex<Vec<String>>,
    }

    pub(crate) struct MockRecognizer {
        released: Arc<AtomicUsize>,
        recognized: Option<String>,
    }

    #[async_trait]
    impl SpeechEngine for MockSpeechEngine {
        async fn synthesize(&self, ssml: &str, output: &Path) -> SessionResult<Vec<Viseme>> {
            self.ssml_seen.lock().unwrap().push(ssml.to_string());
            if self.fail_synthesis {
                return Err(SessionError::Synthesis("engine reported Canceled".to_string()));
            }

            let wav = pcm::encode_wav(&[0, 1200, -1200, 0], 24_000)?;
            tokio::fs::write(output, wav).await?;
            if let Some(stall) = self.stall_after_write {
                tokio::time::sleep(stall).await;
            }

            Ok(ssml
                .chars()
                .filter(|c| c.is_alphabetic())
                .enumerate()
                .map(|(i, c)| Viseme {
                    viseme_id: (c as u32) % 22,
                    audio_offset: i as u64 * 500_000,
                })
                .collect())
        }

        fn open_recognizer(&self, _profile: &SpeechProfile) -> SessionResult<Box<dyn Recognizer>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockRecognizer {
                released: self.released.clone(),
                recognized: self.recognized.clone(),
            }))
        }
    }

    #[async_trait]
    impl Recognizer for MockRecognizer {
        async fn recognize_once(&mut self, stop: oneshot::Receiver<()>) -> SessionResult<String> {
            match &self.recognized {
                Some(text) => Ok(text.clone()),
                None => {
                    let _ = stop.await;
                    Ok(String::new())
                }
            }
        }

        fn close(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn profile() -> SpeechProfile {
        SpeechProfile {
            voice: "en-US-MockNeural".to_string(),
            language: "en-US".to_string(),
        }
    }

    #[tokio::test]
    async fn test_synthesize_hello_returns_audio_and_ordered_visemes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockSpeechEngine::default());
        let bridge = SpeechBridge::open(engine.clone(), profile(), Duration::from_secs(5)).unwrap();

        let (path, visemes) = bridge.synthesize("Hello", dir.path()).await.unwrap();

        assert!(path.starts_with(dir.path()));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(!visemes.is_empty());
        assert!(visemes.windows(2).all(|w| w[0].audio_offset <= w[1].audio_offset));

        let seen = engine.ssml_seen.lock().unwrap();
        assert!(seen[0].contains(r#"<voice name="en-US-MockNeural">Hello</voice>"#));
    }

    #[tokio::test]
    async fn test_each_synthesis_gets_a_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockSpeechEngine::default());
        let bridge = SpeechBridge::open(engine, profile(), Duration::from_secs(5)).unwrap();

        let (first, _) = bridge.synthesize("one", dir.path()).await.unwrap();
        let (second, _) = bridge.synthesize("two", dir.path()).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockSpeechEngine {
            fail_synthesis: true,
            ..Default::default()
        });
        let bridge = SpeechBridge::open(engine, profile(), Duration::from_secs(5)).unwrap();

        let err = bridge.synthesize("Hello", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "synthesis_error");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_timeout_removes_partial_audio() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockSpeechEngine {
            stall_after_write: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let bridge = SpeechBridge::open(engine.clone(), profile(), Duration::from_millis(50)).unwrap();

        let err = bridge.synthesize("Hello", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "synthesis_error");
        assert!(err.to_string().contains("50ms"));
        // The engine was reached; only its result came too late
        assert_eq!(engine.ssml_seen.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_recognize_returns_empty_text_on_stop() {
        let engine = Arc::new(MockSpeechEngine::default());
        let bridge = SpeechBridge::open(engine, profile(), Duration::from_secs(5)).unwrap();

        let (stop_tx, stop_rx) = oneshot::channel();
        stop_tx.send(()).unwrap();
        assert_eq!(bridge.recognize_once(stop_rx).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_dispose_releases_recognizer_once() {
        let engine = Arc::new(MockSpeechEngine {
            recognized: Some("hello there".to_string()),
            ..Default::default()
        });
        let bridge = SpeechBridge::open(engine.clone(), profile(), Duration::from_secs(5)).unwrap();

        let (_stop_tx, stop_rx) = oneshot::channel();
        assert_eq!(bridge.recognize_once(stop_rx).await.unwrap(), "hello there");

        bridge.dispose().await;
        bridge.dispose().await;
        assert_eq!(engine.released.load(Ordering::SeqCst), 1);

        let (_stop_tx, stop_rx) = oneshot::channel();
        assert!(bridge.recognize_once(stop_rx).await.is_err());
    }
}
