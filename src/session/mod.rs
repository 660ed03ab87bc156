//! # Interview Sessions
//!
//! Everything that belongs to one conversational session:
//!
//! - **settings**: what the client sends with `init`
//! - **transcript**: the ordered conversation and its audio artifacts
//! - **storage**: per-session files on disk
//! - **controller**: the session state machine tying collaborators together
//! - **manager**: the registry of live sessions, one per connection

pub mod controller;
pub mod manager;
pub mod settings;
pub mod storage;
pub mod transcript;

use crate::completion::ChatCompletion;
use crate::resume::ResumeSource;
use crate::speech::SpeechEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use controller::SessionController;
pub use manager::SessionRegistry;
pub use settings::Settings;

/// Collaborators and limits shared by every session of the server.
#[derive(Clone)]
pub struct SessionServices {
    pub resume: Arc<dyn ResumeSource>,
    pub completion: Arc<dyn ChatCompletion>,
    pub speech: Arc<dyn SpeechEngine>,
    pub synthesis_timeout: Duration,
    /// Directory under which each session gets its own folder
    pub storage_root: PathBuf,
}
