//! Per-session scratch space on disk.
//!
//! Layout under the configured storage root:
//!
//! ```text
//! {root}/{session_id}/resume.pdf
//! {root}/{session_id}/audio/{id}.wav
//! {root}/{session_id}/chats/{id}.json
//! ```
//!
//! Directories are created lazily and the whole session directory is removed
//! when that session is disposed, so concurrent sessions never see or delete
//! each other's files.
//!
//! The storage root is served over HTTP under [`PUBLIC_PREFIX`], and clients
//! only ever see files through [`SessionStorage::public_path`].

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// URL prefix the storage root is mounted at.
pub const PUBLIC_PREFIX: &str = "/temp";

#[derive(Debug, Clone)]
pub struct SessionStorage {
    session_id: String,
    dir: PathBuf,
}

impl SessionStorage {
    pub fn new(root: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            dir: root.as_ref().join(session_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// URL path of a file inside this session's directory, e.g.
    /// `/temp/{session_id}/audio/{id}.wav`.
    ///
    /// Paths outside the session directory are returned as they are.
    pub fn public_path(&self, path: &Path) -> String {
        match path.strip_prefix(self.dir()) {
            Ok(relative) => {
                let mut url = format!("{}/{}", PUBLIC_PREFIX, self.session_id);
                for part in relative.components() {
                    url.push('/');
                    url.push_str(&part.as_os_str().to_string_lossy());
                }
                url
            }
            Err(_) => path.display().to_string(),
        }
    }

    /// Where the downloaded resume is kept.
    pub async fn resume_path(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        Ok(self.dir.join("resume.pdf"))
    }

    /// Directory for synthesized audio, created if needed.
    pub async fn audio_dir(&self) -> io::Result<PathBuf> {
        let dir = self.dir.join("audio");
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Fresh, uniquely named path for an exported transcript.
    pub async fn new_chat_path(&self) -> io::Result<PathBuf> {
        let dir = self.dir.join("chats");
        fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!("{}.json", short_id())))
    }

    /// Delete the session directory. Missing directories are not an error.
    pub async fn remove(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Short random identifier for generated file names.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}
