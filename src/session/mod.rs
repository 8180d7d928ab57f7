//! Session persistence: the on-disk layout from spec §6 —
//! `metadata.json`, `request.json`, `cleaned_markdown/{domain}__{session_id}.json` —
//! plus the progress event hub (see `events`).

pub mod events;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::types::{Mode, Session};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub url: String,
    pub mode: Mode,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedPage {
    pub page_name: String,
    pub page_url: String,
    pub content: String,
}

/// Owns the on-disk directory structure for every session under
/// `storage_base_path`.
#[derive(Clone)]
pub struct SessionStore {
    base_path: PathBuf,
}

impl SessionStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        SessionStore {
            base_path: base_path.into(),
        }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join(session_id)
    }

    fn metadata_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("metadata.json")
    }

    fn request_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("request.json")
    }

    fn cleaned_markdown_path(&self, session_id: &str, domain: &str) -> PathBuf {
        self.session_dir(session_id)
            .join("cleaned_markdown")
            .join(format!("{domain}__{session_id}.json"))
    }

    pub async fn create(&self, session: &Session, request: &SessionRequest) -> CoreResult<()> {
        let dir = self.session_dir(&session.session_id);
        fs::create_dir_all(&dir).await?;
        fs::create_dir_all(dir.join("cleaned_markdown")).await?;
        self.save_metadata(session).await?;
        let request_json = serde_json::to_vec_pretty(request)?;
        fs::write(self.request_path(&session.session_id), request_json).await?;
        debug!(session_id = %session.session_id, "session directory created");
        Ok(())
    }

    pub async fn save_metadata(&self, session: &Session) -> CoreResult<()> {
        let dir = self.session_dir(&session.session_id);
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(session)?;
        fs::write(self.metadata_path(&session.session_id), json).await?;
        Ok(())
    }

    pub async fn load_metadata(&self, session_id: &str) -> CoreResult<Session> {
        let path = self.metadata_path(session_id);
        let bytes = fs::read(&path)
            .await
            .map_err(|_| CoreError::NotFound(format!("session {session_id}")))?;
        let session: Session = serde_json::from_slice(&bytes)?;
        Ok(session)
    }

    /// Appends one successfully normalized page's cleaned Markdown to
    /// `cleaned_markdown/{domain}__{session_id}.json`, creating the file if
    /// absent.
    pub async fn append_cleaned_page(
        &self,
        session_id: &str,
        domain: &str,
        page: CleanedPage,
    ) -> CoreResult<()> {
        let path = self.cleaned_markdown_path(session_id, domain);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut pages: Vec<CleanedPage> = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(_) => Vec::new(),
        };
        pages.push(page);

        let json = serde_json::to_vec_pretty(&pages)?;
        fs::write(&path, json).await?;
        Ok(())
    }

    /// Lists every persisted session, newest-first.
    pub async fn list_sessions(&self) -> CoreResult<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let session_id = entry.file_name().to_string_lossy().to_string();
            if let Ok(session) = self.load_metadata(&session_id).await {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub async fn delete(&self, session_id: &str) -> CoreResult<()> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(CoreError::NotFound(format!("session {session_id}")));
        }
        fs::remove_dir_all(dir).await?;
        Ok(())
    }
}

/// Generates a session id as timestamp + short random tag, per spec §3.
pub fn generate_session_id() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let tag: String = {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        (0..6)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    };
    format!("{timestamp}-{tag}")
}
