//! Filesystem session store. Layout under
//! `{root}/YYYY-MM-DD/ses-HHMMSS/`: `metadata.json`, `images/iNcM.png`,
//! `tokens.json`, optional `evaluation/eval-*.json`. Writes are
//! append-or-replace per file; the final commit per iteration is an
//! atomic rename so readers never observe a partially written frame.

mod metadata;

pub use metadata::{
    CandidateImage, CandidateRanking, CandidateRecord, EvaluationEntry, IterationRecord,
    LineageEntry, MetadataConfig, MetadataDocument, SessionSummary,
};

use std::path::{Path, PathBuf};

use beamforge_core::domain::SessionId;
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("image not found: {0}/{1}")]
    ImageNotFound(String, String),
    #[error("rejected path for session {session}: {reason}")]
    InvalidPath { session: String, reason: String },
}

/// Generates `ses-HHMMSS`, disambiguating same-second collisions by
/// probing the filesystem and appending a short random suffix.
pub fn generate_session_id(root: &Path, now: DateTime<Utc>) -> SessionId {
    let base = SessionId::generate(now, None);
    let day_dir = root.join(now.format("%Y-%m-%d").to_string());
    if !day_dir.join(&base.0).exists() {
        return base;
    }
    loop {
        let suffix: String = {
            let mut rng = rand::thread_rng();
            (0..4)
                .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                .collect::<String>()
                .to_lowercase()
        };
        let candidate = SessionId::generate(now, Some(&suffix));
        if !day_dir.join(&candidate.0).exists() {
            return candidate;
        }
    }
}

/// Owns one root directory of session history; safe to share across a
/// job's single writer (the worker) and many readers.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `{root}/YYYY-MM-DD/ses-HHMMSS/images/` and writes the
    /// initial `metadata.json`; returns the session's directory path.
    pub async fn create_session(
        &self,
        session_id: &SessionId,
        day: &str,
        initial: &MetadataDocument,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(day).join(&session_id.0);
        tokio::fs::create_dir_all(dir.join("images")).await?;
        self.write_metadata(&dir, initial).await?;
        Ok(dir)
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        for entry in walk_days(&self.root)? {
            let candidate = entry.join(session_id);
            if candidate.join("metadata.json").exists() {
                return Ok(candidate);
            }
        }
        Err(StoreError::SessionNotFound(session_id.to_string()))
    }

    async fn write_metadata(
        &self,
        dir: &Path,
        doc: &MetadataDocument,
    ) -> Result<(), StoreError> {
        atomic_write_json(dir, "metadata.json", doc).await
    }

    pub async fn get_metadata(&self, session_id: &str) -> Result<MetadataDocument, StoreError> {
        let dir = self.session_dir(session_id)?;
        let bytes = tokio::fs::read(dir.join("metadata.json")).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Lists every session discoverable under the root, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for day_dir in walk_days(&self.root)? {
            let mut read_dir = tokio::fs::read_dir(&day_dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let metadata_path = entry.path().join("metadata.json");
                if !metadata_path.exists() {
                    continue;
                }
                let bytes = tokio::fs::read(&metadata_path).await?;
                if let Ok(doc) = serde_json::from_slice::<MetadataDocument>(&bytes) {
                    summaries.push(SessionSummary::from(&doc));
                }
            }
        }
        summaries.sort_by(|a, b| b.session_id.cmp(&a.session_id));
        Ok(summaries)
    }

    /// Appends (or replaces, on retry) one completed iteration frame to
    /// `metadata.json` via a read-modify-atomic-rename-write cycle.
    pub async fn append_iteration(
        &self,
        session_id: &str,
        iteration: IterationRecord,
    ) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        let mut doc = self.get_metadata(session_id).await?;
        doc.iterations.retain(|i| i.iteration != iteration.iteration);
        doc.iterations.push(iteration);
        doc.iterations.sort_by_key(|i| i.iteration);
        self.write_metadata(&dir, &doc).await
    }

    /// Records the terminal winner/finalists/lineage and triggers the
    /// session's final commit.
    pub async fn finalize(
        &self,
        session_id: &str,
        winner: Option<u32>,
        finalists: Vec<u32>,
        lineage: Vec<LineageEntry>,
        token_usage: Option<u64>,
        estimated_cost: Option<f64>,
    ) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        let mut doc = self.get_metadata(session_id).await?;
        doc.winner = winner;
        doc.finalists = if finalists.is_empty() {
            None
        } else {
            Some(finalists)
        };
        doc.lineage = if lineage.is_empty() { None } else { Some(lineage) };
        doc.token_usage = token_usage;
        doc.estimated_cost = estimated_cost;
        self.write_metadata(&dir, &doc).await
    }

    /// Persists the meter snapshot as `tokens.json`.
    pub async fn write_tokens(&self, session_id: &str, tokens_json: &str) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        atomic_write_bytes(&dir, "tokens.json", tokens_json.as_bytes()).await
    }

    /// Writes one candidate's rendered image bytes under
    /// `images/i{iteration}c{candidateId}.png`.
    pub async fn write_image(
        &self,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        validate_filename(session_id, filename)?;
        let dir = self.session_dir(session_id)?;
        let images_dir = dir.join("images");
        tokio::fs::create_dir_all(&images_dir).await?;
        let path = images_dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Reads back an image, rejecting any filename that would escape the
    /// session directory and surfacing a missing file as
    /// [`StoreError::ImageNotFound`] rather than a bare io error.
    pub async fn get_image(&self, session_id: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        validate_filename(session_id, filename)?;
        let dir = self.session_dir(session_id)?;
        let path = dir.join("images").join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                StoreError::ImageNotFound(session_id.to_string(), filename.to_string()),
            ),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn append_evaluation(
        &self,
        session_id: &str,
        entry: &EvaluationEntry,
    ) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        let eval_dir = dir.join("evaluation");
        tokio::fs::create_dir_all(&eval_dir).await?;
        let filename = format!("eval-{}.json", entry.id);
        atomic_write_json(&eval_dir, &filename, entry).await
    }
}

fn walk_days(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Rejects path traversal and anything that is not a bare filename:
/// session ids must match `^ses-\d{6}$` and filenames must match
/// `^[A-Za-z0-9_\-.]+\.png$`.
fn validate_filename(session_id: &str, filename: &str) -> Result<(), StoreError> {
    let is_safe_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.';
    let looks_like_png = filename.ends_with(".png")
        && filename.len() > 4
        && filename.chars().all(is_safe_char);
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') || !looks_like_png
    {
        return Err(StoreError::InvalidPath {
            session: session_id.to_string(),
            reason: format!("rejected filename '{filename}'"),
        });
    }
    Ok(())
}

/// Writes to a temp file in the same directory then renames over the
/// target, so a reader never observes a half-written file.
async fn atomic_write_json<T: serde::Serialize>(
    dir: &Path,
    filename: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(dir, filename, &bytes).await
}

async fn atomic_write_bytes(dir: &Path, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp_path = dir.join(format!(".{filename}.tmp"));
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, dir.join(filename)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_doc(session_id: &str) -> MetadataDocument {
        MetadataDocument {
            session_id: session_id.to_string(),
            user_prompt: "a cat".into(),
            config: MetadataConfig {
                beam_width: 2,
                keep_top: 1,
                max_iterations: 1,
                alpha: 0.7,
                temperature: 1.0,
            },
            iterations: Vec::new(),
            winner: None,
            finalists: None,
            lineage: None,
            token_usage: None,
            estimated_cost: None,
        }
    }

    #[tokio::test]
    async fn create_get_and_append_iteration_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session_id = SessionId("ses-000001".into());
        store
            .create_session(&session_id, "2026-07-28", &sample_doc(&session_id.0))
            .await
            .unwrap();

        store
            .append_iteration(
                &session_id.0,
                IterationRecord {
                    iteration: 0,
                    candidates: vec![],
                },
            )
            .await
            .unwrap();

        let doc = store.get_metadata(&session_id.0).await.unwrap();
        assert_eq!(doc.iterations.len(), 1);
        assert_eq!(doc.iterations[0].iteration, 0);
    }

    #[tokio::test]
    async fn finalize_writes_winner_and_lineage() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session_id = SessionId("ses-000002".into());
        store
            .create_session(&session_id, "2026-07-28", &sample_doc(&session_id.0))
            .await
            .unwrap();
        store
            .finalize(
                &session_id.0,
                Some(3),
                vec![3, 1],
                vec![LineageEntry {
                    iteration: 0,
                    candidate_id: 0,
                }],
                Some(1200),
                Some(0.04),
            )
            .await
            .unwrap();
        let doc = store.get_metadata(&session_id.0).await.unwrap();
        assert_eq!(doc.winner, Some(3));
        assert_eq!(doc.finalists, Some(vec![3, 1]));
    }

    #[tokio::test]
    async fn get_image_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session_id = SessionId("ses-000003".into());
        store
            .create_session(&session_id, "2026-07-28", &sample_doc(&session_id.0))
            .await
            .unwrap();
        let err = store
            .get_image(&session_id.0, "../../../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
        let err2 = store.get_image(&session_id.0, "i0c0.jpg").await.unwrap_err();
        assert!(matches!(err2, StoreError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn get_image_reports_not_found_for_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session_id = SessionId("ses-000005".into());
        store
            .create_session(&session_id, "2026-07-28", &sample_doc(&session_id.0))
            .await
            .unwrap();
        let err = store
            .get_image(&session_id.0, "i0c0.png")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ImageNotFound(..)));
    }

    #[tokio::test]
    async fn write_and_read_image_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session_id = SessionId("ses-000004".into());
        store
            .create_session(&session_id, "2026-07-28", &sample_doc(&session_id.0))
            .await
            .unwrap();
        store
            .write_image(&session_id.0, "i0c0.png", b"fake-png-bytes")
            .await
            .unwrap();
        let bytes = store.get_image(&session_id.0, "i0c0.png").await.unwrap();
        assert_eq!(bytes, b"fake-png-bytes");
    }

    #[test]
    fn generate_session_id_disambiguates_on_collision() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let day_dir = tmp.path().join(now.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(day_dir.join("ses-120000")).unwrap();
        let id = generate_session_id(tmp.path(), now);
        assert_ne!(id.0, "ses-120000");
        assert!(id.0.starts_with("ses-120000-"));
    }
}
