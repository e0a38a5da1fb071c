//! The `metadata.json` document shape, kept distinct from the
//! orchestrator's in-memory [`beamforge_core::domain::IterationFrame`] so
//! the on-disk wire format is decoupled from working types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataConfig {
    pub beam_width: u32,
    pub keep_top: u32,
    pub max_iterations: u32,
    pub alpha: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateImage {
    pub url: Option<String>,
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRanking {
    pub rank: u32,
    pub reason: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub candidate_id: u32,
    pub parent_id: Option<u32>,
    pub what_prompt: String,
    pub how_prompt: String,
    pub combined: String,
    pub image: CandidateImage,
    pub survived: bool,
    pub ranking: Option<CandidateRanking>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iteration: u32,
    pub candidates: Vec<CandidateRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEntry {
    pub iteration: u32,
    pub candidate_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    pub session_id: String,
    pub user_prompt: String,
    pub config: MetadataConfig,
    pub iterations: Vec<IterationRecord>,
    pub winner: Option<u32>,
    pub finalists: Option<Vec<u32>>,
    pub lineage: Option<Vec<LineageEntry>>,
    pub token_usage: Option<u64>,
    pub estimated_cost: Option<f64>,
}

/// Row shape for `GET /api/jobs`, derived from a metadata
/// document rather than stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub user_prompt: String,
    pub completed: bool,
    pub winner: Option<u32>,
    pub iteration_count: usize,
}

impl From<&MetadataDocument> for SessionSummary {
    fn from(doc: &MetadataDocument) -> Self {
        SessionSummary {
            session_id: doc.session_id.clone(),
            user_prompt: doc.user_prompt.clone(),
            completed: doc.winner.is_some(),
            winner: doc.winner,
            iteration_count: doc.iterations.len(),
        }
    }
}

/// One human pairwise-comparison log entry under `evaluation/eval-*.json`
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationEntry {
    pub id: String,
    pub candidate_a_id: u32,
    pub candidate_b_id: u32,
    pub winner_id: u32,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
