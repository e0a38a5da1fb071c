//! Progress message wire format: a tagged variant over the
//! nine message types, one struct per `type`, so handling downstream is
//! exhaustive instead of dynamic-string-keyed. Each message carries enough
//! data that a late subscriber reconstructing UI state can do so from the
//! sequence alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Params;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    pub params: Params,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPayload {
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub iteration: u32,
    pub candidate_id: u32,
    pub image_url: Option<String>,
    pub what_prompt: String,
    pub how_prompt: String,
    pub combined: String,
    pub score: Option<f64>,
    pub parent_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPayload {
    pub iteration: u32,
    pub candidate_id: u32,
    pub rank: u32,
    pub reason: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationPayload {
    pub iteration: u32,
    pub total_iterations: u32,
    pub candidates_count: u32,
    pub best_score: f64,
    pub token_usage: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestCandidate {
    pub what: String,
    pub how: String,
    pub combined: String,
    pub total_score: f64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResult {
    pub best_candidate: BestCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub result: CompleteResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: String,
    pub details: Option<String>,
}

/// One message on a job's progress stream.
/// `timestamp` is monotonically increasing within a job — enforced by
/// [`ProgressMessage::new_started`] et al. taking the clock at construction,
/// never left for a caller to backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressMessage {
    Started {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: StartedPayload,
    },
    Operation {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: OperationPayload,
    },
    Step {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: StepPayload,
    },
    Candidate {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: CandidatePayload,
    },
    Ranked {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: RankedPayload,
    },
    Iteration {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: IterationPayload,
    },
    Complete {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: CompletePayload,
    },
    Error {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        payload: ErrorPayload,
    },
    Cancelled {
        timestamp: DateTime<Utc>,
    },
}

impl ProgressMessage {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProgressMessage::Started { timestamp, .. }
            | ProgressMessage::Operation { timestamp, .. }
            | ProgressMessage::Step { timestamp, .. }
            | ProgressMessage::Candidate { timestamp, .. }
            | ProgressMessage::Ranked { timestamp, .. }
            | ProgressMessage::Iteration { timestamp, .. }
            | ProgressMessage::Complete { timestamp, .. }
            | ProgressMessage::Error { timestamp, .. }
            | ProgressMessage::Cancelled { timestamp } => *timestamp,
        }
    }

    pub fn started(params: Params) -> Self {
        ProgressMessage::Started {
            timestamp: Utc::now(),
            payload: StartedPayload { params },
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        ProgressMessage::Operation {
            timestamp: Utc::now(),
            payload: OperationPayload {
                message: message.into(),
            },
        }
    }

    pub fn step(phase: impl Into<String>) -> Self {
        ProgressMessage::Step {
            timestamp: Utc::now(),
            payload: StepPayload {
                phase: phase.into(),
            },
        }
    }

    pub fn candidate(payload: CandidatePayload) -> Self {
        ProgressMessage::Candidate {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn ranked(payload: RankedPayload) -> Self {
        ProgressMessage::Ranked {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn iteration(payload: IterationPayload) -> Self {
        ProgressMessage::Iteration {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn complete(best_candidate: BestCandidate) -> Self {
        ProgressMessage::Complete {
            timestamp: Utc::now(),
            payload: CompletePayload {
                result: CompleteResult { best_candidate },
            },
        }
    }

    pub fn error(error: impl Into<String>, details: Option<String>) -> Self {
        ProgressMessage::Error {
            timestamp: Utc::now(),
            payload: ErrorPayload {
                error: error.into(),
                details,
            },
        }
    }

    pub fn cancelled() -> Self {
        ProgressMessage::Cancelled {
            timestamp: Utc::now(),
        }
    }

    /// Short discriminant used for ordering assertions in tests, matching
    /// the wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressMessage::Started { .. } => "started",
            ProgressMessage::Operation { .. } => "operation",
            ProgressMessage::Step { .. } => "step",
            ProgressMessage::Candidate { .. } => "candidate",
            ProgressMessage::Ranked { .. } => "ranked",
            ProgressMessage::Iteration { .. } => "iteration",
            ProgressMessage::Complete { .. } => "complete",
            ProgressMessage::Error { .. } => "error",
            ProgressMessage::Cancelled { .. } => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_wire_tag() {
        let msg = ProgressMessage::cancelled();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "cancelled");
        assert_eq!(msg.kind(), "cancelled");
    }

    #[test]
    fn candidate_round_trips_through_json() {
        let msg = ProgressMessage::candidate(CandidatePayload {
            iteration: 0,
            candidate_id: 1,
            image_url: Some("/api/images/ses-000000/i0c1.png".into()),
            what_prompt: "a cat".into(),
            how_prompt: "oil painting".into(),
            combined: "a cat, oil painting".into(),
            score: Some(80.0),
            parent_id: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: ProgressMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "candidate");
    }
}
