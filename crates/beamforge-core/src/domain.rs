//! Core data model: candidates, iteration frames, jobs, params, and the
//! progress message wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Identifies a candidate within a job: `i{iteration}c{candidate_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateKey {
    pub iteration: u32,
    pub candidate_id: u32,
}

impl CandidateKey {
    pub fn new(iteration: u32, candidate_id: u32) -> Self {
        Self {
            iteration,
            candidate_id,
        }
    }

    pub fn render(&self) -> String {
        format!("i{}c{}", self.iteration, self.candidate_id)
    }
}

impl std::fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Human-facing ranking attached to a scored candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranking {
    pub rank: u32,
    pub reason: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

/// Where a rendered candidate image lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: Option<String>,
    pub local_path: Option<String>,
}

/// One (prompt, image, scores) tuple produced within an iteration.
///
/// Invariant: `total_score == round(alpha*alignment + (1-alpha)*aesthetic*10)`
/// within 1e-6 — enforced by [`Candidate::set_scores`], never by a public
/// field setter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub key: CandidateKey,
    pub parent_id: Option<CandidateKey>,
    pub what_prompt: String,
    pub how_prompt: String,
    pub combined: String,
    pub image: ImageRef,
    pub alignment_score: Option<f64>,
    pub aesthetic_score: Option<f64>,
    pub total_score: Option<f64>,
    pub ranking: Option<Ranking>,
    pub timestamp: DateTime<Utc>,
    /// Set when a permanent provider failure prevented scoring; the
    /// candidate still occupies a slot in the iteration frame but is
    /// excluded from top-m selection.
    pub failed: Option<String>,
}

impl Candidate {
    pub fn new(
        key: CandidateKey,
        parent_id: Option<CandidateKey>,
        what_prompt: String,
        how_prompt: String,
        combined: String,
    ) -> Self {
        Self {
            key,
            parent_id,
            what_prompt,
            how_prompt,
            combined,
            image: ImageRef::default(),
            alignment_score: None,
            aesthetic_score: None,
            total_score: None,
            ranking: None,
            timestamp: Utc::now(),
            failed: None,
        }
    }

    /// Computes and stores `total_score` from alignment (0..100) and
    /// aesthetic (0..10) under the given alpha weight (0..1).
    pub fn set_scores(&mut self, alignment: f64, aesthetic: f64, alpha: f64) {
        let total = (alpha * alignment + (1.0 - alpha) * aesthetic * 10.0).round();
        self.alignment_score = Some(alignment);
        self.aesthetic_score = Some(aesthetic);
        self.total_score = Some(total);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failed = Some(reason.into());
    }

    pub fn has_valid_score(&self) -> bool {
        self.failed.is_none() && self.total_score.is_some()
    }
}

/// One round of expand -> render -> score -> prune.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationFrame {
    pub iteration: u32,
    pub candidates: Vec<Candidate>,
    pub top_candidates: Vec<CandidateKey>,
}

impl IterationFrame {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            candidates: Vec::new(),
            top_candidates: Vec::new(),
        }
    }

    /// Selects the top `m` candidates by `total_score`, ties broken by
    /// lower `candidate_id`. Candidates without a valid score never survive.
    pub fn select_top(&mut self, m: usize) {
        let mut scored: Vec<&Candidate> = self
            .candidates
            .iter()
            .filter(|c| c.has_valid_score())
            .collect();
        scored.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.candidate_id.cmp(&b.key.candidate_id))
        });
        let keep = m.min(scored.len());
        self.top_candidates = scored[..keep].iter().map(|c| c.key).collect();
    }

    pub fn survivors(&self) -> HashSet<CandidateKey> {
        self.top_candidates.iter().copied().collect()
    }

    pub fn candidate(&self, key: CandidateKey) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.key == key)
    }
}

/// Job lifecycle status. Transitions only flow pending -> running ->
/// {completed, failed, cancelled}; terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether transitioning from `self` to `next` is legal.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Completed | Failed | Cancelled) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// Beam-search run parameters, validated at the HTTP boundary before a
/// job is ever constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    pub prompt: String,
    pub n: u32,
    pub m: u32,
    pub iterations: u32,
    pub alpha: f64,
    pub temperature: f64,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("n must be between 2 and 8, got {0}")]
    NOutOfRange(u32),
    #[error("m must be between 1 and n/2, got m={m} for n={n}")]
    MOutOfRange { n: u32, m: u32 },
    #[error("n must be divisible by m: n={n}, m={m}")]
    NotDivisible { n: u32, m: u32 },
    #[error("iterations must be between 1 and 5, got {0}")]
    IterationsOutOfRange(u32),
    #[error("alpha must be between 0 and 1, got {0}")]
    AlphaOutOfRange(f64),
    #[error("temperature must be between 0 and 2, got {0}")]
    TemperatureOutOfRange(f64),
}

impl Params {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.prompt.trim().is_empty() {
            return Err(ParamsError::EmptyPrompt);
        }
        if !(2..=8).contains(&self.n) {
            return Err(ParamsError::NOutOfRange(self.n));
        }
        if self.m < 1 {
            return Err(ParamsError::MOutOfRange {
                n: self.n,
                m: self.m,
            });
        }
        if self.n % self.m != 0 {
            return Err(ParamsError::NotDivisible {
                n: self.n,
                m: self.m,
            });
        }
        if self.m > self.n / 2 {
            return Err(ParamsError::MOutOfRange {
                n: self.n,
                m: self.m,
            });
        }
        if !(1..=5).contains(&self.iterations) {
            return Err(ParamsError::IterationsOutOfRange(self.iterations));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ParamsError::AlphaOutOfRange(self.alpha));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ParamsError::TemperatureOutOfRange(self.temperature));
        }
        Ok(())
    }
}

/// Best candidate + runner-up surfaced on job completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub winner: CandidateKey,
    pub finalists: Vec<CandidateKey>,
    pub lineage: Vec<CandidateKey>,
    pub comparative_explanation: Option<String>,
}

/// `ses-HHMMSS`, six digits derived from the start time plus a short
/// disambiguating suffix on same-second collisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate(now: DateTime<Utc>, disambiguator: Option<&str>) -> Self {
        let base = now.format("ses-%H%M%S").to_string();
        match disambiguator {
            Some(suffix) => SessionId(format!("{base}-{suffix}")),
            None => SessionId(base),
        }
    }

    pub fn is_well_formed(s: &str) -> bool {
        let re_ok = |s: &str| {
            s.starts_with("ses-")
                && s.len() >= "ses-000000".len()
                && s["ses-".len().."ses-".len() + 6]
                    .chars()
                    .all(|c| c.is_ascii_digit())
        };
        re_ok(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-memory job record owned by the job manager (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub session_id: SessionId,
    pub params: Params,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub session_path: String,
    pub error: Option<String>,
}

impl Job {
    pub fn new(job_id: Uuid, session_id: SessionId, params: Params, session_path: String) -> Self {
        Self {
            job_id,
            session_id,
            params,
            status: JobStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            session_path,
            error: None,
        }
    }

    /// Applies a status transition, returning `false` (no-op) if the
    /// transition is illegal or the job is already in a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }
}

/// One call's tokens/cost entry, recorded by the meter (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub provider: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub metadata: TokenUsageMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageMetadata {
    pub iteration: Option<u32>,
    pub candidate_id: Option<u32>,
    pub model: Option<String>,
    pub dimension: Option<Dimension>,
}

/// The content dimension vs. the style dimension of a prompt expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    What,
    How,
}

impl Dimension {
    /// Alternates between generations, starting at `What` for generation 0.
    pub fn for_generation(generation: u32) -> Self {
        if generation % 2 == 0 {
            Dimension::What
        } else {
            Dimension::How
        }
    }
}

/// One of the four external model processes the supervisor (C6) manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    Llm,
    Flux,
    Vision,
    Vlm,
}

impl ServiceName {
    pub const ALL: [ServiceName; 4] = [
        ServiceName::Llm,
        ServiceName::Flux,
        ServiceName::Vision,
        ServiceName::Vlm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceName::Llm => "llm",
            ServiceName::Flux => "flux",
            ServiceName::Vision => "vision",
            ServiceName::Vlm => "vlm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm" => Some(ServiceName::Llm),
            "flux" => Some(ServiceName::Flux),
            "vision" => Some(ServiceName::Vision),
            "vlm" => Some(ServiceName::Vlm),
            _ => None,
        }
    }

    /// Default port, overridable via the `{SERVICE}_PORT` env var.
    pub fn default_port(self) -> u16 {
        match self {
            ServiceName::Flux => 8001,
            ServiceName::Vision => 8002,
            ServiceName::Llm => 8003,
            ServiceName::Vlm => 8004,
        }
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `{ name, port, pid?, lastHealthy?, shouldBeRunning, stopLockUntil? }`
///. pid and port are persisted to disk so a freshly started
/// runtime discovers services left running by a prior runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: ServiceName,
    pub port: u16,
    pub pid: Option<u32>,
    pub last_healthy: Option<DateTime<Utc>>,
    pub should_be_running: bool,
    pub stop_lock_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn candidate_key_renders_as_spec_format() {
        assert_eq!(CandidateKey::new(2, 5).render(), "i2c5");
    }

    #[test]
    fn total_score_matches_alpha_formula() {
        let mut c = Candidate::new(CandidateKey::new(0, 0), None, "a".into(), "b".into(), "c".into());
        c.set_scores(80.0, 7.0, 0.7);
        // 0.7*80 + 0.3*70 = 56 + 21 = 77
        assert_eq!(c.total_score, Some(77.0));
    }

    #[test]
    fn select_top_breaks_ties_by_lower_candidate_id() {
        let mut frame = IterationFrame::new(0);
        for id in 0..4u32 {
            let mut c = Candidate::new(CandidateKey::new(0, id), None, "".into(), "".into(), "".into());
            c.set_scores(50.0, 5.0, 0.5); // identical score for all
            frame.candidates.push(c);
        }
        frame.select_top(2);
        assert_eq!(
            frame.top_candidates,
            vec![CandidateKey::new(0, 0), CandidateKey::new(0, 1)]
        );
    }

    #[test]
    fn job_status_transitions_are_sticky_once_terminal() {
        let mut job = Job::new(
            Uuid::nil(),
            SessionId("ses-000000".into()),
            Params {
                prompt: "x".into(),
                n: 2,
                m: 1,
                iterations: 1,
                alpha: 0.5,
                temperature: 0.5,
                steps: None,
                guidance: None,
                seed: None,
            },
            "path".into(),
        );
        assert!(job.transition(JobStatus::Running));
        assert!(job.transition(JobStatus::Completed));
        // terminal: further transitions rejected
        assert!(!job.transition(JobStatus::Failed));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn params_validate_rejects_non_divisible_n_m() {
        let p = Params {
            prompt: "x".into(),
            n: 4,
            m: 3,
            iterations: 1,
            alpha: 0.5,
            temperature: 0.5,
            steps: None,
            guidance: None,
            seed: None,
        };
        assert_eq!(
            p.validate(),
            Err(ParamsError::NotDivisible { n: 4, m: 3 })
        );
    }

    #[test]
    fn params_validate_rejects_empty_prompt() {
        let p = Params {
            prompt: "".into(),
            n: 2,
            m: 1,
            iterations: 1,
            alpha: 0.5,
            temperature: 0.5,
            steps: None,
            guidance: None,
            seed: None,
        };
        assert_eq!(p.validate(), Err(ParamsError::EmptyPrompt));
    }

    proptest! {
        #[test]
        fn total_score_is_always_between_zero_and_hundred(
            alignment in 0.0f64..=100.0,
            aesthetic in 0.0f64..=10.0,
            alpha in 0.0f64..=1.0,
        ) {
            let mut c = Candidate::new(CandidateKey::new(0, 0), None, "".into(), "".into(), "".into());
            c.set_scores(alignment, aesthetic, alpha);
            let total = c.total_score.unwrap();
            prop_assert!(total >= -1.0 && total <= 101.0);
        }

        #[test]
        fn valid_params_always_pass_validate(
            n in 2u32..=8,
            iterations in 1u32..=5,
            alpha in 0.0f64..=1.0,
            temperature in 0.0f64..=2.0,
        ) {
            // m is the largest divisor of n that is <= n/2, or n itself when n == 2.
            let m = if n == 2 { 1 } else {
                (1..=n / 2).rev().find(|m| n % m == 0).unwrap_or(1)
            };
            let p = Params {
                prompt: "a prompt".into(),
                n,
                m,
                iterations,
                alpha,
                temperature,
                steps: None,
                guidance: None,
                seed: None,
            };
            prop_assert!(p.validate().is_ok());
        }
    }
}
