//! Provider interfaces. Each is a value-in, value-out async
//! operation taking a [`Cancel`] context so callers can thread
//! cancellation through without preemption.

pub mod mock;
pub mod modal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::Cancel;
use crate::domain::Dimension;
use crate::error::ProviderError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetadata {
    pub model: String,
    pub tokens_used: u64,
}

#[derive(Debug, Clone)]
pub struct RefineOptions {
    pub dimension: Dimension,
    pub temperature: f64,
    pub operation: String,
    pub iteration: Option<u32>,
    pub candidate_id: Option<u32>,
    pub parent_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefinedPrompt {
    pub refined_prompt: String,
    pub metadata: CallMetadata,
}

#[derive(Debug, Clone)]
pub struct CombinedPrompt {
    pub combined: String,
    pub metadata: CallMetadata,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn refine_prompt(
        &self,
        prompt: &str,
        options: RefineOptions,
        cancel: &Cancel,
    ) -> Result<RefinedPrompt, ProviderError>;

    async fn combine_prompts(
        &self,
        what: &str,
        how: &str,
        cancel: &Cancel,
    ) -> Result<CombinedPrompt, ProviderError>;
}

#[derive(Debug, Clone, Default)]
pub struct ImageGenOptions {
    pub size: Option<String>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
    pub input_image: Option<String>,
    pub denoise_strength: Option<f64>,
    pub iteration: u32,
    pub candidate_id: u32,
    pub session_id: String,
    pub output_dir: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub local_path: Option<String>,
    pub model: String,
    pub size: Option<String>,
    pub seed: Option<u64>,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_image(
        &self,
        prompt: &str,
        options: ImageGenOptions,
        cancel: &Cancel,
    ) -> Result<GeneratedImage, ProviderError>;
}

#[derive(Debug, Clone, Default)]
pub struct VisionOptions {
    pub focus_areas: Vec<String>,
    pub iteration: u32,
    pub candidate_id: u32,
}

#[derive(Debug, Clone)]
pub struct VisionAnalysis {
    pub analysis: String,
    pub alignment_score: f64,
    pub caption: Option<String>,
    pub metadata: CallMetadata,
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn analyze_image(
        &self,
        image_ref: &str,
        prompt: &str,
        options: VisionOptions,
        cancel: &Cancel,
    ) -> Result<VisionAnalysis, ProviderError>;

    /// Derives an aesthetic score (0..10) for the same image, optionally
    /// reusing the analysis/caption already produced. May reuse the
    /// vision provider's caption heuristics or call out to a dedicated
    /// aesthetic model — either way, this is that call.
    async fn aesthetic_score(
        &self,
        image_ref: &str,
        caption: Option<&str>,
        cancel: &Cancel,
    ) -> Result<f64, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct CritiqueResult {
    pub suggested_what: Option<String>,
    pub suggested_how: Option<String>,
    pub rationale: String,
    pub metadata: CallMetadata,
}

#[async_trait]
pub trait CritiqueGenerator: Send + Sync {
    async fn critique(
        &self,
        candidate_combined_prompt: &str,
        previous_ranking_reason: Option<&str>,
        previous_ranking_weaknesses: &[String],
        cancel: &Cancel,
    ) -> Result<CritiqueResult, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub candidate_id: u32,
    pub rank: u32,
    pub reason: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[async_trait]
pub trait Ranker: Send + Sync {
    async fn rank(
        &self,
        candidates: &[(u32, String, f64)],
        cancel: &Cancel,
    ) -> Result<Vec<RankedEntry>, ProviderError>;
}

/// Bundles every provider a job needs, built once per job by the worker
/// and handed to the orchestrator.
pub struct ProviderSet {
    pub llm: Box<dyn LlmProvider>,
    pub image: Box<dyn ImageProvider>,
    pub vision: Box<dyn VisionProvider>,
    pub critique: Box<dyn CritiqueGenerator>,
    pub ranker: Box<dyn Ranker>,
}

/// Builds a `ProviderSet` using the hosted Modal image backend when
/// `MODAL_ENDPOINT_URL`/`MODAL_TOKEN_ID`/`MODAL_TOKEN_SECRET` are all set,
/// falling back to `None` (callers default to the mock set) otherwise.
/// The LLM/vision/critique/ranker legs stay mocked either way until a real
/// backend is wired in — only the image leg has two implementations today.
pub fn providers_from_env() -> Option<ProviderSet> {
    let image = modal::ModalImageProvider::from_env()?;
    Some(ProviderSet {
        llm: Box::new(mock::MockLlm::default()),
        image: Box::new(image),
        vision: Box::new(mock::MockVision::default()),
        critique: Box::new(mock::MockCritique),
        ranker: Box::new(mock::MockRanker),
    })
}
