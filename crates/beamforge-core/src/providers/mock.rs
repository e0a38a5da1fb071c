//! Deterministic mock providers. Used by the orchestrator's own tests and
//! as the default `ProviderSet` when no real model backend is configured
//!.

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Mutex;

use super::{
    CallMetadata, CombinedPrompt, CritiqueGenerator, CritiqueResult, GeneratedImage,
    ImageGenOptions, ImageProvider, LlmProvider, RankedEntry, Ranker, RefineOptions,
    RefinedPrompt, VisionAnalysis, VisionOptions, VisionProvider,
};
use crate::cancel::Cancel;
use crate::domain::Dimension;
use crate::error::ProviderError;

/// A seeded RNG wrapped for interior mutability so trait methods can stay
/// `&self` (the orchestrator holds providers behind a shared `ProviderSet`).
pub struct MockLlm {
    rng: Mutex<StdRng>,
}

impl MockLlm {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new(42)
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn refine_prompt(
        &self,
        prompt: &str,
        options: RefineOptions,
        cancel: &Cancel,
    ) -> Result<RefinedPrompt, ProviderError> {
        cancel.check()?;
        let suffix = match options.dimension {
            Dimension::What => "with richer subject detail",
            Dimension::How => "in a distinctive visual style",
        };
        let refined_prompt = match &options.parent_prompt {
            Some(parent) => format!("{parent}, {suffix}"),
            None => format!("{prompt}, {suffix}"),
        };
        Ok(RefinedPrompt {
            refined_prompt,
            metadata: CallMetadata {
                model: "mock-llm".into(),
                tokens_used: 64,
            },
        })
    }

    async fn combine_prompts(
        &self,
        what: &str,
        how: &str,
        cancel: &Cancel,
    ) -> Result<CombinedPrompt, ProviderError> {
        cancel.check()?;
        Ok(CombinedPrompt {
            combined: format!("{what} — {how}"),
            metadata: CallMetadata {
                model: "mock-llm".into(),
                tokens_used: 16,
            },
        })
    }
}

#[derive(Default)]
pub struct MockImageProvider;

#[async_trait]
impl ImageProvider for MockImageProvider {
    async fn generate_image(
        &self,
        _prompt: &str,
        options: ImageGenOptions,
        cancel: &Cancel,
    ) -> Result<GeneratedImage, ProviderError> {
        cancel.check()?;
        let filename = format!("i{}c{}.png", options.iteration, options.candidate_id);
        let local_path = format!("{}/images/{}", options.output_dir, filename);
        Ok(GeneratedImage {
            url: Some(format!("/api/images/{}/{}", options.session_id, filename)),
            local_path: Some(local_path),
            model: "mock-image-gen".into(),
            size: options.size,
            seed: options.seed,
        })
    }
}

pub struct MockVision {
    rng: Mutex<StdRng>,
}

impl MockVision {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for MockVision {
    fn default() -> Self {
        Self::new(7)
    }
}

#[async_trait]
impl VisionProvider for MockVision {
    async fn analyze_image(
        &self,
        _image_ref: &str,
        prompt: &str,
        _options: VisionOptions,
        cancel: &Cancel,
    ) -> Result<VisionAnalysis, ProviderError> {
        cancel.check()?;
        let alignment_score = {
            let mut rng = self.rng.lock().expect("mock rng poisoned");
            rng.gen_range(55.0..98.0)
        };
        Ok(VisionAnalysis {
            analysis: format!("image plausibly matches '{prompt}'"),
            alignment_score,
            caption: Some("a generated scene".into()),
            metadata: CallMetadata {
                model: "mock-vlm".into(),
                tokens_used: 48,
            },
        })
    }

    async fn aesthetic_score(
        &self,
        _image_ref: &str,
        _caption: Option<&str>,
        cancel: &Cancel,
    ) -> Result<f64, ProviderError> {
        cancel.check()?;
        let mut rng = self.rng.lock().expect("mock rng poisoned");
        Ok(rng.gen_range(4.0..9.5))
    }
}

#[derive(Default)]
pub struct MockCritique;

#[async_trait]
impl CritiqueGenerator for MockCritique {
    async fn critique(
        &self,
        _candidate_combined_prompt: &str,
        previous_ranking_reason: Option<&str>,
        previous_ranking_weaknesses: &[String],
        cancel: &Cancel,
    ) -> Result<CritiqueResult, ProviderError> {
        cancel.check()?;
        let rationale = match previous_ranking_reason {
            Some(reason) => format!("building on: {reason}"),
            None => "no prior ranking available".into(),
        };
        let suggested_how = previous_ranking_weaknesses
            .first()
            .map(|w| format!("address weakness: {w}"));
        Ok(CritiqueResult {
            suggested_what: None,
            suggested_how,
            rationale,
            metadata: CallMetadata {
                model: "mock-critique".into(),
                tokens_used: 32,
            },
        })
    }
}

#[derive(Default)]
pub struct MockRanker;

#[async_trait]
impl Ranker for MockRanker {
    async fn rank(
        &self,
        candidates: &[(u32, String, f64)],
        cancel: &Cancel,
    ) -> Result<Vec<RankedEntry>, ProviderError> {
        cancel.check()?;
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        Ok(sorted
            .into_iter()
            .enumerate()
            .map(|(idx, (candidate_id, _combined, score))| RankedEntry {
                candidate_id,
                rank: (idx + 1) as u32,
                reason: format!("total score {score:.1}"),
                strengths: vec!["coherent composition".into()],
                weaknesses: if idx == 0 {
                    vec![]
                } else {
                    vec!["lower alignment than the leader".into()]
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_refines_with_dimension_suffix() {
        let llm = MockLlm::default();
        let cancel = Cancel::new();
        let out = llm
            .refine_prompt(
                "a cat",
                RefineOptions {
                    dimension: Dimension::What,
                    temperature: 1.0,
                    operation: "seed".into(),
                    iteration: Some(0),
                    candidate_id: Some(0),
                    parent_prompt: None,
                },
                &cancel,
            )
            .await
            .unwrap();
        assert!(out.refined_prompt.starts_with("a cat"));
    }

    #[tokio::test]
    async fn mock_vision_alignment_score_in_range() {
        let vision = MockVision::default();
        let cancel = Cancel::new();
        let out = vision
            .analyze_image("img", "a cat", VisionOptions::default(), &cancel)
            .await
            .unwrap();
        assert!(out.alignment_score >= 0.0 && out.alignment_score <= 100.0);
    }

    #[tokio::test]
    async fn mock_ranker_orders_descending_by_score() {
        let ranker = MockRanker;
        let cancel = Cancel::new();
        let ranked = ranker
            .rank(
                &[(0, "a".into(), 40.0), (1, "b".into(), 90.0)],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(ranked[0].candidate_id, 1);
        assert_eq!(ranked[0].rank, 1);
    }
}
