//! Beam-search orchestrator: the iteration state machine and
//! candidate lifecycle. Drives iteration 0 (seed) then iterations
//! 1..N-1 (critique-driven refinement), enforcing per-candidate
//! invariants and a strict progress emission order.

use std::sync::Arc;

use beamforge_bus::{JobId, ProgressBus};
use beamforge_core::cancel::Cancel;
use beamforge_core::domain::{Candidate, CandidateKey, Dimension, IterationFrame, Params};
use beamforge_core::error::ProviderError;
use beamforge_core::progress::{BestCandidate, CandidatePayload, IterationPayload, ProgressMessage, RankedPayload};
use beamforge_core::providers::{ImageGenOptions, ProviderSet, RefineOptions, VisionOptions};
use beamforge_core::retry::retry_with_backoff;
use beamforge_gpu::GpuCoordinator;
use beamforge_meter::{Meter, PricingTable, RecordArgs};
use beamforge_store::{
    CandidateImage, CandidateRanking, CandidateRecord, IterationRecord, LineageEntry, SessionStore,
};
use futures::future::join_all;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("gpu error: {0}")]
    Gpu(#[from] beamforge_gpu::GpuError),
    #[error("store error: {0}")]
    Store(#[from] beamforge_store::StoreError),
    #[error("job was cancelled")]
    Cancelled,
    #[error("iteration {iteration} produced only {survived} valid candidates, needed {required}")]
    IterationFailed {
        iteration: u32,
        survived: usize,
        required: u32,
    },
}

/// Everything the orchestrator needs for one job run.
pub struct OrchestratorContext {
    pub job_id: JobId,
    pub session_id: String,
    pub output_dir: String,
    pub params: Params,
    pub providers: ProviderSet,
    pub bus: ProgressBus,
    pub store: Arc<SessionStore>,
    pub meter: Meter,
    pub gpu: Arc<GpuCoordinator>,
    pub cancel: Cancel,
}

pub struct Orchestrator {
    ctx: OrchestratorContext,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self { ctx }
    }

    async fn publish(&self, message: ProgressMessage) {
        self.ctx.bus.publish(self.ctx.job_id, message).await;
    }

    fn check_cancel(&self) -> Result<(), OrchestratorError> {
        self.ctx
            .cancel
            .check()
            .map_err(|_| OrchestratorError::Cancelled)
    }

    /// Runs the full beam search to completion, returning the winner,
    /// finalists, and lineage.
    pub async fn run(self) -> Result<beamforge_core::domain::JobResult, OrchestratorError> {
        self.publish(ProgressMessage::started(self.ctx.params.clone()))
            .await;

        let mut frames: Vec<IterationFrame> = Vec::new();

        let seed = match self.run_iteration_zero().await {
            Ok(frame) => frame,
            Err(e) => {
                self.fail_job(&e).await;
                return Err(e);
            }
        };
        frames.push(seed);

        for iteration in 1..self.ctx.params.iterations {
            if let Err(e) = self.check_cancel() {
                self.publish(ProgressMessage::cancelled()).await;
                return Err(e);
            }
            let parent_frame = frames.last().expect("seed frame always present");
            let frame = match self.run_refinement_iteration(iteration, parent_frame).await {
                Ok(frame) => frame,
                Err(e) => {
                    self.fail_job(&e).await;
                    return Err(e);
                }
            };
            frames.push(frame);
        }

        self.finish(frames).await
    }

    async fn fail_job(&self, error: &OrchestratorError) {
        match error {
            OrchestratorError::Cancelled => self.publish(ProgressMessage::cancelled()).await,
            other => {
                self.publish(ProgressMessage::error(other.to_string(), None))
                    .await
            }
        }
    }

    /// Iteration 0 (seed generation): `n` independent expansions of the
    /// user prompt, each doing both WHAT and HOW dimensions before being
    /// combined.
    async fn run_iteration_zero(&self) -> Result<IterationFrame, OrchestratorError> {
        let n = self.ctx.params.n;

        let candidates = join_all((0..n).map(|candidate_id| {
            self.generate_candidate(0, candidate_id, None)
        }))
        .await;

        self.finish_iteration(0, candidates).await
    }

    /// Iterations 1..N-1: each surviving parent generates `n/m` children
    /// derived from a critique-driven refinement of that parent.
    async fn run_refinement_iteration(
        &self,
        iteration: u32,
        parent_frame: &IterationFrame,
    ) -> Result<IterationFrame, OrchestratorError> {
        let children_per_parent = self.ctx.params.n / self.ctx.params.m;

        let mut futures = Vec::new();
        let mut next_id = 0u32;
        for &parent_key in &parent_frame.top_candidates {
            let parent = parent_frame
                .candidate(parent_key)
                .expect("top_candidates keys always resolve within their own frame");
            for _ in 0..children_per_parent {
                let candidate_id = next_id;
                next_id += 1;
                futures.push(self.generate_candidate(iteration, candidate_id, Some(parent)));
            }
        }

        let candidates = join_all(futures).await;
        self.finish_iteration(iteration, candidates).await
    }

    async fn finish_iteration(
        &self,
        iteration: u32,
        candidates: Vec<Candidate>,
    ) -> Result<IterationFrame, OrchestratorError> {
        self.check_cancel()?;

        let mut frame = IterationFrame::new(iteration);
        frame.candidates = candidates;

        let survived = frame.candidates.iter().filter(|c| c.has_valid_score()).count();
        if survived < self.ctx.params.m as usize {
            return Err(OrchestratorError::IterationFailed {
                iteration,
                survived,
                required: self.ctx.params.m,
            });
        }

        // `ranked` messages for iteration i follow all `candidate`
        // messages of iteration i.
        let rankable: Vec<(u32, String, f64)> = frame
            .candidates
            .iter()
            .filter(|c| c.has_valid_score())
            .map(|c| (c.key.candidate_id, c.combined.clone(), c.total_score.unwrap_or(0.0)))
            .collect();
        let ranked = self
            .ctx
            .providers
            .ranker
            .rank(&rankable, &self.ctx.cancel)
            .await?;
        for entry in &ranked {
            self.publish(ProgressMessage::ranked(RankedPayload {
                iteration,
                candidate_id: entry.candidate_id,
                rank: entry.rank,
                reason: entry.reason.clone(),
                strengths: entry.strengths.clone(),
                weaknesses: entry.weaknesses.clone(),
            }))
            .await;
            if let Some(candidate) = frame
                .candidates
                .iter_mut()
                .find(|c| c.key.candidate_id == entry.candidate_id)
            {
                candidate.ranking = Some(beamforge_core::domain::Ranking {
                    rank: entry.rank,
                    reason: entry.reason.clone(),
                    strengths: entry.strengths.clone(),
                    weaknesses: entry.weaknesses.clone(),
                });
            }
        }

        frame.select_top(self.ctx.params.m as usize);

        let stats = self.ctx.meter.stats().await;
        let pricing = PricingTable::default_table();
        let cost = self.ctx.meter.estimated_cost(&pricing).await;
        let best_score = frame
            .candidates
            .iter()
            .filter_map(|c| c.total_score)
            .fold(0.0_f64, f64::max);
        self.publish(ProgressMessage::iteration(IterationPayload {
            iteration,
            total_iterations: self.ctx.params.iterations,
            candidates_count: frame.candidates.len() as u32,
            best_score,
            token_usage: stats.total_tokens,
            estimated_cost: cost.total,
        }))
        .await;

        let survivors = frame.survivors();
        let record = IterationRecord {
            iteration,
            candidates: frame
                .candidates
                .iter()
                .map(|c| CandidateRecord {
                    candidate_id: c.key.candidate_id,
                    parent_id: c.parent_id.map(|p| p.candidate_id),
                    what_prompt: c.what_prompt.clone(),
                    how_prompt: c.how_prompt.clone(),
                    combined: c.combined.clone(),
                    image: CandidateImage {
                        url: c.image.url.clone(),
                        local_path: c.image.local_path.clone(),
                    },
                    survived: survivors.contains(&c.key),
                    ranking: c.ranking.as_ref().map(|r| CandidateRanking {
                        rank: r.rank,
                        reason: r.reason.clone(),
                        strengths: r.strengths.clone(),
                        weaknesses: r.weaknesses.clone(),
                    }),
                })
                .collect(),
        };
        self.ctx.store.append_iteration(&self.ctx.session_id, record).await?;

        Ok(frame)
    }

    /// Produces one candidate end to end: refine -> combine -> render ->
    /// analyze -> score, emitting its `candidate`
    /// event (step 5, part 1 — `ranked` is emitted after the whole
    /// iteration is scored, by [`Orchestrator::finish_iteration`]).
    async fn generate_candidate(
        &self,
        iteration: u32,
        candidate_id: u32,
        parent: Option<&Candidate>,
    ) -> Candidate {
        let key = CandidateKey::new(iteration, candidate_id);
        match self.try_generate_candidate(key, parent).await {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!(%key, error = %e, "candidate permanently failed");
                let mut candidate = Candidate::new(
                    key,
                    parent.map(|p| p.key),
                    String::new(),
                    String::new(),
                    String::new(),
                );
                candidate.mark_failed(e.to_string());
                candidate
            }
        }
    }

    /// Refines both prompt dimensions for one candidate,
    /// steering a refinement candidate's WHAT/HOW seed prompts with the
    /// parent's critique when one is available.
    async fn try_generate_candidate(
        &self,
        key: CandidateKey,
        parent: Option<&Candidate>,
    ) -> Result<Candidate, OrchestratorError> {
        self.check_cancel()?;
        let base_prompt = &self.ctx.params.prompt;

        let mut what_seed = parent.map(|p| p.combined.clone());
        let mut how_seed = parent.map(|p| p.combined.clone());
        if let Some(parent) = parent {
            if let Some(ranking) = &parent.ranking {
                let critique = retry_with_backoff(&self.ctx.cancel, || {
                    self.ctx.providers.critique.critique(
                        &parent.combined,
                        Some(&ranking.reason),
                        &ranking.weaknesses,
                        &self.ctx.cancel,
                    )
                })
                .await?;
                if critique.suggested_what.is_some() {
                    what_seed = critique.suggested_what;
                }
                if critique.suggested_how.is_some() {
                    how_seed = critique.suggested_how;
                }
            }
        }

        let what = retry_with_backoff(&self.ctx.cancel, || {
            self.ctx.providers.llm.refine_prompt(
                base_prompt,
                RefineOptions {
                    dimension: Dimension::What,
                    temperature: self.ctx.params.temperature,
                    operation: "expand".into(),
                    iteration: Some(key.iteration),
                    candidate_id: Some(key.candidate_id),
                    parent_prompt: what_seed.clone(),
                },
                &self.ctx.cancel,
            )
        })
        .await?;
        self.record_llm_usage("refine_what", key, Some(Dimension::What), &what.metadata)
            .await;

        let how = retry_with_backoff(&self.ctx.cancel, || {
            self.ctx.providers.llm.refine_prompt(
                base_prompt,
                RefineOptions {
                    dimension: Dimension::How,
                    temperature: self.ctx.params.temperature,
                    operation: "expand".into(),
                    iteration: Some(key.iteration),
                    candidate_id: Some(key.candidate_id),
                    parent_prompt: how_seed.clone(),
                },
                &self.ctx.cancel,
            )
        })
        .await?;
        self.record_llm_usage("refine_how", key, Some(Dimension::How), &how.metadata)
            .await;

        let combined = retry_with_backoff(&self.ctx.cancel, || {
            self.ctx
                .providers
                .llm
                .combine_prompts(&what.refined_prompt, &how.refined_prompt, &self.ctx.cancel)
        })
        .await?;
        self.record_llm_usage("combine", key, None, &combined.metadata).await;

        let mut candidate = Candidate::new(
            key,
            parent.map(|p| p.key),
            what.refined_prompt.clone(),
            how.refined_prompt.clone(),
            combined.combined.clone(),
        );

        self.check_cancel()?;
        let image_options = ImageGenOptions {
            size: None,
            steps: self.ctx.params.steps,
            guidance: self.ctx.params.guidance,
            seed: self.ctx.params.seed,
            input_image: None,
            denoise_strength: None,
            iteration: key.iteration,
            candidate_id: key.candidate_id,
            session_id: self.ctx.session_id.clone(),
            output_dir: self.ctx.output_dir.clone(),
        };
        let prompt_for_image = combined.combined.clone();
        let cancel = self.ctx.cancel.clone();
        let image = self
            .ctx
            .gpu
            .with_image_gen_operation(|| async {
                retry_with_backoff(&cancel, || {
                    self.ctx.providers.image.generate_image(
                        &prompt_for_image,
                        image_options.clone(),
                        &cancel,
                    )
                })
                .await
            })
            .await??;
        candidate.image.url = image.url.clone();
        candidate.image.local_path = image.local_path.clone();

        self.check_cancel()?;
        let image_ref = image
            .url
            .clone()
            .or_else(|| image.local_path.clone())
            .unwrap_or_default();
        let prompt_for_vision = self.ctx.params.prompt.clone();
        let vision_options = VisionOptions {
            focus_areas: Vec::new(),
            iteration: key.iteration,
            candidate_id: key.candidate_id,
        };
        let cancel = self.ctx.cancel.clone();
        let image_ref_for_closure = image_ref.clone();
        let analysis = self
            .ctx
            .gpu
            .with_vlm_operation(|| async {
                retry_with_backoff(&cancel, || {
                    self.ctx.providers.vision.analyze_image(
                        &image_ref_for_closure,
                        &prompt_for_vision,
                        vision_options.clone(),
                        &cancel,
                    )
                })
                .await
            })
            .await??;
        self.record_vision_usage(key, &analysis.metadata).await;

        let aesthetic = retry_with_backoff(&self.ctx.cancel, || {
            self.ctx.providers.vision.aesthetic_score(
                &image_ref,
                analysis.caption.as_deref(),
                &self.ctx.cancel,
            )
        })
        .await?;

        candidate.set_scores(analysis.alignment_score, aesthetic, self.ctx.params.alpha);

        self.publish(ProgressMessage::candidate(CandidatePayload {
            iteration: key.iteration,
            candidate_id: key.candidate_id,
            image_url: candidate.image.url.clone(),
            what_prompt: candidate.what_prompt.clone(),
            how_prompt: candidate.how_prompt.clone(),
            combined: candidate.combined.clone(),
            score: candidate.total_score,
            parent_id: candidate.parent_id.map(|p| p.candidate_id),
        }))
        .await;

        Ok(candidate)
    }

    async fn record_llm_usage(
        &self,
        operation: &str,
        key: CandidateKey,
        dimension: Option<Dimension>,
        metadata: &beamforge_core::providers::CallMetadata,
    ) {
        self.ctx
            .meter
            .record(RecordArgs {
                provider: "llm".into(),
                operation: operation.into(),
                input_tokens: metadata.tokens_used,
                output_tokens: 0,
                metadata: beamforge_core::domain::TokenUsageMetadata {
                    iteration: Some(key.iteration),
                    candidate_id: Some(key.candidate_id),
                    model: Some(metadata.model.clone()),
                    dimension,
                },
            })
            .await;
    }

    async fn record_vision_usage(
        &self,
        key: CandidateKey,
        metadata: &beamforge_core::providers::CallMetadata,
    ) {
        self.ctx
            .meter
            .record(RecordArgs {
                provider: "vision".into(),
                operation: "analyze".into(),
                input_tokens: metadata.tokens_used,
                output_tokens: 0,
                metadata: beamforge_core::domain::TokenUsageMetadata {
                    iteration: Some(key.iteration),
                    candidate_id: Some(key.candidate_id),
                    model: Some(metadata.model.clone()),
                    dimension: None,
                },
            })
            .await;
    }

    /// Termination: best candidate wins, best two are
    /// finalists, a final ranker call explains the comparison, lineage is
    /// walked from winner back to its iteration-0 ancestor.
    async fn finish(
        self,
        frames: Vec<IterationFrame>,
    ) -> Result<beamforge_core::domain::JobResult, OrchestratorError> {
        let last = frames.last().expect("at least the seed frame exists");
        let mut ranked_all: Vec<CandidateKey> = last
            .candidates
            .iter()
            .filter(|c| c.has_valid_score())
            .map(|c| c.key)
            .collect();
        ranked_all.sort_by(|a, b| {
            let score_a = last.candidate(*a).and_then(|c| c.total_score).unwrap_or(0.0);
            let score_b = last.candidate(*b).and_then(|c| c.total_score).unwrap_or(0.0);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });

        let winner = ranked_all[0];
        let finalists: Vec<CandidateKey> = ranked_all.iter().take(2).copied().collect();

        let comparative_explanation = if finalists.len() == 2 {
            let pair: Vec<(u32, String, f64)> = finalists
                .iter()
                .filter_map(|key| {
                    last.candidate(*key).map(|c| {
                        (
                            c.key.candidate_id,
                            c.combined.clone(),
                            c.total_score.unwrap_or(0.0),
                        )
                    })
                })
                .collect();
            let ranked = self.ctx.providers.ranker.rank(&pair, &self.ctx.cancel).await?;
            ranked.first().map(|r| r.reason.clone())
        } else {
            None
        };

        let lineage = walk_lineage(&frames, winner);

        let winner_candidate = last.candidate(winner).expect("winner key resolves in last frame");
        self.publish(ProgressMessage::complete(BestCandidate {
            what: winner_candidate.what_prompt.clone(),
            how: winner_candidate.how_prompt.clone(),
            combined: winner_candidate.combined.clone(),
            total_score: winner_candidate.total_score.unwrap_or(0.0),
            image_url: winner_candidate.image.url.clone(),
        }))
        .await;

        let stats = self.ctx.meter.stats().await;
        let pricing = PricingTable::default_table();
        let cost = self.ctx.meter.estimated_cost(&pricing).await;
        self.ctx
            .store
            .finalize(
                &self.ctx.session_id,
                Some(winner.candidate_id),
                finalists.iter().map(|k| k.candidate_id).collect(),
                lineage
                    .iter()
                    .map(|k| LineageEntry {
                        iteration: k.iteration,
                        candidate_id: k.candidate_id,
                    })
                    .collect(),
                Some(stats.total_tokens),
                Some(cost.total),
            )
            .await?;
        if let Ok(json) = self.ctx.meter.to_json().await {
            let _ = self.ctx.store.write_tokens(&self.ctx.session_id, &json).await;
        }
        self.ctx.bus.close_job(self.ctx.job_id).await;

        Ok(beamforge_core::domain::JobResult {
            winner,
            finalists,
            lineage,
            comparative_explanation,
        })
    }
}

/// Walks `parentId` links from the winner back to its iteration-0
/// ancestor.
fn walk_lineage(frames: &[IterationFrame], winner: CandidateKey) -> Vec<CandidateKey> {
    let mut chain = Vec::new();
    let mut current = Some(winner);
    while let Some(key) = current {
        chain.push(key);
        current = frames
            .get(key.iteration as usize)
            .and_then(|f| f.candidate(key))
            .and_then(|c| c.parent_id);
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamforge_core::domain::{Candidate as DomainCandidate, CandidateKey as Key};

    fn frame_with(iteration: u32, entries: &[(u32, Option<u32>, f64)]) -> IterationFrame {
        let mut frame = IterationFrame::new(iteration);
        for &(id, parent, score) in entries {
            let mut c = DomainCandidate::new(
                Key::new(iteration, id),
                parent.map(|p| Key::new(iteration - 1, p)),
                "what".into(),
                "how".into(),
                "combined".into(),
            );
            c.set_scores(score, score / 10.0, 1.0);
            frame.candidates.push(c);
        }
        frame.select_top(entries.len());
        frame
    }

    #[test]
    fn lineage_walks_back_to_iteration_zero_ancestor() {
        let frames = vec![
            frame_with(0, &[(0, None, 80.0), (1, None, 60.0)]),
            frame_with(1, &[(0, Some(0), 90.0), (1, Some(0), 70.0)]),
        ];
        let lineage = walk_lineage(&frames, CandidateKey::new(1, 0));
        assert_eq!(
            lineage,
            vec![CandidateKey::new(0, 0), CandidateKey::new(1, 0)]
        );
    }
}
