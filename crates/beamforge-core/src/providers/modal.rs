//! Hosted image-generation provider backed by a Modal endpoint, shipped
//! alongside the local/mock path as an ordinary `ImageProvider`
//! implementation; the mock (`super::mock::MockImageProvider`) remains
//! the default wiring.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GeneratedImage, ImageGenOptions, ImageProvider};
use crate::cancel::Cancel;
use crate::error::{ErrorKind, ProviderError};

pub struct ModalImageProvider {
    endpoint_url: String,
    token_id: String,
    token_secret: String,
    client: reqwest::Client,
}

impl ModalImageProvider {
    pub fn new(endpoint_url: String, token_id: String, token_secret: String) -> Self {
        Self {
            endpoint_url,
            token_id,
            token_secret,
            client: reqwest::Client::new(),
        }
    }

    /// Builds from `MODAL_ENDPOINT_URL`,
    /// `MODAL_TOKEN_ID`, `MODAL_TOKEN_SECRET`. Returns `None` if any are
    /// unset, so callers can fall back to the mock provider.
    pub fn from_env() -> Option<Self> {
        let endpoint_url = std::env::var("MODAL_ENDPOINT_URL").ok()?;
        let token_id = std::env::var("MODAL_TOKEN_ID").ok()?;
        let token_secret = std::env::var("MODAL_TOKEN_SECRET").ok()?;
        Some(Self::new(endpoint_url, token_id, token_secret))
    }
}

#[derive(Serialize)]
struct ModalRequest<'a> {
    prompt: &'a str,
    steps: Option<u32>,
    guidance: Option<f64>,
    seed: Option<u64>,
    input_image: Option<&'a str>,
    denoise_strength: Option<f64>,
}

#[derive(Deserialize)]
struct ModalResponse {
    image_url: String,
    model: String,
    seed: Option<u64>,
}

#[async_trait]
impl ImageProvider for ModalImageProvider {
    async fn generate_image(
        &self,
        prompt: &str,
        options: ImageGenOptions,
        cancel: &Cancel,
    ) -> Result<GeneratedImage, ProviderError> {
        cancel.check()?;
        let body = ModalRequest {
            prompt,
            steps: options.steps,
            guidance: options.guidance,
            seed: options.seed,
            input_image: options.input_image.as_deref(),
            denoise_strength: options.denoise_strength,
        };
        let resp = self
            .client
            .post(&self.endpoint_url)
            .basic_auth(&self.token_id, Some(&self.token_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("network error calling Modal: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let kind = if status.as_u16() == 503 {
                ErrorKind::ServiceUnavailable
            } else if status.as_u16() == 401 {
                ErrorKind::Auth
            } else {
                ErrorKind::Network
            };
            return Err(ProviderError::with_kind(
                kind,
                format!("Modal returned {status}: {text}"),
            ));
        }

        let parsed: ModalResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("invalid Modal response: {e}")))?;

        Ok(GeneratedImage {
            url: Some(parsed.image_url),
            local_path: None,
            model: parsed.model,
            size: options.size,
            seed: parsed.seed,
        })
    }
}
