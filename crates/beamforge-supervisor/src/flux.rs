//! Flux encoder-path validation: if a local `modelPath` is
//! given, the three encoder paths (CLIP-L, T5-XXL, VAE) are required and
//! must exist on disk; a hosted model (no `modelPath`) skips the check.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FluxEncoderPaths {
    pub model_path: Option<String>,
    pub text_encoder_path: Option<String>,
    pub text_encoder_2_path: Option<String>,
    pub vae_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluxValidation {
    pub valid: bool,
    pub error: Option<String>,
}

pub fn validate_flux_encoder_paths(paths: &FluxEncoderPaths) -> FluxValidation {
    let Some(_model_path) = &paths.model_path else {
        return FluxValidation {
            valid: true,
            error: None,
        };
    };

    let required = [
        ("textEncoderPath (CLIP-L)", &paths.text_encoder_path),
        ("textEncoder2Path (T5-XXL)", &paths.text_encoder_2_path),
        ("vaePath (VAE)", &paths.vae_path),
    ];

    for (label, value) in required {
        match value {
            None => {
                return FluxValidation {
                    valid: false,
                    error: Some(format!("missing required encoder path: {label}")),
                }
            }
            Some(path) if !std::path::Path::new(path).exists() => {
                return FluxValidation {
                    valid: false,
                    error: Some(format!("{label} does not exist on disk: {path}")),
                }
            }
            Some(_) => {}
        }
    }

    FluxValidation {
        valid: true,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_model_skips_validation() {
        let paths = FluxEncoderPaths::default();
        let result = validate_flux_encoder_paths(&paths);
        assert!(result.valid);
    }

    #[test]
    fn local_model_without_encoders_is_rejected() {
        let paths = FluxEncoderPaths {
            model_path: Some("/models/flux.safetensors".into()),
            ..Default::default()
        };
        let result = validate_flux_encoder_paths(&paths);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("textEncoderPath"));
    }

    #[test]
    fn local_model_with_nonexistent_encoder_is_rejected() {
        let paths = FluxEncoderPaths {
            model_path: Some("/models/flux.safetensors".into()),
            text_encoder_path: Some("/models/does-not-exist-clip.safetensors".into()),
            text_encoder_2_path: Some("/models/does-not-exist-t5.safetensors".into()),
            vae_path: Some("/models/does-not-exist-vae.safetensors".into()),
        };
        let result = validate_flux_encoder_paths(&paths);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("does not exist"));
    }

    #[test]
    fn local_model_with_existing_encoders_is_valid() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_string_lossy().to_string();
        let paths = FluxEncoderPaths {
            model_path: Some("/models/flux.safetensors".into()),
            text_encoder_path: Some(path.clone()),
            text_encoder_2_path: Some(path.clone()),
            vae_path: Some(path),
        };
        let result = validate_flux_encoder_paths(&paths);
        assert!(result.valid);
    }
}
