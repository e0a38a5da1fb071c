//! Server configuration loaded from environment variables (§6), with
//! `.env` support via `dotenvy` at the binary entry point.

use std::time::Duration;

use beamforge_core::domain::ServiceName;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub session_history_dir: String,
    pub gpu_cleanup_delay: Duration,
    pub hf_token: Option<String>,
    pub flux_lora_path: Option<String>,
    pub flux_lora_scale: Option<f64>,
    pub modal_endpoint_url: Option<String>,
    pub modal_token_id: Option<String>,
    pub modal_token_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 3000),
            session_history_dir: std::env::var("SESSION_HISTORY_DIR")
                .unwrap_or_else(|_| "./session-history".to_string()),
            gpu_cleanup_delay: Duration::from_millis(env_parse("GPU_CLEANUP_DELAY_MS", 0)),
            hf_token: std::env::var("HF_TOKEN").ok(),
            flux_lora_path: std::env::var("FLUX_LORA_PATH").ok(),
            flux_lora_scale: std::env::var("FLUX_LORA_SCALE")
                .ok()
                .and_then(|s| s.parse().ok()),
            modal_endpoint_url: std::env::var("MODAL_ENDPOINT_URL").ok(),
            modal_token_id: std::env::var("MODAL_TOKEN_ID").ok(),
            modal_token_secret: std::env::var("MODAL_TOKEN_SECRET").ok(),
        }
    }

    /// Overridable per-service port via `{SERVICE}_PORT`, falling back to
    /// the compiled-in default (§6).
    pub fn service_port(name: ServiceName) -> u16 {
        let var = format!("{}_PORT", name.as_str().to_uppercase());
        env_parse(&var, name.default_port())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
