use crate::core::config::IllustrationConfig;
use crate::core::state::GenerationStatus;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use std::time::Duration;

pub mod agent;
pub mod leonardo;
pub mod openai;
pub mod prompt;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Earlier illustration of the same character to condition on.
    pub reference_image_url: Option<String>,
    /// Guidance weight applied to `reference_image_url`.
    pub reference_weight: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPoll {
    pub status: GenerationStatus,
    pub image_urls: Vec<String>,
}

/// Job-based text-to-image backend.
#[async_trait]
pub trait IllustrationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Configured API key, if any. Checked before any network call.
    fn credential(&self) -> Option<&str>;

    fn model_id(&self) -> &str;

    /// Lightweight authenticated call used to verify reachability and key.
    async fn check_connectivity(&self) -> Result<()>;

    /// Starts a job and returns its id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String>;

    async fn poll(&self, job_id: &str) -> Result<JobPoll>;
}

pub fn create_illustration_provider(config: &IllustrationConfig) -> Result<Arc<dyn IllustrationProvider>> {
    info!("Initializing illustration provider: {}", config.provider);
    let timeout = Duration::from_secs(config.request_timeout_seconds.max(1));
    match config.provider.as_str() {
        "leonardo" => {
            let cfg = config.leonardo.clone().unwrap_or_default();
            Ok(Arc::new(leonardo::LeonardoClient::new(cfg, timeout)?))
        }
        "openai" => {
            let cfg = config.openai.clone().unwrap_or_default();
            Ok(Arc::new(openai::OpenAiImageClient::new(cfg, timeout)?))
        }
        _ => Err(anyhow!("Unknown illustration provider: {}", config.provider)),
    }
}
