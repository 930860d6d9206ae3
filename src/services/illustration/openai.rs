use super::{GenerationRequest, IllustrationProvider, JobPoll};
use crate::core::config::OpenAiImageConfig;
use crate::core::state::GenerationStatus;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// OpenAI Images API. Generation is synchronous, so `submit` does the work
/// and `poll` hands back the finished result once.
pub struct OpenAiImageClient {
    config: OpenAiImageConfig,
    base_url: String,
    client: Client,
    next_job: AtomicU64,
    finished: Mutex<HashMap<String, Vec<String>>>,
}

impl OpenAiImageClient {
    pub fn new(config: OpenAiImageConfig, timeout: Duration) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        // Image generation routinely takes longer than a metadata call.
        let client = Client::builder()
            .timeout(timeout.max(Duration::from_secs(120)))
            .build()
            .context("Failed to build OpenAI HTTP client")?;
        Ok(Self {
            config,
            base_url,
            client,
            next_job: AtomicU64::new(1),
            finished: Mutex::new(HashMap::new()),
        })
    }
}

#[derive(Serialize)]
struct OpenAiImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
}

#[derive(Deserialize)]
struct OpenAiImageResponse {
    #[serde(default)]
    data: Vec<OpenAiImageData>,
    error: Option<OpenAiError>,
}

#[derive(Deserialize)]
struct OpenAiImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiError {
    message: String,
}

fn parse_image_response(body: &str) -> Result<Vec<String>> {
    let result: OpenAiImageResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse OpenAI image response: {}", body))?;
    if let Some(err) = result.error {
        return Err(anyhow!("OpenAI API returned error: {}", err.message));
    }
    Ok(result
        .data
        .into_iter()
        .filter_map(|d| {
            d.url
                .or_else(|| d.b64_json.map(|b64| format!("data:image/png;base64,{}", b64)))
        })
        .collect())
}

#[async_trait]
impl IllustrationProvider for OpenAiImageClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn credential(&self) -> Option<&str> {
        Some(self.config.api_key.trim()).filter(|k| !k.is_empty())
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn check_connectivity(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/models/{}", self.base_url, self.config.model))
            .header("Authorization", format!("Bearer {}", self.config.api_key.trim()))
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .context("OpenAI connectivity check failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("OpenAI model lookup returned {}", resp.status()));
        }
        Ok(())
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String> {
        if request.reference_image_url.is_some() {
            debug!("OpenAI images API ignores reference images; relying on prompt text");
        }
        let body = OpenAiImageRequest {
            model: self.config.model.clone(),
            prompt: request.prompt.clone(),
            n: 1,
            size: self.config.size.clone(),
        };

        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key.trim()))
            .json(&body)
            .send()
            .await
            .context("Failed to send OpenAI image request")?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("OpenAI API error {}: {}", status, text));
        }
        let urls = parse_image_response(&text)?;

        let job_id = format!("openai-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        self.finished
            .lock()
            .map_err(|_| anyhow!("OpenAI job table poisoned"))?
            .insert(job_id.clone(), urls);
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll> {
        let urls = self
            .finished
            .lock()
            .map_err(|_| anyhow!("OpenAI job table poisoned"))?
            .remove(job_id);
        Ok(match urls {
            Some(image_urls) => JobPoll {
                status: GenerationStatus::Complete,
                image_urls,
            },
            None => JobPoll {
                status: GenerationStatus::Failed,
                image_urls: Vec::new(),
            },
        })
    }
}
