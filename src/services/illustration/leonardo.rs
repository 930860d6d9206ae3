use super::{GenerationRequest, IllustrationProvider, JobPoll};
use crate::core::config::LeonardoConfig;
use crate::core::state::GenerationStatus;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_GUIDANCE_SCALE: f32 = 7.0;

pub struct LeonardoClient {
    config: LeonardoConfig,
    base_url: String,
    client: Client,
}

impl LeonardoClient {
    pub fn new(config: LeonardoConfig, timeout: Duration) -> Result<Self> {
        let base_url = if config.base_url.is_empty() {
            "https://cloud.leonardo.ai/api/rest/v1".to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Leonardo HTTP client")?;
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.config.api_key.trim())
    }
}

// --- Wire types ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LeonardoGenerationRequest {
    prompt: String,
    model_id: String,
    width: u32,
    height: u32,
    #[serde(rename = "num_images")]
    num_images: u32,
    #[serde(rename = "guidance_scale")]
    guidance_scale: f32,
    #[serde(rename = "negative_prompt", skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_prompts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_prompt_weight: Option<f32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LeonardoSubmitResponse {
    sd_generation_job: Option<LeonardoJob>,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LeonardoJob {
    generation_id: String,
}

#[derive(Deserialize, Debug)]
struct LeonardoPollResponse {
    generations_by_pk: Option<LeonardoGeneration>,
}

#[derive(Deserialize, Debug)]
struct LeonardoGeneration {
    status: String,
    #[serde(default)]
    generated_images: Vec<LeonardoImage>,
}

#[derive(Deserialize, Debug)]
struct LeonardoImage {
    url: String,
}

fn build_request(config: &LeonardoConfig, request: &GenerationRequest) -> LeonardoGenerationRequest {
    let image_prompts: Vec<String> = request.reference_image_url.iter().cloned().collect();
    LeonardoGenerationRequest {
        prompt: request.prompt.clone(),
        model_id: config.model_id.clone(),
        width: config.width,
        height: config.height,
        num_images: 1,
        guidance_scale: DEFAULT_GUIDANCE_SCALE,
        negative_prompt: request.negative_prompt.clone(),
        image_prompt_weight: if image_prompts.is_empty() {
            None
        } else {
            request.reference_weight
        },
        image_prompts,
    }
}

fn parse_submit_response(body: &str) -> Result<String> {
    let result: LeonardoSubmitResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse Leonardo submit response: {}", body))?;
    if let Some(err) = result.error {
        return Err(anyhow!("Leonardo API returned error: {}", err));
    }
    result
        .sd_generation_job
        .map(|job| job.generation_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("Leonardo response has no generation id: {}", body))
}

fn parse_poll_response(body: &str) -> Result<JobPoll> {
    let result: LeonardoPollResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse Leonardo poll response: {}", body))?;
    let generation = result
        .generations_by_pk
        .ok_or_else(|| anyhow!("Leonardo poll response has no generation: {}", body))?;
    Ok(JobPoll {
        status: GenerationStatus::parse(&generation.status),
        image_urls: generation
            .generated_images
            .into_iter()
            .map(|img| img.url)
            .filter(|u| !u.is_empty())
            .collect(),
    })
}

#[async_trait]
impl IllustrationProvider for LeonardoClient {
    fn name(&self) -> &str {
        "leonardo"
    }

    fn credential(&self) -> Option<&str> {
        Some(self.config.api_key.trim()).filter(|k| !k.is_empty())
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    async fn check_connectivity(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/me", self.base_url))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Leonardo connectivity check failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("Leonardo /me returned {}", resp.status()));
        }
        Ok(())
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String> {
        let body = build_request(&self.config, request);
        debug!(
            "Submitting Leonardo generation: model={}, prompt_len={}, reference={}",
            body.model_id,
            body.prompt.len(),
            !body.image_prompts.is_empty()
        );

        let resp = self
            .client
            .post(format!("{}/generations", self.base_url))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .context("Failed to send Leonardo generation request")?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Leonardo API error {}: {}", status, text));
        }
        parse_submit_response(&text)
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll> {
        let resp = self
            .client
            .get(format!("{}/generations/{}", self.base_url, job_id))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Failed to poll Leonardo generation")?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Leonardo poll error {}: {}", status, text));
        }
        parse_poll_response(&text)
    }
}
