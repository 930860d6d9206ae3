use crate::core::config::HostingConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const MAX_DOWNLOAD_BYTES: usize = 32 * 1024 * 1024;

// --- Durable host ---

#[derive(Debug, Clone, PartialEq)]
pub enum UploadPayload {
    /// Base64-encoded image bytes.
    Base64(String),
    /// Remote URL the host fetches itself.
    Url(String),
}

/// Third-party host whose URLs never expire.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Uploads once and returns the public URL. Retrying is the caller's job.
    async fn upload(&self, payload: &UploadPayload, name: Option<&str>) -> Result<String>;

    fn is_configured(&self) -> bool;
}

pub struct ImgbbHost {
    api_key: String,
    base_url: String,
    client: Client,
}

impl ImgbbHost {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build imgbb HTTP client")?;
        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: base_url.to_string(),
            client,
        })
    }
}

#[derive(Deserialize, Debug)]
struct ImgbbResponse {
    data: Option<ImgbbData>,
    #[serde(default)]
    success: bool,
    error: Option<ImgbbError>,
}

#[derive(Deserialize, Debug)]
struct ImgbbData {
    url: String,
}

#[derive(Deserialize, Debug)]
struct ImgbbError {
    message: String,
}

#[async_trait]
impl ImageHost for ImgbbHost {
    async fn upload(&self, payload: &UploadPayload, name: Option<&str>) -> Result<String> {
        let image = match payload {
            UploadPayload::Base64(data) => data.clone(),
            UploadPayload::Url(url) => url.clone(),
        };

        let mut form = multipart::Form::new()
            .text("key", self.api_key.clone())
            .text("image", image);
        if let Some(name) = name {
            form = form.text("name", name.to_string());
        }

        let resp = self
            .client
            .post(&self.base_url)
            .multipart(form)
            .send()
            .await
            .context("Failed to send imgbb upload")?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("imgbb returned {}: {}", status, body));
        }

        parse_imgbb_response(&body)
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

fn parse_imgbb_response(body: &str) -> Result<String> {
    let result: ImgbbResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse imgbb response: {}", body))?;

    if let Some(err) = result.error {
        return Err(anyhow!("imgbb error: {}", err.message));
    }
    match result.data {
        Some(data) if result.success && !data.url.is_empty() => Ok(data.url),
        _ => Err(anyhow!("imgbb response has no url: {}", body)),
    }
}

pub fn create_image_host(config: &HostingConfig) -> Result<Box<dyn ImageHost>> {
    let timeout = Duration::from_secs(config.fetch_timeout_seconds.max(1) * 3);
    match config.provider.as_str() {
        "imgbb" => {
            let cfg = config.imgbb.clone().unwrap_or_default();
            let base_url = if cfg.base_url.is_empty() {
                "https://api.imgbb.com/1/upload".to_string()
            } else {
                cfg.base_url
            };
            Ok(Box::new(ImgbbHost::new(&cfg.api_key, &base_url, timeout)?))
        }
        _ => Err(anyhow!("Unknown image host: {}", config.provider)),
    }
}

// --- Fetching ---

/// Generic reachability probe and bounded download.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn probe(&self, url: &str) -> Result<bool>;
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build fetch HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<bool> {
        let resp = self.client.head(url).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        // Some CDNs reject HEAD outright.
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::FORBIDDEN {
            debug!("HEAD {} returned {}, retrying with GET", url, status);
            let resp = self.client.get(url).send().await?;
            return Ok(resp.status().is_success());
        }
        Ok(false)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        if !resp.status().is_success() {
            return Err(anyhow!("Download of {} returned {}", url, resp.status()));
        }

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Download stream error")?;
            bytes.extend_from_slice(&chunk);
            if bytes.len() > MAX_DOWNLOAD_BYTES {
                return Err(anyhow!("Download of {} exceeds {} bytes", url, MAX_DOWNLOAD_BYTES));
            }
        }
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}
