use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::utils::retry::RetryPolicy;

pub const CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_storage_folder")]
    pub storage_folder: String,

    /// Namespace for persisted character references. One scope per user keeps
    /// identically named characters of different users apart.
    #[serde(default = "default_character_scope")]
    pub character_scope: String,

    #[serde(default)]
    pub illustration: IllustrationConfig,

    #[serde(default)]
    pub hosting: HostingConfig,

    #[serde(default)]
    pub checker: CheckerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IllustrationConfig {
    #[serde(default = "default_illustration_provider")]
    pub provider: String, // "leonardo" or "openai"
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u32,
    #[serde(default = "default_submit_retry_delay")]
    pub submit_retry_delay_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_min_api_key_length")]
    pub min_api_key_length: usize,
    #[serde(default = "default_reference_guidance_scale")]
    pub reference_guidance_scale: f32,
    pub leonardo: Option<LeonardoConfig>,
    pub openai: Option<OpenAiImageConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LeonardoConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_leonardo_model")]
    pub model_id: String,
    #[serde(default = "default_image_width")]
    pub width: u32,
    #[serde(default = "default_image_height")]
    pub height: u32,
    #[serde(default = "default_leonardo_base_url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAiImageConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_size")]
    pub size: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostingConfig {
    #[serde(default = "default_hosting_provider")]
    pub provider: String,
    pub imgbb: Option<ImgbbConfig>,
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
    #[serde(default = "default_upload_retry_delay")]
    pub upload_retry_delay_ms: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_min_image_bytes")]
    pub min_image_bytes: usize,
    /// Keep image bytes in local storage before trying the remote host.
    #[serde(default)]
    pub prefer_local: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ImgbbConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_imgbb_base_url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckerConfig {
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    #[serde(default = "default_probe_retry_delay")]
    pub probe_retry_delay_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
}

impl Default for IllustrationConfig {
    fn default() -> Self {
        Self {
            provider: default_illustration_provider(),
            poll_interval_seconds: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            submit_attempts: default_submit_attempts(),
            submit_retry_delay_seconds: default_submit_retry_delay(),
            request_timeout_seconds: default_request_timeout(),
            min_api_key_length: default_min_api_key_length(),
            reference_guidance_scale: default_reference_guidance_scale(),
            leonardo: None,
            openai: None,
        }
    }
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            provider: default_hosting_provider(),
            imgbb: None,
            upload_attempts: default_upload_attempts(),
            upload_retry_delay_ms: default_upload_retry_delay(),
            fetch_timeout_seconds: default_fetch_timeout(),
            min_image_bytes: default_min_image_bytes(),
            prefer_local: false,
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            probe_attempts: default_probe_attempts(),
            probe_retry_delay_ms: default_probe_retry_delay(),
            probe_timeout_seconds: default_probe_timeout(),
        }
    }
}

impl IllustrationConfig {
    pub fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_poll_attempts,
            Duration::from_secs(self.poll_interval_seconds),
        )
    }

    pub fn submit_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.submit_attempts,
            Duration::from_secs(self.submit_retry_delay_seconds),
        )
    }
}

impl HostingConfig {
    pub fn upload_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.upload_attempts,
            Duration::from_millis(self.upload_retry_delay_ms),
        )
    }
}

impl CheckerConfig {
    pub fn probe_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.probe_attempts,
            Duration::from_millis(self.probe_retry_delay_ms),
        )
    }
}

fn default_storage_folder() -> String {
    "data".to_string()
}
fn default_character_scope() -> String {
    "global".to_string()
}
fn default_illustration_provider() -> String {
    "leonardo".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_max_poll_attempts() -> u32 {
    30
}
fn default_submit_attempts() -> u32 {
    2
}
fn default_submit_retry_delay() -> u64 {
    3
}
fn default_request_timeout() -> u64 {
    15
}
fn default_min_api_key_length() -> usize {
    20
}
fn default_reference_guidance_scale() -> f32 {
    0.9
}
fn default_leonardo_model() -> String {
    // Leonardo Phoenix
    "6b645e3a-d64f-4341-a6d8-7a3690fbf042".to_string()
}
fn default_image_width() -> u32 {
    1024
}
fn default_image_height() -> u32 {
    768
}
fn default_leonardo_base_url() -> String {
    "https://cloud.leonardo.ai/api/rest/v1".to_string()
}
fn default_openai_model() -> String {
    "dall-e-3".to_string()
}
fn default_openai_size() -> String {
    "1024x1024".to_string()
}
fn default_hosting_provider() -> String {
    "imgbb".to_string()
}
fn default_imgbb_base_url() -> String {
    "https://api.imgbb.com/1/upload".to_string()
}
fn default_upload_attempts() -> u32 {
    3
}
fn default_upload_retry_delay() -> u64 {
    1000
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_min_image_bytes() -> usize {
    100
}
fn default_probe_attempts() -> u32 {
    1
}
fn default_probe_retry_delay() -> u64 {
    500
}
fn default_probe_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_folder: default_storage_folder(),
            character_scope: default_character_scope(),
            illustration: IllustrationConfig::default(),
            hosting: HostingConfig::default(),
            checker: CheckerConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_PATH))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.storage_folder)?;
        Ok(())
    }
}
