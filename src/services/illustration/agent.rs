use super::prompt::{build_prompt, page_prompt, PromptParts, NEGATIVE_PROMPT};
use super::{GenerationRequest, IllustrationProvider};
use crate::core::config::IllustrationConfig;
use crate::core::error::ImageError;
use crate::core::notify::Notifier;
use crate::core::state::{
    CharacterVisualReference, GenerationAttempt, GenerationStatus, PAPERCRAFT_STYLE,
};
use crate::services::characters::CharacterReferenceStore;
use crate::services::image_store::PermanentImageStore;
use crate::utils::placeholders::placeholder_for_theme;
use crate::utils::retry::{retry, RetryPolicy};
use crate::utils::urls::ImageSource;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub submit_policy: RetryPolicy,
    pub poll_policy: RetryPolicy,
    pub min_api_key_length: usize,
    pub reference_guidance_scale: f32,
}

impl From<&IllustrationConfig> for AgentSettings {
    fn from(config: &IllustrationConfig) -> Self {
        Self {
            submit_policy: config.submit_policy(),
            poll_policy: config.poll_policy(),
            min_api_key_length: config.min_api_key_length,
            reference_guidance_scale: config.reference_guidance_scale,
        }
    }
}

/// One illustration to produce.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub character_name: String,
    pub theme: String,
    pub setting: String,
    pub style: Option<String>,
    pub character_prompt: Option<String>,
    pub story_context: Option<String>,
    /// Name used when the result is re-hosted.
    pub name_hint: Option<String>,
}

/// A whole story's worth of illustrations for one character.
#[derive(Debug, Clone, Default)]
pub struct IllustrationBatch {
    pub character_name: String,
    pub character_prompt: Option<String>,
    pub theme: String,
    pub setting: String,
    pub style: Option<String>,
    pub story_context: Option<String>,
    /// Cover scene; generated before any page when present.
    pub cover_prompt: Option<String>,
    pub page_texts: Vec<String>,
    pub image_prompts: Vec<Option<String>>,
    /// 1-based story page for each entry of `page_texts`, used in re-hosting
    /// names. Defaults to the position in the batch.
    pub page_numbers: Vec<usize>,
    pub name_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoryImageSet {
    pub cover_url: Option<String>,
    /// Exactly one entry per input page.
    pub page_urls: Vec<String>,
}

/// Generates character-consistent illustrations through a job-based provider.
/// Never fails outward: every call ends in an image URL or a placeholder.
pub struct IllustrationAgent {
    provider: RwLock<Arc<dyn IllustrationProvider>>,
    unavailable: AtomicBool,
    characters: Arc<dyn CharacterReferenceStore>,
    durable: Option<Arc<PermanentImageStore>>,
    notifier: Arc<dyn Notifier>,
    settings: AgentSettings,
}

impl IllustrationAgent {
    pub fn new(
        provider: Arc<dyn IllustrationProvider>,
        characters: Arc<dyn CharacterReferenceStore>,
        notifier: Arc<dyn Notifier>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider: RwLock::new(provider),
            unavailable: AtomicBool::new(false),
            characters,
            durable: None,
            notifier,
            settings,
        }
    }

    /// Re-host every finished image before it is returned or recorded as a
    /// character reference.
    pub fn with_durable_store(mut self, store: Arc<PermanentImageStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Installs a provider with a new credential and clears the unavailable mark.
    pub fn replace_provider(&self, provider: Arc<dyn IllustrationProvider>) {
        match self.provider.write() {
            Ok(mut guard) => *guard = provider,
            Err(poisoned) => *poisoned.into_inner() = provider,
        }
        self.unavailable.store(false, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn current_provider(&self) -> Arc<dyn IllustrationProvider> {
        match self.provider.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn has_plausible_credential(&self, provider: &dyn IllustrationProvider) -> bool {
        provider
            .credential()
            .map(|key| key.trim().len() >= self.settings.min_api_key_length)
            .unwrap_or(false)
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> String {
        match self.try_generate_image(request).await {
            Ok(url) => url,
            Err(e) => {
                if matches!(
                    e,
                    ImageError::CredentialMissingOrInvalid | ImageError::ProviderUnreachable(_)
                ) && self.is_available()
                {
                    warn!("Marking illustration provider unavailable: {}", e);
                    self.unavailable.store(true, Ordering::SeqCst);
                }
                error!("Illustration for '{}' failed: {}", request.character_name, e);
                self.notifier
                    .error("Could not create an illustration; using placeholder artwork");
                placeholder_for_theme(&request.theme)
            }
        }
    }

    pub async fn try_generate_image(&self, request: &ImageRequest) -> Result<String, ImageError> {
        let provider = self.current_provider();

        // NOT_STARTED
        if !self.has_plausible_credential(provider.as_ref()) {
            return Err(ImageError::CredentialMissingOrInvalid);
        }
        if !self.is_available() {
            return Err(ImageError::ProviderUnreachable(format!(
                "{} was disabled after an earlier failure",
                provider.name()
            )));
        }

        // SUBMITTED
        let existing = match self.characters.get(&request.character_name).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Could not read character reference for '{}': {:#}", request.character_name, e);
                None
            }
        };
        let description = existing
            .as_ref()
            .map(|r| r.prompt_text.as_str())
            .filter(|p| !p.trim().is_empty())
            .or(request.character_prompt.as_deref());
        let style = request.style.as_deref().unwrap_or(PAPERCRAFT_STYLE);
        let prompt = build_prompt(&PromptParts {
            scene: &request.prompt,
            character_name: &request.character_name,
            character_description: description,
            theme: &request.theme,
            setting: &request.setting,
            style,
            story_context: request.story_context.as_deref(),
        });

        let reference_image_url = existing.as_ref().map(|r| r.reference_image_url.clone());
        let generation = GenerationRequest {
            prompt,
            negative_prompt: Some(NEGATIVE_PROMPT.to_string()),
            reference_weight: reference_image_url
                .as_ref()
                .map(|_| self.settings.reference_guidance_scale),
            reference_image_url,
        };

        provider
            .check_connectivity()
            .await
            .map_err(|e| ImageError::ProviderUnreachable(format!("{:#}", e)))?;

        let job_id = self.submit(provider.as_ref(), &generation).await?;

        // POLLING
        let image_url = self.poll_until_done(provider.as_ref(), &job_id).await?;

        // COMPLETE
        let image_url = self.make_durable(image_url, request.name_hint.as_deref()).await;
        if existing.is_none() {
            let reference = CharacterVisualReference {
                name: request.character_name.clone(),
                prompt_text: request.character_prompt.clone().unwrap_or_default(),
                style_name: style.to_string(),
                model_id: provider.model_id().to_string(),
                reference_image_url: image_url.clone(),
            };
            match self.characters.set_if_absent(reference).await {
                Ok(true) => info!("Reference image recorded for '{}'", request.character_name),
                Ok(false) => debug!("Reference for '{}' was set concurrently", request.character_name),
                Err(e) => warn!("Could not persist reference for '{}': {:#}", request.character_name, e),
            }
        }
        Ok(image_url)
    }

    async fn submit(&self, provider: &dyn IllustrationProvider, request: &GenerationRequest) -> Result<String, ImageError> {
        let max_attempts = self.settings.submit_policy.max_attempts;
        retry(
            self.settings.submit_policy,
            move |attempt| async move {
                if attempt > 1 {
                    self.notifier.info(&format!(
                        "Retrying illustration (attempt {}/{})",
                        attempt, max_attempts
                    ));
                }
                provider
                    .submit(request)
                    .await
                    .map_err(|e| ImageError::ProviderUnreachable(format!("{:#}", e)))
            },
            ImageError::is_transient,
        )
        .await
    }

    async fn poll_until_done(&self, provider: &dyn IllustrationProvider, job_id: &str) -> Result<String, ImageError> {
        let policy = self.settings.poll_policy;
        let started_at = Instant::now();
        if !policy.delay.is_zero() {
            sleep(policy.delay).await;
        }

        let result = retry(
            policy,
            move |attempt| async move {
                let poll = provider
                    .poll(job_id)
                    .await
                    .map_err(|e| ImageError::ProviderUnreachable(format!("{:#}", e)))?;
                let generation = GenerationAttempt {
                    provider_job_id: job_id.to_string(),
                    status: poll.status,
                    attempt_number: attempt,
                    started_at,
                };
                debug!(
                    "Job {} poll {}: {:?} after {:?}",
                    generation.provider_job_id,
                    generation.attempt_number,
                    generation.status,
                    generation.started_at.elapsed()
                );
                match generation.status {
                    GenerationStatus::Complete => poll
                        .image_urls
                        .into_iter()
                        .next()
                        .ok_or_else(|| ImageError::ProviderJobFailed {
                            job_id: job_id.to_string(),
                        }),
                    GenerationStatus::Failed => Err(ImageError::ProviderJobFailed {
                        job_id: job_id.to_string(),
                    }),
                    GenerationStatus::Pending => Err(ImageError::JobPending {
                        job_id: job_id.to_string(),
                    }),
                }
            },
            ImageError::is_transient,
        )
        .await;

        result.map_err(|e| match e {
            ImageError::JobPending { .. } | ImageError::ProviderUnreachable(_) => {
                ImageError::ProviderTimeout {
                    job_id: job_id.to_string(),
                    attempts: policy.max_attempts,
                }
            }
            other => other,
        })
    }

    async fn make_durable(&self, url: String, name_hint: Option<&str>) -> String {
        let Some(store) = &self.durable else {
            return url;
        };
        let Some(source) = ImageSource::parse(&url) else {
            return url;
        };
        match store.try_save(&source, name_hint).await {
            Ok(durable) => durable,
            Err(e) => {
                warn!("Keeping provider URL, re-hosting failed: {}", e);
                url
            }
        }
    }

    /// Cover first (it fixes the character's reference image), then every
    /// page in order. Pages are never generated concurrently.
    pub async fn generate_story_images(&self, batch: &IllustrationBatch) -> StoryImageSet {
        let base = ImageRequest {
            prompt: String::new(),
            character_name: batch.character_name.clone(),
            theme: batch.theme.clone(),
            setting: batch.setting.clone(),
            style: batch.style.clone(),
            character_prompt: batch.character_prompt.clone(),
            story_context: batch.story_context.clone(),
            name_hint: None,
        };
        let hint = |suffix: &str| {
            batch
                .name_prefix
                .as_ref()
                .map(|prefix| format!("{}-{}", prefix, suffix))
        };

        let cover_url = match &batch.cover_prompt {
            Some(cover_prompt) => {
                info!("Generating cover for '{}'", batch.character_name);
                let request = ImageRequest {
                    prompt: cover_prompt.clone(),
                    name_hint: hint("cover"),
                    ..base.clone()
                };
                Some(self.generate_image(&request).await)
            }
            None => None,
        };

        let total = batch.page_texts.len();
        let mut page_urls = Vec::with_capacity(total);
        for (i, text) in batch.page_texts.iter().enumerate() {
            info!("Generating illustration {}/{}", i + 1, total);
            let image_prompt = batch.image_prompts.get(i).and_then(|p| p.as_deref());
            let page_number = batch.page_numbers.get(i).copied().unwrap_or(i + 1);
            let request = ImageRequest {
                prompt: page_prompt(text, image_prompt),
                name_hint: hint(&format!("page-{}", page_number)),
                ..base.clone()
            };
            page_urls.push(self.generate_image(&request).await);
        }

        StoryImageSet {
            cover_url,
            page_urls,
        }
    }
}
