use crate::core::config::Config;
use crate::core::error::ImageError;
use crate::core::io::Storage;
use crate::core::notify::Notifier;
use crate::core::state::{is_blank, StoryDraft};
use crate::services::characters::StorageCharacterStore;
use crate::services::hosting::{create_image_host, HttpFetcher, ImageHost};
use crate::services::illustration::agent::{AgentSettings, IllustrationAgent, IllustrationBatch};
use crate::services::illustration::create_illustration_provider;
use crate::services::illustration::prompt::cover_prompt;
use crate::services::image_store::{ImageStoreSettings, PermanentImageStore};
use crate::services::repository::{StorageStoryRepository, StoryRepository};
use crate::services::url_checker::UrlHealthChecker;
use crate::utils::placeholders::default_placeholder;
use crate::utils::urls::ImageSource;
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const OFFLINE_PREFIX: &str = "offline";

/// Makes every image of a story durable: fills missing illustrations for new
/// stories and repairs broken links on stored ones.
pub struct StoryImagePipeline {
    agent: Arc<IllustrationAgent>,
    store: Arc<PermanentImageStore>,
    checker: UrlHealthChecker,
    repository: Arc<dyn StoryRepository>,
    offline: Arc<dyn StoryRepository>,
    notifier: Arc<dyn Notifier>,
    /// Story ids handled since their last `reset`. Entries stay until reset,
    /// so long-running callers reset a story once it is closed.
    processed: Mutex<HashSet<String>>,
}

impl StoryImagePipeline {
    pub fn new(
        agent: Arc<IllustrationAgent>,
        store: Arc<PermanentImageStore>,
        checker: UrlHealthChecker,
        repository: Arc<dyn StoryRepository>,
        offline: Arc<dyn StoryRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            agent,
            store,
            checker,
            repository,
            offline,
            notifier,
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// Wires the production HTTP clients from `config`.
    pub fn from_config(config: &Config, storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let host: Arc<dyn ImageHost> = Arc::from(create_image_host(&config.hosting)?);
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.hosting.fetch_timeout_seconds.max(1),
        ))?);
        let store = Arc::new(PermanentImageStore::new(
            host,
            fetcher,
            storage.clone(),
            notifier.clone(),
            ImageStoreSettings::from(&config.hosting),
        ));

        let provider = create_illustration_provider(&config.illustration)?;
        let characters = Arc::new(StorageCharacterStore::new(storage.clone(), &config.character_scope));
        let agent = IllustrationAgent::new(
            provider,
            characters,
            notifier.clone(),
            AgentSettings::from(&config.illustration),
        )
        .with_durable_store(store.clone());

        let probe_fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.checker.probe_timeout_seconds.max(1),
        ))?);
        let checker = UrlHealthChecker::new(
            probe_fetcher,
            store.clone(),
            notifier.clone(),
            config.checker.probe_policy(),
        );

        Ok(Self::new(
            Arc::new(agent),
            store,
            checker,
            Arc::new(StorageStoryRepository::new(storage.clone())),
            Arc::new(StorageStoryRepository::with_prefix(storage, OFFLINE_PREFIX)),
            notifier,
        ))
    }

    pub fn agent(&self) -> &IllustrationAgent {
        &self.agent
    }

    pub async fn story_ids(&self) -> Result<Vec<String>> {
        self.repository.list_ids().await
    }

    /// Clears the once-per-load guard for `story_id`.
    pub async fn reset(&self, story_id: &str) {
        self.processed.lock().await.remove(story_id);
    }

    /// Returns false if the story was already handled since the last reset.
    async fn begin(&self, story_id: &str) -> bool {
        self.processed.lock().await.insert(story_id.to_string())
    }

    // --- Fresh stories ---

    /// Fills missing illustrations, re-hosts every image and saves the story.
    /// Always returns the story, even when saving fails.
    pub async fn process_story_images(&self, mut story: StoryDraft) -> StoryDraft {
        if !self.begin(&story.id).await {
            info!("Story {} already processed", story.id);
            return story;
        }

        if story.missing_images() {
            match story.validate_for_illustration() {
                Ok(()) => self.fill_missing_images(&mut story).await,
                Err(e) => warn!("Skipping illustration: {:#}", e),
            }
        }

        self.make_durable(&mut story).await;
        self.persist(&story).await;
        story
    }

    async fn fill_missing_images(&self, story: &mut StoryDraft) {
        let missing: Vec<usize> = story
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| is_blank(&page.image_url))
            .map(|(i, _)| i)
            .collect();
        let needs_cover = is_blank(&story.cover_image_url);
        info!(
            "Story {}: generating {} page illustration(s){}",
            story.id,
            missing.len(),
            if needs_cover { " and a cover" } else { "" }
        );

        let story_context = story
            .pages
            .iter()
            .map(|p| p.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let batch = IllustrationBatch {
            character_name: story.character.name.clone(),
            character_prompt: story.character.visual_description_prompt.clone(),
            theme: story.theme.clone(),
            setting: story.setting.clone(),
            style: Some(story.style.clone()),
            story_context: Some(story_context),
            cover_prompt: needs_cover
                .then(|| cover_prompt(&story.title, &story.character.name, &story.setting)),
            page_texts: missing.iter().map(|&i| story.pages[i].text.clone()).collect(),
            image_prompts: missing.iter().map(|&i| story.pages[i].image_prompt.clone()).collect(),
            page_numbers: missing.iter().map(|&i| i + 1).collect(),
            name_prefix: Some(story.id.clone()),
        };

        let images = self.agent.generate_story_images(&batch).await;
        if let Some(cover) = images.cover_url {
            story.cover_image_url = Some(cover);
        }
        for (&i, url) in missing.iter().zip(images.page_urls) {
            story.pages[i].image_url = Some(url);
        }
    }

    async fn make_durable(&self, story: &mut StoryDraft) {
        if let Some(url) = story.cover_image_url.clone().filter(|u| !u.trim().is_empty()) {
            let hint = format!("{}-cover", story.id);
            story.cover_image_url = Some(self.durable_or_original(&url, &hint).await);
        }
        for (i, page) in story.pages.iter_mut().enumerate() {
            if let Some(url) = page.image_url.clone().filter(|u| !u.trim().is_empty()) {
                let hint = format!("{}-page-{}", story.id, i + 1);
                page.image_url = Some(self.durable_or_original(&url, &hint).await);
            }
        }
    }

    /// A remote URL that could not be re-hosted is kept so a later repair can
    /// still migrate it. Anything else falls back to the placeholder.
    async fn durable_or_original(&self, url: &str, hint: &str) -> String {
        let Some(source) = ImageSource::parse(url) else {
            return default_placeholder();
        };
        match self.store.try_save(&source, Some(hint)).await {
            Ok(durable) => durable,
            Err(e) if is_remote_url(&source) => {
                warn!("Keeping {} until it can be re-hosted: {}", url, e);
                self.notifier
                    .error("An illustration could not be saved permanently yet; it will be retried");
                url.to_string()
            }
            Err(e) => {
                error!("Could not store {} image permanently: {}", source.kind(), e);
                self.notifier
                    .error("An illustration could not be saved permanently; showing placeholder art");
                default_placeholder()
            }
        }
    }

    async fn persist(&self, story: &StoryDraft) {
        if let Err(e) = self.repository.save(story).await {
            let failure = ImageError::PersistenceFailed {
                story_id: story.id.clone(),
                reason: format!("{:#}", e),
            };
            error!("{}", failure);
            self.notifier
                .error("Your story's images could not be saved and may be lost on reload");
        }
        if let Err(e) = self.offline.save(story).await {
            warn!("Failed to update offline copy of {}: {:#}", story.id, e);
        }
    }

    // --- Stored stories ---

    /// Reads a story from the repository, falling back to the offline copy.
    pub async fn fetch_story(&self, story_id: &str) -> Result<StoryDraft> {
        match self.repository.load(story_id).await {
            Ok(story) => Ok(story),
            Err(e) => {
                warn!("Loading {} from the repository failed ({:#}); trying offline copy", story_id, e);
                self.offline
                    .load(story_id)
                    .await
                    .with_context(|| format!("Story {} is unavailable", story_id))
            }
        }
    }

    pub async fn load_story(&self, story_id: &str) -> Result<StoryDraft> {
        let story = self.fetch_story(story_id).await?;
        Ok(self.repair_story(story).await)
    }

    /// Checks the stored image links and rewrites only the ones that were fixed.
    /// Never generates new illustrations.
    pub async fn repair_story(&self, mut story: StoryDraft) -> StoryDraft {
        if !self.begin(&story.id).await {
            info!("Story {} already checked", story.id);
            return story;
        }

        let Some(result) = self.checker.check_urls(&story.image_urls()).await else {
            // Another batch holds the checker; leave the story eligible.
            self.reset(&story.id).await;
            return story;
        };
        if result.fixed_urls.is_empty() {
            return story;
        }

        let changed = story.apply_url_fixes(&result.fixed_urls);
        info!("Story {}: rewrote {} image link(s)", story.id, changed);
        if changed > 0 {
            self.persist(&story).await;
        }
        story
    }
}

fn is_remote_url(source: &ImageSource) -> bool {
    match source {
        ImageSource::Url(url) => url::Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false),
        _ => false,
    }
}
