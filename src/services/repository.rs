use crate::core::io::Storage;
use crate::core::state::StoryDraft;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

const STORIES_PREFIX: &str = "stories";

/// Row store for stories, addressed by id.
#[async_trait]
pub trait StoryRepository: Send + Sync {
    async fn load(&self, id: &str) -> Result<StoryDraft>;
    async fn save(&self, story: &StoryDraft) -> Result<()>;
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// One JSON document per story under `stories/`.
pub struct StorageStoryRepository {
    storage: Arc<dyn Storage>,
    prefix: String,
}

impl StorageStoryRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_prefix(storage, STORIES_PREFIX)
    }

    /// Same layout under another directory; used for the offline copy.
    pub fn with_prefix(storage: Arc<dyn Storage>, prefix: &str) -> Self {
        Self {
            storage,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}/{}.json", self.prefix, id)
    }
}

#[async_trait]
impl StoryRepository for StorageStoryRepository {
    async fn load(&self, id: &str) -> Result<StoryDraft> {
        let key = self.key(id);
        let content = self
            .storage
            .read_string(&key)
            .await
            .with_context(|| format!("Story {} not found", id))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", key))
    }

    async fn save(&self, story: &StoryDraft) -> Result<()> {
        let content = serde_json::to_string_pretty(story)?;
        self.storage
            .write(&self.key(&story.id), content.as_bytes())
            .await
            .with_context(|| format!("Failed to write story {}", story.id))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.prefix);
        Ok(self
            .storage
            .list(&self.prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect())
    }
}
