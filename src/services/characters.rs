use crate::core::io::Storage;
use crate::core::state::{CharacterReferenceMap, CharacterVisualReference};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-character visual references. A reference is written at most once per
/// character; later writes for the same name are refused.
#[async_trait]
pub trait CharacterReferenceStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<CharacterVisualReference>>;

    /// Stores `reference` unless the character already has one.
    /// Returns whether the write happened.
    async fn set_if_absent(&self, reference: CharacterVisualReference) -> Result<bool>;
}

fn character_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Keeps references in one JSON document per scope, cached in memory after
/// the first read.
pub struct StorageCharacterStore {
    storage: Arc<dyn Storage>,
    path: String,
    cache: Mutex<Option<CharacterReferenceMap>>,
}

impl StorageCharacterStore {
    pub fn new(storage: Arc<dyn Storage>, scope: &str) -> Self {
        let scope = if scope.trim().is_empty() { "global" } else { scope.trim() };
        Self {
            storage,
            path: format!("characters/{}.json", scope),
            cache: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<CharacterReferenceMap> {
        if self.storage.exists(&self.path).await? {
            let content = self.storage.read_string(&self.path).await?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", self.path))
        } else {
            Ok(CharacterReferenceMap::default())
        }
    }

    async fn save(&self, map: &CharacterReferenceMap) -> Result<()> {
        let content = serde_json::to_string_pretty(map)?;
        self.storage.write(&self.path, content.as_bytes()).await
    }
}

#[async_trait]
impl CharacterReferenceStore for StorageCharacterStore {
    async fn get(&self, name: &str) -> Result<Option<CharacterVisualReference>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        Ok(cache
            .as_ref()
            .and_then(|map| map.characters.get(&character_key(name)).cloned()))
    }

    async fn set_if_absent(&self, reference: CharacterVisualReference) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        let mut map = match cache.take() {
            Some(map) => map,
            None => self.load().await?,
        };

        let key = character_key(&reference.name);
        if map.characters.contains_key(&key) {
            debug!("Character '{}' already has a reference image", reference.name);
            *cache = Some(map);
            return Ok(false);
        }

        info!(
            "Saving reference image for '{}': {}",
            reference.name, reference.reference_image_url
        );
        map.characters.insert(key.clone(), reference);
        let saved = self.save(&map).await;
        if saved.is_err() {
            // Keep memory consistent with disk.
            map.characters.remove(&key);
        }
        *cache = Some(map);
        saved.map(|_| true)
    }
}
