use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PAPERCRAFT_STYLE: &str = "papercraft";

fn default_style() -> String {
    PAPERCRAFT_STYLE.to_string()
}

// --- Story ---

/// A story as stored in the `stories` table: cover plus ordered pages.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoryDraft {
    pub id: String,
    pub title: String,
    pub character: CharacterIdentity,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    pub pages: Vec<PageDraft>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CharacterIdentity {
    pub name: String,
    #[serde(default)]
    pub visual_description_prompt: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PageDraft {
    pub text: String,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl PageDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

impl StoryDraft {
    /// Cover first, then pages in order; blank entries skipped.
    pub fn image_urls(&self) -> Vec<String> {
        self.cover_image_url
            .iter()
            .chain(self.pages.iter().filter_map(|p| p.image_url.as_ref()))
            .filter(|u| !u.trim().is_empty())
            .cloned()
            .collect()
    }

    pub fn missing_images(&self) -> bool {
        is_blank(&self.cover_image_url) || self.pages.iter().any(|p| is_blank(&p.image_url))
    }

    /// Replaces every URL found in `fixed`. Returns how many fields changed.
    pub fn apply_url_fixes(&mut self, fixed: &HashMap<String, String>) -> usize {
        let mut changed = 0;
        if let Some(new_url) = self.cover_image_url.as_ref().and_then(|u| fixed.get(u)) {
            self.cover_image_url = Some(new_url.clone());
            changed += 1;
        }
        for page in &mut self.pages {
            if let Some(new_url) = page.image_url.as_ref().and_then(|u| fixed.get(u)) {
                page.image_url = Some(new_url.clone());
                changed += 1;
            }
        }
        changed
    }

    /// Pages must exist and carry text before illustration is requested.
    pub fn validate_for_illustration(&self) -> anyhow::Result<()> {
        if self.pages.is_empty() {
            anyhow::bail!("story {} has no pages", self.id);
        }
        if let Some(i) = self.pages.iter().position(|p| p.text.trim().is_empty()) {
            anyhow::bail!("page {} of story {} has no text", i + 1, self.id);
        }
        Ok(())
    }
}

pub(crate) fn is_blank(url: &Option<String>) -> bool {
    url.as_deref().map_or(true, |u| u.trim().is_empty())
}

// --- Characters ---

/// Visual identity captured from the first successful illustration of a
/// character. Set once per character and never overwritten.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CharacterVisualReference {
    pub name: String,
    pub prompt_text: String,
    #[serde(default = "default_style")]
    pub style_name: String,
    pub model_id: String,
    pub reference_image_url: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct CharacterReferenceMap {
    pub characters: HashMap<String, CharacterVisualReference>,
}

// --- Generation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Pending,
    Complete,
    Failed,
}

impl GenerationStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" | "COMPLETED" | "SUCCEEDED" => Self::Complete,
            "FAILED" | "ERROR" | "CANCELLED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Ephemeral record of one provider job; discarded after resolution.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub provider_job_id: String,
    pub status: GenerationStatus,
    pub attempt_number: u32,
    pub started_at: std::time::Instant,
}

// --- URL checks ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageUrlCheckResult {
    pub total: usize,
    pub accessible: usize,
    pub fixed: usize,
    pub failed: usize,
    pub fixed_urls: HashMap<String, String>,
}
