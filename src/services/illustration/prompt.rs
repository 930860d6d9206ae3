use crate::core::state::PAPERCRAFT_STYLE;

const PAPERCRAFT_SUFFIX: &str = "Papercraft illustration style: layered cut-paper shapes, \
soft drop shadows between paper layers, visible paper texture, bright friendly colors, \
children's picture book art.";

pub const NEGATIVE_PROMPT: &str = "photorealistic, 3d render, text, watermark, signature, \
deformed, extra limbs, scary, dark";

const MAX_CONTEXT_CHARS: usize = 400;
const MAX_PAGE_TEXT_CHARS: usize = 500;

pub struct PromptParts<'a> {
    pub scene: &'a str,
    pub character_name: &'a str,
    pub character_description: Option<&'a str>,
    pub theme: &'a str,
    pub setting: &'a str,
    pub style: &'a str,
    pub story_context: Option<&'a str>,
}

/// Final prompt: scene, character description, style suffix (unless the
/// scene already names the style), then the consistency instruction.
pub fn build_prompt(parts: &PromptParts) -> String {
    let mut sections = vec![parts.scene.trim().to_string()];

    if let Some(description) = parts.character_description.map(str::trim).filter(|d| !d.is_empty()) {
        sections.push(format!("{} is {}.", parts.character_name, description.trim_end_matches('.')));
    }

    let setting = parts.setting.trim();
    let theme = parts.theme.trim();
    if !setting.is_empty() || !theme.is_empty() {
        sections.push(format!(
            "Setting: {}. Theme: {}.",
            if setting.is_empty() { "unspecified" } else { setting },
            if theme.is_empty() { "unspecified" } else { theme }
        ));
    }

    if let Some(context) = parts.story_context.map(str::trim).filter(|c| !c.is_empty()) {
        sections.push(format!("Story context: {}", truncate_chars(context, MAX_CONTEXT_CHARS)));
    }

    let style = if parts.style.trim().is_empty() {
        PAPERCRAFT_STYLE
    } else {
        parts.style.trim()
    };
    let already_styled = sections
        .iter()
        .any(|s| s.to_lowercase().contains(&style.to_lowercase()));
    if !already_styled {
        sections.push(style_suffix(style));
    }

    sections.push(consistency_instruction(parts.character_name));
    sections.join("\n")
}

fn style_suffix(style: &str) -> String {
    if style.eq_ignore_ascii_case(PAPERCRAFT_STYLE) {
        PAPERCRAFT_SUFFIX.to_string()
    } else {
        format!("{} illustration style, children's picture book art.", style)
    }
}

pub fn consistency_instruction(character_name: &str) -> String {
    format!(
        "IMPORTANT: {} must look exactly the same as in every other illustration of this story: \
same face, hair, colors, clothing and proportions.",
        character_name
    )
}

pub fn page_prompt(text: &str, image_prompt: Option<&str>) -> String {
    match image_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prompt) => prompt.to_string(),
        None => format!(
            "Illustration for this moment of a children's story: {}",
            truncate_chars(text.trim(), MAX_PAGE_TEXT_CHARS)
        ),
    }
}

pub fn cover_prompt(title: &str, character_name: &str, setting: &str) -> String {
    format!(
        "Book cover illustration for \"{}\": {} standing front and center, full body, \
clearly visible face, in {}.",
        title.trim(),
        character_name,
        if setting.trim().is_empty() { "a cheerful landscape" } else { setting.trim() }
    )
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(scene: &'a str, description: Option<&'a str>) -> PromptParts<'a> {
        PromptParts {
            scene,
            character_name: "Pip",
            character_description: description,
            theme: "space",
            setting: "the moon",
            style: "papercraft",
            story_context: None,
        }
    }

    #[test]
    fn test_prompt_contains_every_section() {
        let prompt = build_prompt(&parts("Pip waves at a comet", Some("a small fox in a green scarf")));

        assert!(prompt.starts_with("Pip waves at a comet"));
        assert!(prompt.contains("Pip is a small fox in a green scarf."));
        assert!(prompt.contains("Setting: the moon. Theme: space."));
        assert!(prompt.contains("Papercraft illustration style"));
        assert!(prompt.ends_with(&consistency_instruction("Pip")));
    }

    #[test]
    fn test_style_suffix_not_duplicated() {
        let prompt = build_prompt(&parts("A papercraft scene of Pip", None));
        assert!(!prompt.contains("Papercraft illustration style"));
        assert!(prompt.contains(&consistency_instruction("Pip")));
    }

    #[test]
    fn test_page_prompt_prefers_explicit_brief() {
        assert_eq!(page_prompt("long text", Some(" brief ")), "brief");
        assert!(page_prompt("Pip jumps", None).ends_with("Pip jumps"));
        assert!(page_prompt(&"a".repeat(900), Some("")).chars().count() < 600);
    }
}
