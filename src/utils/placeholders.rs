pub const DEFAULT_THEME: &str = "default";

const PLACEHOLDER_ROOT: &str = "/images/placeholders";

const KNOWN_THEMES: &[&str] = &[
    "adventure",
    "fantasy",
    "space",
    "ocean",
    "animals",
    "friendship",
];

/// Static artwork shown when neither generation nor migration produced an image.
pub fn placeholder_for_theme(theme: &str) -> String {
    let normalized = theme.trim().to_ascii_lowercase();
    let key = KNOWN_THEMES
        .iter()
        .find(|t| normalized.contains(*t))
        .copied()
        .unwrap_or(DEFAULT_THEME);
    format!("{}/{}.jpg", PLACEHOLDER_ROOT, key)
}

pub fn default_placeholder() -> String {
    placeholder_for_theme(DEFAULT_THEME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_lookup() {
        assert_eq!(placeholder_for_theme("Space"), "/images/placeholders/space.jpg");
        assert_eq!(
            placeholder_for_theme("under the ocean"),
            "/images/placeholders/ocean.jpg"
        );
        assert_eq!(placeholder_for_theme("cooking"), default_placeholder());
    }
}
