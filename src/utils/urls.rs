use base64::Engine;

// --- Host classification ---

/// Hosts whose URLs never expire.
pub const DURABLE_HOST_PATTERNS: &[&str] = &["i.ibb.co", "ibb.co/"];

/// Prefix of paths served by the application itself.
pub const LOCAL_PATH_PREFIX: &str = "/";

/// Generation-provider blob storage. URLs on these hosts expire after a short
/// window even when they still resolve today.
pub const EPHEMERAL_PROVIDER_PATTERNS: &[&str] = &[
    "oaidalleapiprodscus.blob.core.windows.net",
    "dalleprodsec.blob.core.windows.net",
    "cdn.leonardo.ai",
    "leonardo-cdn",
    "replicate.delivery",
    "generativelanguage.googleapis.com",
    "blob.core.windows.net",
];

pub fn is_durable_host_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    DURABLE_HOST_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Application-served path such as `/images/placeholders/space.jpg`.
pub fn is_local_path(url: &str) -> bool {
    let trimmed = url.trim();
    trimmed.starts_with(LOCAL_PATH_PREFIX) && !trimmed.starts_with("//")
}

/// Already durable: hosted on the durable image host or served locally.
pub fn is_known_durable(url: &str) -> bool {
    is_durable_host_url(url) || is_local_path(url)
}

pub fn is_ephemeral_provider_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    EPHEMERAL_PROVIDER_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Last `max_chars` characters of `input`, used as a stable cache key.
pub fn suffix_key(input: &str, max_chars: usize) -> String {
    let count = input.chars().count();
    input.chars().skip(count.saturating_sub(max_chars)).collect()
}

// --- Image sources ---

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Url(String),
    /// `data:<mime>;base64,<data>`; `data` is kept encoded.
    DataUri { mime: String, data: String },
    Binary { bytes: Vec<u8>, mime: String },
}

impl ImageSource {
    /// Classifies a string reference. Blank input yields `None`.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.to_ascii_lowercase().starts_with("data:") {
            return match split_data_uri(trimmed) {
                Some((mime, data)) => Some(Self::DataUri {
                    mime: mime.to_string(),
                    data: data.to_string(),
                }),
                None => Some(Self::Url(trimmed.to_string())),
            };
        }

        Some(Self::Url(trimmed.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Url(url) => url.trim().is_empty(),
            Self::DataUri { data, .. } => data.is_empty(),
            Self::Binary { bytes, .. } => bytes.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::DataUri { .. } => "data_uri",
            Self::Binary { .. } => "binary",
        }
    }
}

fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.get(5..)?;
    let comma = rest.find(',')?;
    let (header, data) = rest.split_at(comma);
    let mime = header.strip_suffix(";base64")?;
    let mime = if mime.is_empty() { "image/png" } else { mime };
    Some((mime, &data[1..]))
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Best-effort MIME sniffing from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.starts_with(&PNG_SIGNATURE) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}
