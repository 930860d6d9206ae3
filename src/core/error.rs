use thiserror::Error;

/// Failure kinds produced inside the image subsystem. Each is caught at the
/// component that raised it and turned into a fallback URL or a counted
/// failure; none escapes a public operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageError {
    #[error("illustration provider credential is missing or malformed")]
    CredentialMissingOrInvalid,
    #[error("illustration provider is unreachable: {0}")]
    ProviderUnreachable(String),
    #[error("illustration job {job_id} failed")]
    ProviderJobFailed { job_id: String },
    #[error("illustration job {job_id} did not finish after {attempts} polls")]
    ProviderTimeout { job_id: String, attempts: u32 },
    #[error("illustration job {job_id} is still pending")]
    JobPending { job_id: String },
    #[error("upload to durable host failed: {0}")]
    UploadFailed(String),
    #[error("image fetched from {url} is implausibly small ({size} bytes)")]
    FetchCorrupt { url: String, size: usize },
    #[error("fetching {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },
    #[error("local image store failed: {0}")]
    LocalStoreFailed(String),
    #[error("image source is empty")]
    EmptySource,
    #[error("persisting story {story_id} failed: {reason}")]
    PersistenceFailed { story_id: String, reason: String },
}

impl ImageError {
    /// Transient failures worth another attempt under a retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnreachable(_)
                | Self::JobPending { .. }
                | Self::UploadFailed(_)
                | Self::FetchFailed { .. }
        )
    }
}
