use crate::core::config::HostingConfig;
use crate::core::error::ImageError;
use crate::core::io::Storage;
use crate::core::notify::Notifier;
use crate::services::hosting::{ImageFetcher, ImageHost, UploadPayload};
use crate::utils::placeholders::default_placeholder;
use crate::utils::retry::{retry, RetryPolicy};
use crate::utils::urls::{
    decode_base64, encode_base64, extension_for_mime, is_ephemeral_provider_url,
    is_known_durable, sniff_mime, suffix_key, ImageSource,
};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const URL_CACHE_PREFIX: &str = "url-cache";
const LOCAL_IMAGE_PREFIX: &str = "local-images";
const CACHE_KEY_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct ImageStoreSettings {
    pub upload_policy: RetryPolicy,
    pub min_image_bytes: usize,
    pub prefer_local: bool,
}

impl From<&HostingConfig> for ImageStoreSettings {
    fn from(config: &HostingConfig) -> Self {
        Self {
            upload_policy: config.upload_policy(),
            min_image_bytes: config.min_image_bytes,
            prefer_local: config.prefer_local,
        }
    }
}

/// Image bytes or a remote reference, ready to hand to a store.
enum Prepared {
    Bytes { bytes: Vec<u8>, mime: String },
    RemoteUrl(String),
}

/// Turns any image reference into a URL that does not expire.
pub struct PermanentImageStore {
    host: Arc<dyn ImageHost>,
    fetcher: Arc<dyn ImageFetcher>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    settings: ImageStoreSettings,
}

impl PermanentImageStore {
    pub fn new(
        host: Arc<dyn ImageHost>,
        fetcher: Arc<dyn ImageFetcher>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        settings: ImageStoreSettings,
    ) -> Self {
        Self {
            host,
            fetcher,
            storage,
            notifier,
            settings,
        }
    }

    /// Always yields a usable URL: the durable one when possible, a cached
    /// earlier result next, the default placeholder last.
    pub async fn save_image_permanently(&self, source: &ImageSource, name_hint: Option<&str>) -> String {
        match self.try_save(source, name_hint).await {
            Ok(url) => url,
            Err(e) => {
                error!("Could not store {} image permanently: {}", source.kind(), e);
                self.notifier
                    .error("An illustration could not be saved permanently; showing placeholder art");
                default_placeholder()
            }
        }
    }

    pub async fn save_url_permanently(&self, url: &str, name_hint: Option<&str>) -> String {
        match ImageSource::parse(url) {
            Some(source) => self.save_image_permanently(&source, name_hint).await,
            None => {
                warn!("Empty image reference, using placeholder");
                default_placeholder()
            }
        }
    }

    /// Durable URL or the reason none could be produced. Known-durable URLs
    /// are returned unchanged.
    pub async fn try_save(&self, source: &ImageSource, name_hint: Option<&str>) -> Result<String, ImageError> {
        if source.is_empty() {
            return Err(ImageError::EmptySource);
        }
        if let ImageSource::Url(url) = source {
            if is_known_durable(url) {
                return Ok(url.clone());
            }
        }

        let cache_key = cache_key_for(source, name_hint);
        match self.persist(source, name_hint).await {
            Ok(url) => {
                self.remember(&cache_key, &url).await;
                Ok(url)
            }
            Err(e) => {
                warn!("Permanent storage failed ({}), checking cache", e);
                match self.lookup(&cache_key).await {
                    Some(url) => {
                        info!("Using cached durable URL {}", url);
                        Ok(url)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn persist(&self, source: &ImageSource, name_hint: Option<&str>) -> Result<String, ImageError> {
        let prepared = self.prepare(source).await?;

        if self.settings.prefer_local {
            if let Prepared::Bytes { bytes, mime } = &prepared {
                match self.store_locally(bytes, mime, name_hint).await {
                    Ok(url) => return Ok(url),
                    Err(e) => warn!("{}; falling back to remote host", e),
                }
            }
        }

        let payload = match prepared {
            Prepared::Bytes { bytes, .. } => UploadPayload::Base64(encode_base64(&bytes)),
            Prepared::RemoteUrl(url) => UploadPayload::Url(url),
        };
        let url = self.upload(&payload, name_hint).await?;
        self.notifier.success("Illustration saved permanently");
        Ok(url)
    }

    async fn prepare(&self, source: &ImageSource) -> Result<Prepared, ImageError> {
        match source {
            ImageSource::Url(url) => {
                let parsed = url::Url::parse(url).map_err(|e| ImageError::FetchFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ImageError::FetchFailed {
                        url: url.clone(),
                        reason: format!("unsupported scheme '{}'", parsed.scheme()),
                    });
                }

                if !is_ephemeral_provider_url(url) {
                    return Ok(Prepared::RemoteUrl(url.clone()));
                }

                debug!("Downloading ephemeral image before re-hosting: {}", url);
                let bytes = self.fetcher.fetch(url).await.map_err(|e| ImageError::FetchFailed {
                    url: url.clone(),
                    reason: format!("{:#}", e),
                })?;
                self.check_size(url, &bytes)?;
                let mime = sniff_mime(&bytes).to_string();
                Ok(Prepared::Bytes { bytes, mime })
            }
            ImageSource::DataUri { mime, data } => {
                let bytes = decode_base64(data).map_err(|_| ImageError::FetchCorrupt {
                    url: "data uri".to_string(),
                    size: data.len(),
                })?;
                self.check_size("data uri", &bytes)?;
                Ok(Prepared::Bytes {
                    bytes,
                    mime: mime.clone(),
                })
            }
            ImageSource::Binary { bytes, mime } => {
                self.check_size("binary", bytes)?;
                Ok(Prepared::Bytes {
                    bytes: bytes.clone(),
                    mime: mime.clone(),
                })
            }
        }
    }

    fn check_size(&self, origin: &str, bytes: &[u8]) -> Result<(), ImageError> {
        if bytes.len() < self.settings.min_image_bytes {
            return Err(ImageError::FetchCorrupt {
                url: origin.to_string(),
                size: bytes.len(),
            });
        }
        Ok(())
    }

    async fn upload(&self, payload: &UploadPayload, name_hint: Option<&str>) -> Result<String, ImageError> {
        if !self.host.is_configured() {
            return Err(ImageError::UploadFailed("durable host has no API key".to_string()));
        }

        let max_attempts = self.settings.upload_policy.max_attempts;
        retry(
            self.settings.upload_policy,
            move |attempt| async move {
                if attempt > 1 {
                    warn!("Retrying upload (attempt {}/{})", attempt, max_attempts);
                }
                self.host
                    .upload(payload, name_hint)
                    .await
                    .map_err(|e| ImageError::UploadFailed(format!("{:#}", e)))
            },
            ImageError::is_transient,
        )
        .await
    }

    async fn store_locally(&self, bytes: &[u8], mime: &str, name_hint: Option<&str>) -> Result<String, ImageError> {
        let name = match name_hint.map(sanitize_name).filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => hex::encode(&Sha256::digest(bytes)[..16]),
        };
        let key = format!("{}/{}.{}", LOCAL_IMAGE_PREFIX, name, extension_for_mime(mime));
        self.storage
            .write(&key, bytes)
            .await
            .map_err(|e| ImageError::LocalStoreFailed(format!("{:#}", e)))?;
        debug!("Stored image locally at {}", key);
        Ok(format!("/{}", key))
    }

    async fn remember(&self, cache_key: &str, url: &str) {
        if let Err(e) = self.storage.write(&cache_path(cache_key), url.as_bytes()).await {
            warn!("Failed to cache durable URL: {:#}", e);
        }
    }

    async fn lookup(&self, cache_key: &str) -> Option<String> {
        let path = cache_path(cache_key);
        if !matches!(self.storage.exists(&path).await, Ok(true)) {
            return None;
        }
        let cached = self.storage.read_string(&path).await.ok()?;
        let cached = cached.trim();
        if is_known_durable(cached) {
            return Some(cached.to_string());
        }

        // Unusable entry: drop it so the next success rewrites it.
        warn!("Discarding unusable cache entry for {}", cache_key);
        if let Err(e) = self.storage.delete(&path).await {
            warn!("Failed to discard cache entry: {:#}", e);
        }
        None
    }
}

fn cache_key_for(source: &ImageSource, name_hint: Option<&str>) -> String {
    if let Some(hint) = name_hint.map(str::trim).filter(|h| !h.is_empty()) {
        return format!("hint:{}", hint);
    }
    match source {
        ImageSource::Url(url) => suffix_key(url, CACHE_KEY_CHARS),
        ImageSource::DataUri { data, .. } => suffix_key(data, CACHE_KEY_CHARS),
        ImageSource::Binary { bytes, .. } => hex::encode(Sha256::digest(bytes)),
    }
}

fn cache_path(cache_key: &str) -> String {
    format!("{}/{}", URL_CACHE_PREFIX, hex::encode(Sha256::digest(cache_key.as_bytes())))
}

fn sanitize_name(hint: &str) -> String {
    hint.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::test_support::{MockFetcher, MockHost, RecordingNotifier};
    use std::time::Duration;

    struct Fixture {
        store: PermanentImageStore,
        host: Arc<MockHost>,
        fetcher: Arc<MockFetcher>,
        storage: Arc<dyn Storage>,
        _dir: tempfile::TempDir,
    }

    fn fixture(host: MockHost, fetcher: MockFetcher, prefer_local: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(dir.path()));
        let host = Arc::new(host);
        let fetcher = Arc::new(fetcher);
        let store = PermanentImageStore::new(
            host.clone(),
            fetcher.clone(),
            storage.clone(),
            Arc::new(RecordingNotifier::default()),
            ImageStoreSettings {
                upload_policy: RetryPolicy::new(3, Duration::ZERO),
                min_image_bytes: 100,
                prefer_local,
            },
        );
        Fixture {
            store,
            host,
            fetcher,
            storage,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_durable_urls_are_returned_unchanged() {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);
        for url in [
            "https://i.ibb.co/abc/cover.png",
            "/images/placeholders/space.jpg",
        ] {
            assert_eq!(f.store.save_url_permanently(url, None).await, url);
        }
        assert_eq!(f.host.upload_count(), 0);
        assert_eq!(f.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_ephemeral_url_is_downloaded_and_uploaded() {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);
        let url = "https://oaidalleapiprodscus.blob.core.windows.net/private/img.png";

        let saved = f.store.save_url_permanently(url, Some("cover")).await;

        assert!(saved.starts_with("https://i.ibb.co/"));
        assert_eq!(f.fetcher.fetch_count(), 1);
        assert!(matches!(f.host.uploads()[0], UploadPayload::Base64(_)));
    }

    #[tokio::test]
    async fn test_other_remote_url_is_handed_to_host() {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);
        let saved = f.store.save_url_permanently("https://example.com/a.png", None).await;

        assert!(saved.starts_with("https://i.ibb.co/"));
        assert_eq!(f.fetcher.fetch_count(), 0);
        assert_eq!(
            f.host.uploads(),
            vec![UploadPayload::Url("https://example.com/a.png".to_string())]
        );
    }

    #[tokio::test]
    async fn test_upload_retries_then_succeeds() {
        let f = fixture(MockHost::failing_first(2), MockFetcher::new(), false);
        let saved = f.store.save_url_permanently("https://example.com/a.png", None).await;

        assert!(saved.starts_with("https://i.ibb.co/"));
        assert_eq!(f.host.upload_count(), 3);
    }

    #[tokio::test]
    async fn test_upload_exhaustion_falls_back_to_placeholder() {
        let f = fixture(MockHost::failing_first(10), MockFetcher::new(), false);
        let saved = f.store.save_url_permanently("https://example.com/a.png", None).await;

        assert_eq!(saved, default_placeholder());
        assert_eq!(f.host.upload_count(), 3);
    }

    #[tokio::test]
    async fn test_cached_url_used_when_upload_fails_later() {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);
        let first = f.store.save_url_permanently("https://example.com/a.png", Some("page-1")).await;

        f.host.set_failing(true);
        let second = f.store.save_url_permanently("https://example.com/a.png", Some("page-1")).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unusable_cache_entry_is_discarded() -> anyhow::Result<()> {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);
        let path = cache_path("hint:page-2");
        f.storage.write(&path, b"  \n").await?;

        f.host.set_failing(true);
        let saved = f.store.save_url_permanently("https://example.com/b.png", Some("page-2")).await;

        assert_eq!(saved, default_placeholder());
        assert!(!f.storage.exists(&path).await?);

        f.host.set_failing(false);
        let saved = f.store.save_url_permanently("https://example.com/b.png", Some("page-2")).await;
        assert_eq!(f.storage.read_string(&path).await?, saved);
        Ok(())
    }

    #[tokio::test]
    async fn test_data_uri_is_uploaded_as_base64() {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);
        let data = encode_base64(&[9u8; 150]);
        let uri = format!("data:image/png;base64,{}", data);

        let saved = f.store.save_url_permanently(&uri, Some("cover")).await;

        assert!(saved.starts_with("https://i.ibb.co/"));
        assert_eq!(f.fetcher.fetch_count(), 0);
        assert_eq!(f.host.uploads(), vec![UploadPayload::Base64(data)]);
    }

    #[tokio::test]
    async fn test_tiny_download_is_rejected() {
        let f = fixture(MockHost::new(), MockFetcher::with_payload(vec![1, 2, 3]), false);
        let url = "https://cdn.leonardo.ai/users/u/generations/g/x.jpg";

        let err = f.store.try_save(&ImageSource::Url(url.to_string()), None).await.unwrap_err();
        assert_eq!(err, ImageError::FetchCorrupt { url: url.to_string(), size: 3 });
        assert_eq!(f.host.upload_count(), 0);
        assert_eq!(f.store.save_url_permanently(url, None).await, default_placeholder());
    }

    #[tokio::test]
    async fn test_garbage_inputs_still_resolve() {
        let f = fixture(MockHost::new(), MockFetcher::new(), false);

        assert_eq!(f.store.save_url_permanently("", None).await, default_placeholder());
        assert_eq!(
            f.store.save_url_permanently("data:image/png;base64,!!!notbase64", None).await,
            default_placeholder()
        );
        assert_eq!(f.store.save_url_permanently("blob:abc", None).await, default_placeholder());
        let empty = ImageSource::Binary { bytes: vec![], mime: "image/png".to_string() };
        assert_eq!(f.store.save_image_permanently(&empty, None).await, default_placeholder());
    }

    #[tokio::test]
    async fn test_unconfigured_host_never_calls_network() {
        let f = fixture(MockHost::unconfigured(), MockFetcher::new(), false);
        let saved = f.store.save_url_permanently("https://example.com/a.png", None).await;

        assert_eq!(saved, default_placeholder());
        assert_eq!(f.host.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_prefer_local_keeps_bytes_on_disk() -> anyhow::Result<()> {
        let f = fixture(MockHost::new(), MockFetcher::new(), true);
        let source = ImageSource::Binary {
            bytes: vec![7u8; 256],
            mime: "image/jpeg".to_string(),
        };

        let saved = f.store.save_image_permanently(&source, Some("story 1/cover")).await;

        assert_eq!(saved, "/local-images/story_1_cover.jpg");
        assert!(f.storage.exists("local-images/story_1_cover.jpg").await?);
        assert_eq!(f.host.upload_count(), 0);
        Ok(())
    }
}
