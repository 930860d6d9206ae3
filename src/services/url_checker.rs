use crate::core::error::ImageError;
use crate::core::notify::Notifier;
use crate::core::state::ImageUrlCheckResult;
use crate::services::hosting::ImageFetcher;
use crate::services::image_store::PermanentImageStore;
use crate::utils::retry::{retry, RetryPolicy};
use crate::utils::urls::{is_durable_host_url, is_ephemeral_provider_url, is_local_path, ImageSource};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Probes stored image URLs and migrates the ones that are dead or about to
/// expire. One batch at a time per instance.
pub struct UrlHealthChecker {
    fetcher: Arc<dyn ImageFetcher>,
    store: Arc<PermanentImageStore>,
    notifier: Arc<dyn Notifier>,
    probe_policy: RetryPolicy,
    in_progress: AtomicBool,
}

struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Outcome {
    Accessible,
    Fixed(String),
    Failed,
}

impl UrlHealthChecker {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        store: Arc<PermanentImageStore>,
        notifier: Arc<dyn Notifier>,
        probe_policy: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            probe_policy,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Returns `None` when another batch is already running on this instance.
    pub async fn check_urls(&self, urls: &[String]) -> Option<ImageUrlCheckResult> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("URL check already in progress, ignoring request");
            return None;
        }
        let _guard = InProgress(&self.in_progress);

        let mut seen = HashSet::new();
        let unique: Vec<&str> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .filter(|u| seen.insert(*u))
            .collect();

        let mut result = ImageUrlCheckResult {
            total: unique.len(),
            ..Default::default()
        };
        for url in unique {
            match self.check_one(url).await {
                Outcome::Accessible => result.accessible += 1,
                Outcome::Fixed(new_url) => {
                    result.fixed += 1;
                    result.fixed_urls.insert(url.to_string(), new_url);
                }
                Outcome::Failed => result.failed += 1,
            }
        }

        info!(
            "URL check: {} total, {} accessible, {} fixed, {} failed",
            result.total, result.accessible, result.fixed, result.failed
        );
        if result.fixed > 0 {
            self.notifier
                .success(&format!("Repaired {} image link(s)", result.fixed));
        }
        if result.failed > 0 {
            self.notifier
                .error(&format!("{} image(s) could not be recovered", result.failed));
        }
        Some(result)
    }

    async fn check_one(&self, url: &str) -> Outcome {
        if is_local_path(url) {
            return Outcome::Accessible;
        }

        let reachable = self.is_reachable(url).await;
        if is_durable_host_url(url) {
            if !reachable {
                warn!("Durable image {} did not answer; leaving it in place", url);
            }
            return Outcome::Accessible;
        }

        if reachable && !is_ephemeral_provider_url(url) {
            return Outcome::Accessible;
        }

        if reachable {
            debug!("Migrating live ephemeral URL {}", url);
        } else {
            debug!("Migrating unreachable URL {}", url);
        }
        match self
            .store
            .try_save(&ImageSource::Url(url.to_string()), None)
            .await
        {
            Ok(new_url) => Outcome::Fixed(new_url),
            Err(e) => {
                warn!("Could not migrate {}: {}", url, e);
                Outcome::Failed
            }
        }
    }

    async fn is_reachable(&self, url: &str) -> bool {
        retry(
            self.probe_policy,
            move |_| async move {
                match self.fetcher.probe(url).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(ImageError::FetchFailed {
                        url: url.to_string(),
                        reason: "not reachable".to_string(),
                    }),
                    Err(e) => Err(ImageError::FetchFailed {
                        url: url.to_string(),
                        reason: format!("{:#}", e),
                    }),
                }
            },
            ImageError::is_transient,
        )
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{NativeStorage, Storage};
    use crate::core::notify::NotifyLevel;
    use crate::services::image_store::ImageStoreSettings;
    use crate::test_support::{MockFetcher, MockHost, RecordingNotifier};
    use std::time::Duration;
    use tokio::sync::Notify;

    const EPHEMERAL: &str = "https://oaidalleapiprodscus.blob.core.windows.net/x.png";
    const DEAD: &str = "https://example.com/dead.png";

    struct Fixture {
        checker: UrlHealthChecker,
        host: Arc<MockHost>,
        fetcher: Arc<MockFetcher>,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    fn fixture(host: MockHost, fetcher: MockFetcher) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(dir.path()));
        let host = Arc::new(host);
        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(PermanentImageStore::new(
            host.clone(),
            fetcher.clone(),
            storage,
            notifier.clone(),
            ImageStoreSettings {
                upload_policy: RetryPolicy::new(3, Duration::ZERO),
                min_image_bytes: 100,
                prefer_local: false,
            },
        ));
        let checker = UrlHealthChecker::new(
            fetcher.clone(),
            store,
            notifier.clone(),
            RetryPolicy::once(),
        );
        Fixture {
            checker,
            host,
            fetcher,
            notifier,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_live_ephemeral_url_is_migrated() {
        let f = fixture(MockHost::new(), MockFetcher::new());

        let result = f.checker.check_urls(&[EPHEMERAL.to_string()]).await.unwrap();

        assert_eq!(result.fixed, 1);
        assert_eq!(result.accessible, 0);
        assert!(result.fixed_urls[EPHEMERAL].starts_with("https://i.ibb.co/"));
        assert_eq!(f.notifier.count(NotifyLevel::Success), 2);
    }

    #[tokio::test]
    async fn test_dead_url_migrated_when_host_works() {
        let f = fixture(MockHost::new(), MockFetcher::new().with_dead(&[DEAD]));

        let result = f.checker.check_urls(&[DEAD.to_string()]).await.unwrap();

        assert_eq!(result.fixed, 1);
        assert_eq!(result.failed, 0);
        assert!(result.fixed_urls.contains_key(DEAD));
    }

    #[tokio::test]
    async fn test_dead_url_counted_failed_when_migration_fails() {
        let f = fixture(MockHost::failing_first(100), MockFetcher::new().with_dead(&[DEAD]));

        let result = f.checker.check_urls(&[DEAD.to_string()]).await.unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.accessible, 0);
        assert!(result.fixed_urls.is_empty());
        assert_eq!(f.notifier.count(NotifyLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_durable_and_plain_urls_are_left_alone() {
        let durable = "https://i.ibb.co/abc/cover.png";
        let f = fixture(MockHost::new(), MockFetcher::new().with_dead(&[durable]));

        let urls = vec![
            durable.to_string(),
            "https://example.com/alive.png".to_string(),
            "/images/placeholders/space.jpg".to_string(),
        ];
        let result = f.checker.check_urls(&urls).await.unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.accessible, 3);
        assert_eq!(f.host.upload_count(), 0);
        // Local paths are never probed.
        assert_eq!(f.fetcher.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_and_blanks_are_dropped() {
        let f = fixture(MockHost::new(), MockFetcher::new());
        let urls = vec![
            EPHEMERAL.to_string(),
            " ".to_string(),
            String::new(),
            EPHEMERAL.to_string(),
        ];

        let result = f.checker.check_urls(&urls).await.unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.fixed, 1);
        assert_eq!(f.host.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_call_is_ignored() {
        let gate = Arc::new(Notify::new());
        let f = fixture(MockHost::new(), MockFetcher::new().gated(gate.clone()));
        let urls = vec!["https://example.com/alive.png".to_string()];

        let (first, second, _) = tokio::join!(
            f.checker.check_urls(&urls),
            f.checker.check_urls(&urls),
            async { gate.notify_one() },
        );

        assert_eq!(first.unwrap().accessible, 1);
        assert!(second.is_none());
        assert_eq!(f.fetcher.probe_count(), 1);

        // The guard is released once the batch finishes.
        gate.notify_one();
        assert!(f.checker.check_urls(&urls).await.is_some());
    }
}
