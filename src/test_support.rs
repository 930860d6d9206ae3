//! In-memory doubles for the network seams.

use crate::core::notify::{NotifyLevel, Notifier};
use crate::core::state::GenerationStatus;
use crate::services::hosting::{ImageFetcher, ImageHost, UploadPayload};
use crate::services::illustration::{GenerationRequest, IllustrationProvider, JobPoll};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const VALID_KEY: &str = "leonardo-test-key-0123456789";

// --- Host ---

pub struct MockHost {
    configured: bool,
    rejects_urls: bool,
    fail_remaining: AtomicU32,
    always_fail: AtomicBool,
    attempts: AtomicUsize,
    uploads: Mutex<Vec<UploadPayload>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            configured: true,
            rejects_urls: false,
            fail_remaining: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(n: u32) -> Self {
        let host = Self::new();
        host.fail_remaining.store(n, Ordering::SeqCst);
        host
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Accepts base64 uploads only, like a host that cannot reach the source.
    pub fn rejecting_urls() -> Self {
        Self {
            rejects_urls: true,
            ..Self::new()
        }
    }

    pub fn set_remaining_failures(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }

    /// Every upload attempt, failed ones included.
    pub fn upload_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<UploadPayload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageHost for MockHost {
    async fn upload(&self, payload: &UploadPayload, _name: Option<&str>) -> Result<String> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.uploads.lock().unwrap().push(payload.clone());

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(anyhow!("imgbb is down"));
        }
        if self.rejects_urls && matches!(payload, UploadPayload::Url(_)) {
            return Err(anyhow!("imgbb could not fetch the source url"));
        }
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("imgbb returned 503"));
        }
        Ok(format!("https://i.ibb.co/mock{}/image.png", n))
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

// --- Fetcher ---

pub struct MockFetcher {
    payload: Vec<u8>,
    dead: HashSet<String>,
    gate: Option<Arc<Notify>>,
    probes: AtomicUsize,
    fetches: AtomicUsize,
}

impl MockFetcher {
    /// Every URL answers with a 256-byte PNG-looking body.
    pub fn new() -> Self {
        let mut payload = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        payload.resize(256, 0);
        Self::with_payload(payload)
    }

    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self {
            payload,
            dead: HashSet::new(),
            gate: None,
            probes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_dead(mut self, urls: &[&str]) -> Self {
        self.dead.extend(urls.iter().map(|u| u.to_string()));
        self
    }

    /// Probes block until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn probe(&self, url: &str) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(!self.dead.contains(url))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.dead.contains(url) {
            return Err(anyhow!("404 Not Found: {}", url));
        }
        Ok(self.payload.clone())
    }
}

// --- Provider ---

pub struct MockProvider {
    credential: Option<String>,
    offline: bool,
    failing_submits: AtomicU32,
    failing_jobs: HashSet<u32>,
    pending_polls: u32,
    next_job: AtomicU32,
    connectivity_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    polls_per_job: Mutex<HashMap<u32, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new(credential: Option<&str>) -> Self {
        Self {
            credential: credential.map(str::to_string),
            offline: false,
            failing_submits: AtomicU32::new(0),
            failing_jobs: HashSet::new(),
            pending_polls: 0,
            next_job: AtomicU32::new(1),
            connectivity_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            polls_per_job: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn failing_submits(self, n: u32) -> Self {
        self.failing_submits.store(n, Ordering::SeqCst);
        self
    }

    /// Jobs (numbered from 1 in submission order) that end FAILED.
    pub fn failing_jobs(mut self, jobs: &[u32]) -> Self {
        self.failing_jobs.extend(jobs.iter().copied());
        self
    }

    /// Polls answered PENDING before each job completes.
    pub fn pending_polls(mut self, n: u32) -> Self {
        self.pending_polls = n;
        self
    }

    pub fn connectivity_count(&self) -> usize {
        self.connectivity_calls.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.connectivity_count() + self.submit_count() + self.poll_count()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IllustrationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn check_connectivity(&self) -> Result<()> {
        self.connectivity_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_submits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_submits.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("502 Bad Gateway"));
        }

        self.requests.lock().unwrap().push(request.clone());
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{}", n))
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let n: u32 = job_id
            .strip_prefix("job-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow!("unknown job {}", job_id))?;

        let polls = {
            let mut per_job = self.polls_per_job.lock().unwrap();
            let count = per_job.entry(n).or_insert(0);
            *count += 1;
            *count
        };

        if self.failing_jobs.contains(&n) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Ok(JobPoll {
                status: GenerationStatus::Failed,
                image_urls: Vec::new(),
            });
        }
        if polls <= self.pending_polls {
            return Ok(JobPoll {
                status: GenerationStatus::Pending,
                image_urls: Vec::new(),
            });
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(JobPoll {
            status: GenerationStatus::Complete,
            image_urls: vec![format!("https://cdn.leonardo.ai/users/mock/generations/{}.png", n)],
        })
    }
}

// --- Notifier ---

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(NotifyLevel, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(NotifyLevel, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self, level: NotifyLevel) -> usize {
        self.messages().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        self.messages.lock().unwrap().push((level, message.to_string()));
    }
}
