//! Background evidence publication.
//!
//! `EvidencePublisher` runs a worker thread that uploads the captured
//! image to the evidence store and then posts the inspection result to
//! the webhook.
//!
//! The publisher is responsible for:
//! - Uploading evidence and obtaining its URL before any notification
//! - Delivering results with the notifier's retry policy
//! - Dropping work instead of blocking when the queue is full
//!
//! The publisher MUST NOT:
//! - Block `publish()` on network I/O
//! - Call the webhook without a valid evidence URL
//! - Surface failures to the trigger path (log output only)

mod storage;
mod webhook;

pub use storage::{EvidenceStore, HttpObjectStore, InMemoryStore};
pub use webhook::{derive_confidence, WebhookNotifier, WebhookPayload};

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::detect::InspectionResult;

/// Queued publications before new evidence starts being dropped.
const DEFAULT_QUEUE_CAPACITY: usize = 32;

struct PublishJob {
    result: InspectionResult,
    image: Vec<u8>,
}

/// Fire-and-forget publisher: upload first, then notify.
pub struct EvidencePublisher {
    tx: Option<SyncSender<PublishJob>>,
    abort: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl EvidencePublisher {
    pub fn spawn(store: Arc<dyn EvidenceStore>, notifier: WebhookNotifier) -> Result<Self> {
        Self::spawn_with_capacity(store, notifier, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(
        store: Arc<dyn EvidenceStore>,
        notifier: WebhookNotifier,
        capacity: usize,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let abort = notifier.abort_handle();
        let worker_abort = Arc::clone(&abort);
        let join = std::thread::Builder::new()
            .name("evidence-publisher".to_string())
            .spawn(move || run_worker(rx, store, notifier, worker_abort))
            .context("spawn evidence publisher thread")?;
        Ok(Self {
            tx: Some(tx),
            abort,
            join: Some(join),
        })
    }

    /// Queue one publication and return immediately. The job owns its own
    /// copy of the result and image bytes. A full queue drops the job.
    pub fn publish(&self, result: InspectionResult, image: Vec<u8>) {
        let Some(tx) = &self.tx else {
            log::warn!("EvidencePublisher: already stopped, dropping evidence");
            return;
        };
        match tx.try_send(PublishJob { result, image }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::warn!(
                    "EvidencePublisher: queue full, dropping {} evidence",
                    job.result.verdict
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("EvidencePublisher: worker gone, dropping evidence");
            }
        }
    }

    /// Stop the worker. Idempotent. Queued jobs are abandoned and any
    /// in-flight webhook backoff is cut short.
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for EvidencePublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    rx: Receiver<PublishJob>,
    store: Arc<dyn EvidenceStore>,
    notifier: WebhookNotifier,
    abort: Arc<AtomicBool>,
) {
    while let Ok(job) = rx.recv() {
        if abort.load(Ordering::SeqCst) {
            log::info!("EvidencePublisher: shutdown requested, abandoning queued evidence");
            break;
        }
        let url = match store.put(&job.image, "image/jpeg") {
            Ok(url) => url,
            Err(err) => {
                log::error!("EvidencePublisher: evidence upload failed: {:#}", err);
                continue;
            }
        };
        log::info!("EvidencePublisher: evidence stored at {}", url);
        if let Err(err) = notifier.send(&job.result, &url) {
            log::error!("EvidencePublisher: result delivery failed: {:#}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Verdict;
    use std::time::{Duration, Instant};

    fn pass_result() -> InspectionResult {
        InspectionResult {
            verdict: Verdict::Pass,
            defects: vec![],
            confidence: None,
            predicted_class: None,
            model_name: "stub".to_string(),
            inference_time: 0.0,
        }
    }

    #[test]
    fn publisher_uploads_queued_evidence() -> Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let notifier = WebhookNotifier::new(None, "TEST_01".to_string());
        let mut publisher = EvidencePublisher::spawn(Arc::clone(&store) as _, notifier)?;

        publisher.publish(pass_result(), vec![0xFF, 0xD8, 0xFF]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        publisher.stop();
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent_and_later_publishes_are_dropped() -> Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let notifier = WebhookNotifier::new(None, "TEST_01".to_string());
        let mut publisher = EvidencePublisher::spawn(Arc::clone(&store) as _, notifier)?;
        publisher.stop();
        publisher.stop();
        publisher.publish(pass_result(), vec![1, 2, 3]);
        assert!(store.is_empty());
        Ok(())
    }
}
