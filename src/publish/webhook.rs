use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::detect::{InspectionResult, Verdict};

/// Delivery attempts per result, first try included.
const DELIVERY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound result notification, one per inspected item.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub batch_id: String,
    pub timestamp: String,
    pub verdict: Verdict,
    pub confidence: f32,
    pub evidence_url: String,
    pub device_id: String,
}

/// Confidence reported downstream when the inference result carries none
/// of its own: the strongest detection wins, else the verdict decides.
pub fn derive_confidence(result: &InspectionResult) -> f32 {
    if let Some(confidence) = result.confidence {
        return confidence;
    }
    let max_detection = result
        .defects
        .iter()
        .map(|defect| defect.confidence)
        .reduce(f32::max);
    match max_detection {
        Some(confidence) => confidence,
        None if result.verdict.is_fail() => 0.0,
        None => 1.0,
    }
}

/// Posts inspection results to the configured webhook.
///
/// Transport errors and 5xx responses are retried with exponential
/// backoff; 4xx rejections are final. Without a configured URL every send
/// is skipped, which is not an error.
pub struct WebhookNotifier {
    url: Option<String>,
    device_id: String,
    agent: ureq::Agent,
    attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    abort: Arc<AtomicBool>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, device_id: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self {
            url,
            device_id,
            agent,
            attempts: DELIVERY_ATTEMPTS,
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the attempt budget (minimum one).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Override backoff timing.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Flag that makes in-flight backoff sleeps return early on shutdown.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Deliver one result. A missing URL skips delivery.
    pub fn send(&self, result: &InspectionResult, evidence_url: &str) -> Result<()> {
        let Some(url) = &self.url else {
            log::warn!("Webhook URL not set. Skipping notification.");
            return Ok(());
        };

        let payload = WebhookPayload {
            batch_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            verdict: result.verdict,
            confidence: derive_confidence(result),
            evidence_url: evidence_url.to_string(),
            device_id: self.device_id.clone(),
        };
        let body = serde_json::to_string(&payload)?;

        let mut attempt = 1;
        let mut wait = self.backoff_base;
        loop {
            match self
                .agent
                .post(url)
                .set("Content-Type", "application/json")
                .send_string(&body)
            {
                Ok(response) => {
                    log::info!(
                        "WebhookNotifier: delivered batch {} ({}, status {})",
                        payload.batch_id,
                        payload.verdict,
                        response.status()
                    );
                    return Ok(());
                }
                Err(ureq::Error::Status(code, _)) if code < 500 => {
                    return Err(anyhow!(
                        "webhook rejected batch {} with status {}",
                        payload.batch_id,
                        code
                    ));
                }
                Err(err) if attempt >= self.attempts => {
                    return Err(anyhow!(
                        "webhook delivery failed after {} attempts: {}",
                        attempt,
                        err
                    ));
                }
                Err(err) => {
                    log::warn!(
                        "WebhookNotifier: attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        self.attempts,
                        err,
                        wait
                    );
                    self.sleep(wait);
                    wait = (wait * 2).min(self.backoff_cap);
                    attempt += 1;
                }
            }
        }
    }

    fn sleep(&self, duration: Duration) {
        let step = Duration::from_millis(50);
        let mut remaining = duration;
        while !self.abort.load(Ordering::SeqCst) && remaining > Duration::ZERO {
            let chunk = remaining.min(step);
            std::thread::sleep(chunk);
            remaining = remaining.saturating_sub(chunk);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn result_with(verdict: Verdict, defect_scores: &[f32], confidence: Option<f32>) -> InspectionResult {
        InspectionResult {
            verdict,
            defects: defect_scores
                .iter()
                .map(|&score| Detection {
                    x1: 0.0,
                    y1: 0.0,
                    x2: 10.0,
                    y2: 10.0,
                    confidence: score,
                    class_id: 0,
                    class_name: "tear".to_string(),
                })
                .collect(),
            confidence,
            predicted_class: None,
            model_name: "stub".to_string(),
            inference_time: 0.01,
        }
    }

    #[test]
    fn explicit_confidence_wins() {
        let result = result_with(Verdict::Fail, &[0.92], Some(0.7));
        assert_eq!(derive_confidence(&result), 0.7);
    }

    #[test]
    fn max_detection_confidence_is_the_fallback() {
        let result = result_with(Verdict::Fail, &[0.4, 0.92, 0.6], None);
        assert_eq!(derive_confidence(&result), 0.92);
    }

    #[test]
    fn clean_pass_scores_one() {
        let result = result_with(Verdict::Pass, &[], None);
        assert_eq!(derive_confidence(&result), 1.0);
    }

    #[test]
    fn clean_fail_scores_zero() {
        let result = result_with(Verdict::Fail, &[], None);
        assert_eq!(derive_confidence(&result), 0.0);
    }

    #[test]
    fn payload_serializes_all_fields() {
        let payload = WebhookPayload {
            batch_id: "b-1".to_string(),
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            verdict: Verdict::Fail,
            confidence: 0.92,
            evidence_url: "http://store/x.jpg".to_string(),
            device_id: "JETSON_01".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["batch_id"], "b-1");
        assert_eq!(json["verdict"], "FAIL");
        assert_eq!(json["device_id"], "JETSON_01");
        assert_eq!(json["evidence_url"], "http://store/x.jpg");
        assert!(json["confidence"].as_f64().is_some());
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn missing_url_skips_delivery() -> Result<()> {
        let notifier = WebhookNotifier::new(None, "JETSON_01".to_string());
        assert!(!notifier.is_configured());
        let result = result_with(Verdict::Fail, &[0.9], None);
        notifier.send(&result, "http://store/x.jpg")?;
        Ok(())
    }
}
