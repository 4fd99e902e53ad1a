use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vision_eye::api::{ApiConfig, ApiHandle, ApiServer};
use vision_eye::publish::{EvidencePublisher, InMemoryStore, WebhookNotifier};
use vision_eye::{
    CameraSettings, Frame, FrameSource, GpioSettings, InferenceSettings, InspectdConfig,
    InspectionBackend, StorageSettings, StubBackend, TriggerPipeline,
};

fn test_config() -> InspectdConfig {
    InspectdConfig {
        device_id: "TEST_01".to_string(),
        api_addr: "127.0.0.1:0".to_string(),
        camera: CameraSettings {
            device: "stub://test".to_string(),
            width: 64,
            height: 64,
        },
        gpio: GpioSettings {
            chip: "/dev/gpiochip0".to_string(),
            trigger_pin: 12,
            output_pin: 18,
            pulse: Duration::from_millis(1),
        },
        inference: InferenceSettings {
            model_path: None,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        },
        storage: StorageSettings {
            endpoint: "http://127.0.0.1:9000".to_string(),
            bucket: "evidence".to_string(),
            access_key: None,
            secret_key: None,
            region: "us-east-1".to_string(),
        },
        webhook_url: None,
    }
}

struct TestApi {
    pipeline: TriggerPipeline,
    store: Arc<InMemoryStore>,
    handle: Option<ApiHandle>,
}

impl TestApi {
    fn spawn() -> Result<Self> {
        let cfg = test_config();
        let camera = FrameSource::new(cfg.camera.clone())?;
        let detector: Box<dyn InspectionBackend> = Box::new(StubBackend::new());
        let store = Arc::new(InMemoryStore::new());
        let notifier = WebhookNotifier::new(None, cfg.device_id.clone());
        let publisher = EvidencePublisher::spawn(Arc::clone(&store) as _, notifier)?;
        let pipeline = TriggerPipeline::new(&cfg, camera, detector, publisher);
        pipeline.start()?;

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let handle = ApiServer::new(api_config, pipeline.clone()).spawn()?;
        Ok(Self {
            pipeline,
            store,
            handle: Some(handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("failed to stop API server");
        }
        self.pipeline.stop();
    }
}

fn send_request(addr: SocketAddr, request: &[u8]) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(request)?;
    read_response(&mut stream)
}

fn get(addr: SocketAddr, path: &str) -> Result<(String, String)> {
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    send_request(addr, request.as_bytes())
}

fn post(addr: SocketAddr, path: &str, content_type: &str, body: &[u8]) -> Result<(String, String)> {
    let mut request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    send_request(addr, &request)
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

#[test]
fn healthcheck_reports_ok() -> Result<()> {
    let api = TestApi::spawn()?;

    let (headers, body) = get(api.addr(), "/healthcheck")?;

    assert!(headers.contains("200 OK"));
    assert!(body.contains(r#""status":"ok""#));
    assert!(body.contains(r#""service":"vision-eye""#));
    Ok(())
}

#[test]
fn simulated_trigger_runs_an_inspection() -> Result<()> {
    let api = TestApi::spawn()?;

    let (headers, body) = post(api.addr(), "/api/v1/trigger/simulate", "text/plain", b"")?;

    assert!(headers.contains("200 OK"));
    assert!(body.contains(r#""status":"Trigger signal received""#));
    assert!(body.contains(r#""mode":"MOCK""#));

    // The placeholder frame fails the stub inspection, so evidence lands
    // in the store once the dispatcher has run the trigger.
    let deadline = Instant::now() + Duration::from_secs(2);
    while api.store.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(api.store.len(), 1);
    assert_eq!(api.pipeline.actuator_pulses(), 1);
    Ok(())
}

#[test]
fn predict_returns_the_inspection_result() -> Result<()> {
    let api = TestApi::spawn()?;
    let jpeg = Frame::placeholder().to_jpeg()?;

    let (headers, body) = post(api.addr(), "/api/v1/predict", "image/jpeg", &jpeg)?;

    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["verdict"], "FAIL");
    assert_eq!(value["model_name"], "stub");
    assert!(!value["defects"].as_array().expect("defects").is_empty());

    // Direct prediction must not actuate or publish.
    assert_eq!(api.pipeline.actuator_pulses(), 0);
    assert!(api.store.is_empty());
    Ok(())
}

#[test]
fn predict_rejects_non_image_payloads() -> Result<()> {
    let api = TestApi::spawn()?;

    let (headers, body) = post(api.addr(), "/api/v1/predict", "application/json", b"{}")?;

    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("File must be an image"));
    Ok(())
}

#[test]
fn predict_rejects_undecodable_images() -> Result<()> {
    let api = TestApi::spawn()?;

    let (headers, body) = post(api.addr(), "/api/v1/predict", "image/jpeg", b"not a jpeg")?;

    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("Invalid image file"));
    Ok(())
}

#[test]
fn unknown_paths_are_not_found() -> Result<()> {
    let api = TestApi::spawn()?;

    let (headers, _body) = get(api.addr(), "/api/v1/unknown")?;

    assert!(headers.contains("404 Not Found"));
    Ok(())
}

#[test]
fn wrong_methods_are_rejected() -> Result<()> {
    let api = TestApi::spawn()?;

    let (headers, _body) = get(api.addr(), "/api/v1/predict")?;

    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}
