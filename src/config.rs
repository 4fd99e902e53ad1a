use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DEVICE_ID: &str = "JETSON_01";
const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_CAMERA_DEVICE: &str = "stub://conveyor";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";
const DEFAULT_TRIGGER_PIN: u32 = 12;
const DEFAULT_OUTPUT_PIN: u32 = 18;
const DEFAULT_PULSE_MS: u64 = 100;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_STORAGE_ENDPOINT: &str = "http://127.0.0.1:9000";
const DEFAULT_STORAGE_BUCKET: &str = "inspection-evidence";
const DEFAULT_STORAGE_REGION: &str = "us-east-1";

#[derive(Debug, Deserialize, Default)]
struct InspectdConfigFile {
    device_id: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    gpio: Option<GpioConfigFile>,
    inference: Option<InferenceConfigFile>,
    storage: Option<StorageConfigFile>,
    webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct GpioConfigFile {
    chip: Option<String>,
    trigger_pin: Option<u32>,
    output_pin: Option<u32>,
    pulse_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    model_path: Option<String>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    endpoint: Option<String>,
    bucket: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InspectdConfig {
    pub device_id: String,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub gpio: GpioSettings,
    pub inference: InferenceSettings,
    pub storage: StorageSettings,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct GpioSettings {
    pub chip: String,
    pub trigger_pin: u32,
    pub output_pin: u32,
    pub pulse: Duration,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub model_path: Option<String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: String,
}

impl InspectdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISION_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InspectdConfigFile) -> Self {
        let device_id = file
            .device_id
            .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let gpio = GpioSettings {
            chip: file
                .gpio
                .as_ref()
                .and_then(|gpio| gpio.chip.clone())
                .unwrap_or_else(|| DEFAULT_GPIO_CHIP.to_string()),
            trigger_pin: file
                .gpio
                .as_ref()
                .and_then(|gpio| gpio.trigger_pin)
                .unwrap_or(DEFAULT_TRIGGER_PIN),
            output_pin: file
                .gpio
                .as_ref()
                .and_then(|gpio| gpio.output_pin)
                .unwrap_or(DEFAULT_OUTPUT_PIN),
            pulse: Duration::from_millis(
                file.gpio
                    .as_ref()
                    .and_then(|gpio| gpio.pulse_ms)
                    .unwrap_or(DEFAULT_PULSE_MS),
            ),
        };
        let inference = InferenceSettings {
            model_path: file
                .inference
                .as_ref()
                .and_then(|inference| inference.model_path.clone()),
            confidence_threshold: file
                .inference
                .as_ref()
                .and_then(|inference| inference.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: file
                .inference
                .as_ref()
                .and_then(|inference| inference.iou_threshold)
                .unwrap_or(DEFAULT_IOU_THRESHOLD),
        };
        let storage = StorageSettings {
            endpoint: file
                .storage
                .as_ref()
                .and_then(|storage| storage.endpoint.clone())
                .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string()),
            bucket: file
                .storage
                .as_ref()
                .and_then(|storage| storage.bucket.clone())
                .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
            access_key: file
                .storage
                .as_ref()
                .and_then(|storage| storage.access_key.clone()),
            secret_key: file
                .storage
                .as_ref()
                .and_then(|storage| storage.secret_key.clone()),
            region: file
                .storage
                .as_ref()
                .and_then(|storage| storage.region.clone())
                .unwrap_or_else(|| DEFAULT_STORAGE_REGION.to_string()),
        };
        Self {
            device_id,
            api_addr,
            camera,
            gpio,
            inference,
            storage,
            webhook_url: file.webhook_url,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device_id) = std::env::var("VISION_DEVICE_ID") {
            if !device_id.trim().is_empty() {
                self.device_id = device_id;
            }
        }
        if let Ok(addr) = std::env::var("VISION_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(device) = std::env::var("VISION_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(model_path) = std::env::var("VISION_MODEL_PATH") {
            if !model_path.trim().is_empty() {
                self.inference.model_path = Some(model_path);
            }
        }
        if let Ok(url) = std::env::var("VISION_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.webhook_url = Some(url);
            }
        }
        if let Ok(endpoint) = std::env::var("VISION_STORAGE_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.storage.endpoint = endpoint;
            }
        }
        if let Ok(bucket) = std::env::var("VISION_STORAGE_BUCKET") {
            if !bucket.trim().is_empty() {
                self.storage.bucket = bucket;
            }
        }
        if let Ok(access_key) = std::env::var("VISION_STORAGE_ACCESS_KEY") {
            if !access_key.trim().is_empty() {
                self.storage.access_key = Some(access_key);
            }
        }
        if let Ok(secret_key) = std::env::var("VISION_STORAGE_SECRET_KEY") {
            if !secret_key.trim().is_empty() {
                self.storage.secret_key = Some(secret_key);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(anyhow!("device_id must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if self.gpio.pulse.as_millis() == 0 {
            return Err(anyhow!("gpio pulse_ms must be greater than zero"));
        }
        if self.gpio.trigger_pin == self.gpio.output_pin {
            return Err(anyhow!("gpio trigger_pin and output_pin must differ"));
        }
        if !(0.0..=1.0).contains(&self.inference.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0.0..=1.0"));
        }
        if !(0.0..=1.0).contains(&self.inference.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within 0.0..=1.0"));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(anyhow!("storage bucket must not be empty"));
        }
        url::Url::parse(&self.storage.endpoint)
            .map_err(|e| anyhow!("invalid storage endpoint {}: {}", self.storage.endpoint, e))?;
        // An empty webhook URL means "not configured", same as leaving it out.
        if let Some(url) = &self.webhook_url {
            if url.trim().is_empty() {
                self.webhook_url = None;
            } else {
                url::Url::parse(url).map_err(|e| anyhow!("invalid webhook url {}: {}", url, e))?;
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<InspectdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
