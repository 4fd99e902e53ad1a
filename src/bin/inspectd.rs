//! inspectd - trigger-driven conveyor inspection daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file plus VISION_* environment overrides)
//! 2. Opens the camera and selects the inference backend
//! 3. Arms the hardware trigger, downgrading to simulated mode on failure
//! 4. Serves the inspection API (healthcheck, simulated trigger, ad-hoc predict)
//! 5. Uploads evidence and posts webhook notifications off the trigger path

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use vision_eye::api::{ApiConfig, ApiServer};
use vision_eye::detect::select_backend;
use vision_eye::publish::{EvidencePublisher, HttpObjectStore, WebhookNotifier};
use vision_eye::{FrameSource, InspectdConfig, InspectionBackend, StubBackend, TriggerPipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Trigger-driven conveyor inspection daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "VISION_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = InspectdConfig::load_from(args.config.as_deref())?;
    log::info!(
        "inspectd starting: device_id={} camera={} api={}",
        cfg.device_id,
        cfg.camera.device,
        cfg.api_addr
    );

    let camera = FrameSource::new(cfg.camera.clone())?;
    let detector: Box<dyn InspectionBackend> = match select_backend(&cfg.inference) {
        Ok(backend) => backend,
        Err(err) => {
            log::error!("inference backend unavailable, using stub: {:#}", err);
            Box::new(StubBackend::new())
        }
    };
    log::info!("inference backend: {}", detector.name());

    let store = Arc::new(HttpObjectStore::new(cfg.storage.clone()));
    let notifier = WebhookNotifier::new(cfg.webhook_url.clone(), cfg.device_id.clone());
    if !notifier.is_configured() {
        log::warn!("webhook url not configured; notifications will be skipped");
    }
    let publisher = EvidencePublisher::spawn(store, notifier)?;

    let pipeline = TriggerPipeline::new(&cfg, camera, detector, publisher);
    pipeline.start()?;
    log::info!(
        "inspection pipeline running in {} mode",
        pipeline.mode().wire_label()
    );

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, pipeline.clone()).spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("inspectd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    pipeline.stop();
    log::info!(
        "inspectd stopped after {} reject pulses",
        pipeline.actuator_pulses()
    );

    Ok(())
}
