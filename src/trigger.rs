//! Trigger-driven inspection pipeline.
//!
//! `TriggerPipeline` bridges external trigger sources (a GPIO rising edge
//! or an API call) into one capture, inference, actuation, and publication
//! sequence per item.
//!
//! The pipeline is responsible for:
//! - Owning the camera, actuator, and edge-detector handles
//! - Deciding the operating mode once at start; a hardware setup failure
//!   downgrades to simulated for the process lifetime
//! - Pulsing the actuator exactly once per FAIL verdict
//! - Scheduling evidence publication without waiting for it
//!
//! The pipeline MUST NOT:
//! - Let a trigger failure escape past `process_trigger` (log and move on)
//! - Run inspection work on the edge-interrupt thread
//! - Block trigger handling on webhook or storage I/O

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use crate::capture::FrameSource;
use crate::config::{GpioSettings, InspectdConfig};
use crate::detect::{InspectionBackend, InspectionResult};
use crate::gpio::{Actuator, EdgeDetector};
use crate::publish::EvidencePublisher;
use crate::OperatingMode;

/// Pending triggers before new ones are dropped.
const TRIGGER_QUEUE_CAPACITY: usize = 16;
const DISPATCH_POLL: Duration = Duration::from_millis(50);

/// Where a trigger came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// Rising edge on the hardware input line.
    Edge,
    /// Explicit request through the API.
    Api,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Edge => write!(f, "edge"),
            TriggerSource::Api => write!(f, "api"),
        }
    }
}

/// Ephemeral unit of work, identified only by a correlation id.
struct TriggerEvent {
    id: Uuid,
    source: TriggerSource,
}

/// The orchestrator. Cheap to clone; all clones share one pipeline.
#[derive(Clone)]
pub struct TriggerPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    device_id: String,
    gpio: GpioSettings,
    mode: Mutex<OperatingMode>,
    running: AtomicBool,
    shutdown: AtomicBool,
    camera: Mutex<FrameSource>,
    detector: Mutex<Box<dyn InspectionBackend>>,
    actuator: Mutex<Actuator>,
    edge: Mutex<Option<EdgeDetector>>,
    publisher: Mutex<EvidencePublisher>,
    trigger_tx: Mutex<Option<SyncSender<TriggerEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerPipeline {
    /// Assemble the pipeline. Nothing is acquired until `start()`; the
    /// actuator begins as the logged variant and is swapped for the real
    /// line if hardware setup succeeds.
    pub fn new(
        config: &InspectdConfig,
        camera: FrameSource,
        detector: Box<dyn InspectionBackend>,
        publisher: EvidencePublisher,
    ) -> Self {
        let actuator = Actuator::simulated(config.gpio.output_pin, config.gpio.pulse);
        Self {
            inner: Arc::new(Inner {
                device_id: config.device_id.clone(),
                gpio: config.gpio.clone(),
                mode: Mutex::new(OperatingMode::Hardware),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                camera: Mutex::new(camera),
                detector: Mutex::new(detector),
                actuator: Mutex::new(actuator),
                edge: Mutex::new(None),
                publisher: Mutex::new(publisher),
                trigger_tx: Mutex::new(None),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Acquire resources and begin serving triggers. Idempotent: calling
    /// while already running is a no-op.
    ///
    /// A camera failure is logged and capture degrades to placeholder
    /// frames. A hardware setup failure downgrades the mode to simulated.
    /// Only a failure to spawn the dispatcher thread is fatal.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::info!("TriggerPipeline: already running");
            return Ok(());
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);

        match self.inner.camera.lock() {
            Ok(mut camera) => {
                if let Err(err) = camera.open() {
                    log::error!(
                        "TriggerPipeline: camera unavailable ({:#}), continuing with placeholder frames",
                        err
                    );
                }
            }
            Err(_) => log::error!("TriggerPipeline: camera lock poisoned"),
        }

        if let Ok(mut detector) = self.inner.detector.lock() {
            if let Err(err) = detector.warm_up() {
                log::warn!("TriggerPipeline: backend warm-up failed: {:#}", err);
            }
        }

        let (tx, rx) = mpsc::sync_channel(TRIGGER_QUEUE_CAPACITY);
        let dispatcher = {
            let pipeline = self.clone();
            std::thread::Builder::new()
                .name("trigger-dispatch".to_string())
                .spawn(move || pipeline.run_dispatcher(rx))
        };
        let dispatcher = match dispatcher {
            Ok(join) => join,
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(anyhow::Error::new(err).context("spawn trigger dispatcher thread"));
            }
        };
        if let Ok(mut trigger_tx) = self.inner.trigger_tx.lock() {
            *trigger_tx = Some(tx);
        }
        if let Ok(mut slot) = self.inner.dispatcher.lock() {
            *slot = Some(dispatcher);
        }

        if self.mode() == OperatingMode::Hardware {
            match self.setup_hardware() {
                Ok(()) => log::info!(
                    "TriggerPipeline: hardware trigger armed (chip {}, trigger pin {}, output pin {})",
                    self.inner.gpio.chip,
                    self.inner.gpio.trigger_pin,
                    self.inner.gpio.output_pin
                ),
                Err(err) => {
                    log::error!(
                        "TriggerPipeline: hardware setup failed ({:#}), downgrading to simulated mode",
                        err
                    );
                    if let Ok(mut mode) = self.inner.mode.lock() {
                        *mode = OperatingMode::Simulated;
                    }
                }
            }
        }

        log::info!(
            "TriggerPipeline: running (device {}, mode {})",
            self.inner.device_id,
            self.mode().wire_label()
        );
        Ok(())
    }

    /// Release the camera, GPIO handles, and background workers.
    /// Idempotent, and safe after a partially failed `start()`.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("TriggerPipeline: stopping");
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut trigger_tx) = self.inner.trigger_tx.lock() {
            trigger_tx.take();
        }
        if let Some(join) = self
            .inner
            .dispatcher
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
        {
            let _ = join.join();
        }
        if let Some(mut edge) = self.inner.edge.lock().ok().and_then(|mut slot| slot.take()) {
            edge.stop();
        }
        if let Ok(mut camera) = self.inner.camera.lock() {
            camera.release();
        }
        if let Ok(mut publisher) = self.inner.publisher.lock() {
            publisher.stop();
        }
        log::info!("TriggerPipeline: stopped");
    }

    /// Queue a trigger for the dispatcher and return immediately. Used by
    /// the edge callback and the API; never blocks the caller.
    pub fn enqueue_trigger(&self, source: TriggerSource) {
        let event = TriggerEvent {
            id: Uuid::new_v4(),
            source,
        };
        let tx = match self.inner.trigger_tx.lock() {
            Ok(tx) => tx.clone(),
            Err(_) => None,
        };
        let Some(tx) = tx else {
            log::warn!(
                "TriggerPipeline: not running, dropping trigger {} from {}",
                event.id,
                event.source
            );
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("TriggerPipeline: queue full, dropping trigger {}", event.id);
            }
            Err(TrySendError::Disconnected(event)) => {
                log::warn!(
                    "TriggerPipeline: dispatcher gone, dropping trigger {}",
                    event.id
                );
            }
        }
    }

    /// Run one inspection cycle synchronously. Callable concurrently from
    /// multiple sources; failures are logged and never escape.
    pub fn process_trigger(&self, source: TriggerSource) {
        let event = TriggerEvent {
            id: Uuid::new_v4(),
            source,
        };
        self.handle_trigger(&event);
    }

    /// Inspect one encoded image without touching trigger state. Serves
    /// the direct prediction endpoint; no actuation, no publication.
    pub fn predict(&self, image: &[u8]) -> Result<InspectionResult> {
        let mut detector = self
            .inner
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        detector.predict(image)
    }

    pub fn mode(&self) -> OperatingMode {
        self.inner
            .mode
            .lock()
            .map(|mode| *mode)
            .unwrap_or(OperatingMode::Simulated)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Completed actuator pulses, for assertions and diagnostics.
    pub fn actuator_pulses(&self) -> u64 {
        self.inner
            .actuator
            .lock()
            .map(|actuator| actuator.pulses())
            .unwrap_or(0)
    }

    fn setup_hardware(&self) -> Result<()> {
        let gpio = &self.inner.gpio;
        let actuator = Actuator::hardware(&gpio.chip, gpio.output_pin, gpio.pulse)?;
        let pipeline = self.clone();
        let edge = EdgeDetector::spawn(&gpio.chip, gpio.trigger_pin, move || {
            pipeline.enqueue_trigger(TriggerSource::Edge);
        })?;
        *self
            .inner
            .actuator
            .lock()
            .map_err(|_| anyhow!("actuator lock poisoned"))? = actuator;
        *self
            .inner
            .edge
            .lock()
            .map_err(|_| anyhow!("edge detector lock poisoned"))? = Some(edge);
        Ok(())
    }

    fn run_dispatcher(&self, rx: Receiver<TriggerEvent>) {
        log::info!("TriggerPipeline: dispatcher started");
        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match rx.recv_timeout(DISPATCH_POLL) {
                Ok(event) => self.handle_trigger(&event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("TriggerPipeline: dispatcher stopped");
    }

    fn handle_trigger(&self, event: &TriggerEvent) {
        if let Err(err) = self.run_trigger(event) {
            log::error!("TriggerPipeline: trigger {} aborted: {:#}", event.id, err);
        }
    }

    fn run_trigger(&self, event: &TriggerEvent) -> Result<()> {
        let frame = {
            let mut camera = self
                .inner
                .camera
                .lock()
                .map_err(|_| anyhow!("camera lock poisoned"))?;
            camera.capture()
        };
        let Some(frame) = frame else {
            log::warn!(
                "TriggerPipeline: no frame for trigger {}, abandoning",
                event.id
            );
            return Ok(());
        };

        let jpeg = frame.to_jpeg()?;

        let result = {
            let mut detector = self
                .inner
                .detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            detector.predict(&jpeg)?
        };
        log::info!(
            "TriggerPipeline: trigger {} via {}: {} ({} defects, {:.1} ms)",
            event.id,
            event.source,
            result.verdict,
            result.defects.len(),
            result.inference_time * 1000.0
        );

        if result.verdict.is_fail() {
            let mut actuator = self
                .inner
                .actuator
                .lock()
                .map_err(|_| anyhow!("actuator lock poisoned"))?;
            actuator.pulse()?;
        }

        let publisher = self
            .inner
            .publisher
            .lock()
            .map_err(|_| anyhow!("publisher lock poisoned"))?;
        publisher.publish(result, jpeg);
        Ok(())
    }
}
