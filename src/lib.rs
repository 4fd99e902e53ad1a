//! Vision Eye - trigger-driven conveyor inspection pipeline.
//!
//! An inspection station daemon for a conveyor line: a trigger (GPIO rising
//! edge or API call) fires, a frame is captured, the inference backend
//! produces a PASS/FAIL verdict, the reject pusher is pulsed on FAIL, and
//! the evidence image plus the result are published to storage and a
//! webhook without blocking the next trigger.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, JPEG encoding, deterministic placeholder frames
//! - `capture`: frame sources (synthetic, V4L2 devices)
//! - `gpio`: reject actuator and edge-trigger input (real or logged)
//! - `detect`: inference backends and inspection results
//! - `publish`: evidence upload and webhook delivery off the trigger path
//! - `trigger`: the pipeline orchestrator tying the above together
//! - `api`: thin HTTP surface (healthcheck, simulated trigger, predict)

pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod gpio;
pub mod publish;
pub mod trigger;

pub use capture::FrameSource;
pub use config::{
    CameraSettings, GpioSettings, InferenceSettings, InspectdConfig, StorageSettings,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use detect::{
    select_backend, Detection, InspectionBackend, InspectionResult, StubBackend, Verdict,
};
pub use frame::Frame;
pub use gpio::{Actuator, EdgeDetector};
pub use publish::{
    EvidencePublisher, EvidenceStore, HttpObjectStore, InMemoryStore, WebhookNotifier,
};
pub use trigger::{TriggerPipeline, TriggerSource};

// -------------------- Operating Mode --------------------

/// How the station talks to the physical world, decided once at `start()`.
///
/// `Hardware` requires the edge-detection input to initialize; any setup
/// fault downgrades the pipeline to `Simulated` for the remainder of the
/// process lifetime. The mode never upgrades at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    Hardware,
    Simulated,
}

impl OperatingMode {
    /// Label used in trigger acknowledgements.
    pub fn wire_label(&self) -> &'static str {
        match self {
            OperatingMode::Hardware => "HARDWARE",
            OperatingMode::Simulated => "MOCK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operating_mode_wire_labels() {
        assert_eq!(OperatingMode::Hardware.wire_label(), "HARDWARE");
        assert_eq!(OperatingMode::Simulated.wire_label(), "MOCK");
    }
}
