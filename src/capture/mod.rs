//! Camera capture.
//!
//! `FrameSource` acquires one frame per trigger from a local V4L2 device,
//! with a synthetic fallback for `stub://` paths.
//!
//! The frame source is responsible for:
//! - Opening and releasing the device handle
//! - Producing one `Frame` per capture call
//! - Substituting the deterministic placeholder when a device read fails
//!
//! The frame source MUST NOT:
//! - Return an empty or zero-sized frame (degraded capture yields the
//!   placeholder instead)
//! - Retry device reads on its own (one read attempt per trigger)

use anyhow::Result;

use crate::config::CameraSettings;
use crate::frame::Frame;

#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

/// Frame source, selected once from the configured device path.
///
/// `stub://` paths use the synthetic camera; anything else is treated as a
/// V4L2 device node and requires the `capture-v4l2` feature.
pub struct FrameSource {
    backend: CaptureBackend,
}

enum CaptureBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    Device(v4l2::V4l2Camera),
}

impl FrameSource {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        if settings.device.starts_with("stub://") {
            return Ok(Self {
                backend: CaptureBackend::Synthetic(SyntheticCamera::new(settings)),
            });
        }
        #[cfg(feature = "capture-v4l2")]
        {
            Ok(Self {
                backend: CaptureBackend::Device(v4l2::V4l2Camera::new(settings)),
            })
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            Err(anyhow::anyhow!(
                "camera device {} requires v4l2 support (enable the capture-v4l2 feature)",
                settings.device
            ))
        }
    }

    /// Open the device handle. Synthetic sources are always "open".
    pub fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            CaptureBackend::Synthetic(camera) => camera.open(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(camera) => camera.open(),
        }
    }

    pub fn is_open(&self) -> bool {
        match &self.backend {
            CaptureBackend::Synthetic(_) => true,
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(camera) => camera.is_open(),
        }
    }

    /// Capture the next frame.
    ///
    /// A failed or degraded device read substitutes the deterministic
    /// placeholder so downstream logic always has something to encode.
    /// `None` is reserved for frames that decode to zero size, which no
    /// backend should produce in practice.
    pub fn capture(&mut self) -> Option<Frame> {
        let frame = match &mut self.backend {
            CaptureBackend::Synthetic(camera) => camera.capture(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(camera) => match camera.capture() {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!(
                        "FrameSource: read from {} failed ({}), substituting placeholder",
                        camera.device(),
                        err
                    );
                    Frame::placeholder()
                }
            },
        };
        if frame.is_empty() {
            log::warn!("FrameSource: discarding zero-sized frame");
            return None;
        }
        Some(frame)
    }

    /// Release the device handle. Safe to call repeatedly.
    pub fn release(&mut self) {
        match &mut self.backend {
            CaptureBackend::Synthetic(_) => {}
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(camera) => camera.release(),
        }
    }

    pub fn device(&self) -> &str {
        match &self.backend {
            CaptureBackend::Synthetic(camera) => &camera.settings.device,
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(camera) => camera.device(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    settings: CameraSettings,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
        }
    }

    fn open(&mut self) -> Result<()> {
        log::info!(
            "FrameSource: connected to {} (synthetic)",
            self.settings.device
        );
        Ok(())
    }

    /// Every synthetic capture is the deterministic placeholder frame.
    fn capture(&mut self) -> Frame {
        self.frame_count += 1;
        log::debug!(
            "FrameSource: synthetic frame {} from {}",
            self.frame_count,
            self.settings.device
        );
        Frame::placeholder()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
