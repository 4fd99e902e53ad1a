//! GPIO actuation and trigger input.
//!
//! `Actuator` drives the reject-pusher output line; `EdgeDetector` watches
//! the trigger input line and hands each rising edge to a callback on a
//! dedicated thread.
//!
//! This module is responsible for:
//! - Pulsing the output line high for the configured duration
//! - Delivering exactly one callback invocation per rising edge
//! - Releasing line handles on stop/drop
//!
//! This module MUST NOT:
//! - Run inspection work on the edge-listener thread (callbacks hand off
//!   to the pipeline queue)
//! - Block `stop()` beyond one poll interval

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(feature = "trigger-gpio")]
pub mod cdev;

// -------------------- Actuator --------------------

/// Binary output line (reject pusher), real or logged.
pub struct Actuator {
    backend: ActuatorBackend,
}

enum ActuatorBackend {
    Logged(LoggedActuator),
    #[cfg(feature = "trigger-gpio")]
    Line(cdev::OutputLine),
}

impl Actuator {
    /// Logged stand-in with the same timing semantics as the real line.
    pub fn simulated(pin: u32, pulse: Duration) -> Self {
        Self {
            backend: ActuatorBackend::Logged(LoggedActuator {
                pin,
                pulse,
                pulses: 0,
            }),
        }
    }

    /// Drive a real output line through the GPIO character device.
    #[cfg(feature = "trigger-gpio")]
    pub fn hardware(chip: &str, pin: u32, pulse: Duration) -> Result<Self> {
        Ok(Self {
            backend: ActuatorBackend::Line(cdev::OutputLine::open(chip, pin, pulse)?),
        })
    }

    #[cfg(not(feature = "trigger-gpio"))]
    pub fn hardware(_chip: &str, _pin: u32, _pulse: Duration) -> Result<Self> {
        Err(anyhow::anyhow!(
            "gpio support not compiled in (enable the trigger-gpio feature)"
        ))
    }

    /// Drive the line high, hold for the pulse duration, drive it low.
    /// Safe to call repeatedly.
    pub fn pulse(&mut self) -> Result<()> {
        match &mut self.backend {
            ActuatorBackend::Logged(actuator) => actuator.pulse(),
            #[cfg(feature = "trigger-gpio")]
            ActuatorBackend::Line(line) => line.pulse(),
        }
    }

    /// Completed pulses since construction.
    pub fn pulses(&self) -> u64 {
        match &self.backend {
            ActuatorBackend::Logged(actuator) => actuator.pulses,
            #[cfg(feature = "trigger-gpio")]
            ActuatorBackend::Line(line) => line.pulses(),
        }
    }
}

struct LoggedActuator {
    pin: u32,
    pulse: Duration,
    pulses: u64,
}

impl LoggedActuator {
    fn pulse(&mut self) -> Result<()> {
        log::info!(
            "Actuator: pulsing pin {} for {:?} (simulated)",
            self.pin,
            self.pulse
        );
        std::thread::sleep(self.pulse);
        self.pulses += 1;
        Ok(())
    }
}

// -------------------- Edge detector --------------------

/// Rising-edge listener on the trigger input line.
///
/// The callback runs on the listener thread, so it must only enqueue work
/// and return.
pub struct EdgeDetector {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl EdgeDetector {
    #[cfg(feature = "trigger-gpio")]
    pub fn spawn<F>(chip: &str, pin: u32, on_edge: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let join = cdev::spawn_edge_listener(chip, pin, Arc::clone(&shutdown), on_edge)?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    #[cfg(not(feature = "trigger-gpio"))]
    pub fn spawn<F>(_chip: &str, _pin: u32, _on_edge: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        Err(anyhow::anyhow!(
            "gpio support not compiled in (enable the trigger-gpio feature)"
        ))
    }

    /// Stop the listener thread and release the line. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for EdgeDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn simulated_actuator_counts_pulses() -> Result<()> {
        let mut actuator = Actuator::simulated(18, Duration::from_millis(1));
        assert_eq!(actuator.pulses(), 0);
        actuator.pulse()?;
        actuator.pulse()?;
        assert_eq!(actuator.pulses(), 2);
        Ok(())
    }

    #[test]
    fn simulated_actuator_holds_pulse_duration() -> Result<()> {
        let pulse = Duration::from_millis(20);
        let mut actuator = Actuator::simulated(18, pulse);
        let started = Instant::now();
        actuator.pulse()?;
        assert!(started.elapsed() >= pulse);
        Ok(())
    }

    #[cfg(not(feature = "trigger-gpio"))]
    #[test]
    fn hardware_paths_require_gpio_feature() {
        let err = match Actuator::hardware("/dev/gpiochip0", 18, Duration::from_millis(100)) {
            Ok(_) => panic!("expected hardware actuator to be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("trigger-gpio"));

        let err = match EdgeDetector::spawn("/dev/gpiochip0", 12, || {}) {
            Ok(_) => panic!("expected edge detector to be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("trigger-gpio"));
    }
}
