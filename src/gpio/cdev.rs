#![cfg(feature = "trigger-gpio")]

//! GPIO character-device backend.
//!
//! Uses the Linux gpiochip interface for both the reject-pusher output
//! line and the rising-edge trigger input. The edge listener polls the
//! event fd with a bounded timeout so `stop()` is honored promptly even
//! when no edges arrive.

use anyhow::{Context, Result};
use gpio_cdev::{Chip, EventRequestFlags, LineRequestFlags};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const CONSUMER: &str = "vision-eye";
const POLL_INTERVAL_MS: i32 = 100;

pub struct OutputLine {
    handle: gpio_cdev::LineHandle,
    pin: u32,
    pulse: Duration,
    pulses: u64,
}

impl OutputLine {
    pub fn open(chip_path: &str, pin: u32, pulse: Duration) -> Result<Self> {
        let mut chip =
            Chip::new(chip_path).with_context(|| format!("open gpio chip {}", chip_path))?;
        let line = chip
            .get_line(pin)
            .with_context(|| format!("resolve gpio line {}", pin))?;
        let handle = line
            .request(LineRequestFlags::OUTPUT, 0, CONSUMER)
            .with_context(|| format!("request gpio line {} as output", pin))?;
        Ok(Self {
            handle,
            pin,
            pulse,
            pulses: 0,
        })
    }

    pub fn pulse(&mut self) -> Result<()> {
        self.handle.set_value(1).context("drive gpio line high")?;
        std::thread::sleep(self.pulse);
        self.handle.set_value(0).context("drive gpio line low")?;
        self.pulses += 1;
        log::info!("Actuator: pulsed pin {} for {:?}", self.pin, self.pulse);
        Ok(())
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }
}

pub fn spawn_edge_listener<F>(
    chip_path: &str,
    pin: u32,
    shutdown: Arc<AtomicBool>,
    on_edge: F,
) -> Result<JoinHandle<()>>
where
    F: Fn() + Send + 'static,
{
    let mut chip =
        Chip::new(chip_path).with_context(|| format!("open gpio chip {}", chip_path))?;
    let line = chip
        .get_line(pin)
        .with_context(|| format!("resolve gpio line {}", pin))?;
    let events = line
        .events(
            LineRequestFlags::INPUT,
            EventRequestFlags::RISING_EDGE,
            CONSUMER,
        )
        .with_context(|| format!("watch gpio line {} for rising edges", pin))?;

    let join = std::thread::Builder::new()
        .name("gpio-edge".to_string())
        .spawn(move || run_edge_loop(events, shutdown, on_edge))
        .context("spawn gpio edge listener thread")?;
    Ok(join)
}

fn run_edge_loop<F>(mut events: gpio_cdev::LineEventHandle, shutdown: Arc<AtomicBool>, on_edge: F)
where
    F: Fn(),
{
    let fd = events.as_raw_fd();
    while !shutdown.load(Ordering::SeqCst) {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, POLL_INTERVAL_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("EdgeDetector: poll failed: {}", err);
            break;
        }
        if ready == 0 {
            // Timeout with no edge, loop to re-check the shutdown flag.
            continue;
        }
        match events.get_event() {
            Ok(event) => {
                log::debug!("EdgeDetector: rising edge at {}ns", event.timestamp());
                on_edge();
            }
            Err(err) => {
                log::error!("EdgeDetector: event read failed: {}", err);
                break;
            }
        }
    }
}
