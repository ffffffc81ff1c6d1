use std::os::fd::AsRawFd;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use knobd_core::event::{DeviceError, RawEvent};
use knobd_core::indicator::{IndicatorState, LedParams};
use knobd_core::link::{Link, LinkAction, LinkEvent};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::device::{EvdevTransport, InputTransport};

const READ_TIMEOUT_MS: i32 = 100;
/// Longest uninterrupted sleep while waiting out the backoff.
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Device hotplug events from the udev monitor.
#[derive(Debug, Clone, Copy)]
pub enum DeviceEvent {
    Added,
    Removed,
}

/// Why a device session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Failed,
}

/// Channels between the device thread and the rest of the daemon.
pub struct DeviceLinks {
    pub event_tx: mpsc::Sender<RawEvent>,
    pub indicator_rx: mpsc::Receiver<IndicatorState>,
    pub led_params: watch::Receiver<LedParams>,
    pub connected_tx: watch::Sender<bool>,
    pub hotplug_rx: std_mpsc::Receiver<DeviceEvent>,
}

/// Main device thread loop.
///
/// Opens the knob, forwards its events and applies indicator changes until an
/// I/O error, then waits out `backoff` and tries again. udev hotplug events cut
/// the wait short.
pub fn run(
    vendor: u16,
    product: u16,
    backoff: Duration,
    links: DeviceLinks,
    cancel: CancellationToken,
) {
    run_with(|| EvdevTransport::open(vendor, product), backoff, links, &cancel);
    info!("device thread exiting");
}

fn run_with<T, F>(mut open: F, backoff: Duration, mut links: DeviceLinks, cancel: &CancellationToken)
where
    T: InputTransport,
    F: FnMut() -> Result<T, DeviceError>,
{
    let mut link = Link::new(backoff);
    let mut action = link.on(LinkEvent::Retry);
    let mut transport: Option<T> = None;

    while let Some(next) = action {
        if cancel.is_cancelled() {
            break;
        }

        action = match next {
            LinkAction::Open => match open() {
                Ok(t) => {
                    info!("input device connected: {}", t.name());
                    transport = Some(t);
                    link.on(LinkEvent::Opened)
                }
                Err(e) => {
                    // Only the first miss is worth a warning
                    if link.failures() == 0 {
                        warn!("{e}; retrying every {}s", backoff.as_secs());
                    } else {
                        debug!("{e}");
                    }
                    link.on(LinkEvent::OpenFailed)
                }
            },
            LinkAction::Listen => {
                let Some(t) = transport.as_mut() else {
                    error!("device listen without an open handle");
                    break;
                };
                let end = run_device_session(t, &mut links, cancel);
                transport = None;
                let _ = links.connected_tx.send(false);
                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Failed => {
                        info!("input device disconnected");
                        link.on(LinkEvent::IoError)
                    }
                }
            }
            LinkAction::Wait(d) => {
                wait_for_device(d, &links.hotplug_rx, cancel);
                link.on(LinkEvent::Retry)
            }
        };
    }
}

/// Sleep for `backoff` in short slices, returning early on cancellation or
/// when udev reports the device.
fn wait_for_device(
    backoff: Duration,
    hotplug_rx: &std_mpsc::Receiver<DeviceEvent>,
    cancel: &CancellationToken,
) {
    let deadline = Instant::now() + backoff;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        let slice = remaining.min(WAIT_SLICE);
        match hotplug_rx.recv_timeout(slice) {
            Ok(DeviceEvent::Added) => {
                debug!("udev: device added, retrying now");
                return;
            }
            Ok(DeviceEvent::Removed) | Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => std::thread::sleep(slice),
        }
    }
}

/// One open-to-failure lifetime of the device handle.
fn run_device_session<T: InputTransport>(
    transport: &mut T,
    links: &mut DeviceLinks,
    cancel: &CancellationToken,
) -> SessionEnd {
    // Indicator changes queued while the device was away are stale
    while links.indicator_rx.try_recv().is_ok() {}

    let _ = links.connected_tx.send(true);
    let mut shown = IndicatorState::Steady;

    loop {
        if cancel.is_cancelled() {
            // Best effort; the device may already be gone
            let _ = transport.write_led(links.led_params.borrow().encode(IndicatorState::Off));
            return SessionEnd::Cancelled;
        }

        let mut changed = links.led_params.has_changed().unwrap_or(false);
        while let Ok(state) = links.indicator_rx.try_recv() {
            shown = state;
            changed = true;
        }
        if changed {
            let value = links.led_params.borrow_and_update().encode(shown);
            if let Err(e) = transport.write_led(value) {
                warn!("failed to set indicator {shown}: {e}");
                return SessionEnd::Failed;
            }
            debug!("indicator {shown} ({value:#x})");
        }

        match transport.read_events(READ_TIMEOUT_MS) {
            Ok(events) => {
                for ev in events {
                    if !ev.is_relevant() {
                        trace!("ignoring input event code={} value={}", ev.code, ev.value);
                        continue;
                    }
                    if links.event_tx.blocking_send(ev).is_err() {
                        // Engine is gone, so the daemon is shutting down
                        return SessionEnd::Cancelled;
                    }
                }
            }
            Err(e) => {
                warn!("input device read error: {e}");
                return SessionEnd::Failed;
            }
        }
    }
}

/// Run the udev monitor on a std::thread.
///
/// `MonitorSocket` is not Send/Sync, so this must run on a dedicated OS thread.
pub fn run_udev_monitor(
    vendor: u16,
    product: u16,
    event_tx: std_mpsc::SyncSender<DeviceEvent>,
    cancel: CancellationToken,
) {
    let socket = match udev::MonitorBuilder::new()
        .and_then(|b| b.match_subsystem("input"))
        .and_then(|b| b.listen())
    {
        Ok(s) => s,
        Err(e) => {
            error!("failed to create udev monitor: {e}");
            return;
        }
    };

    let fd = socket.as_raw_fd();
    let vendor_hex = format!("{vendor:04x}");
    let product_hex = format!("{product:04x}");
    info!("udev monitor started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        let ret = unsafe { libc::poll(&mut pollfd, 1, 1000) };

        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            error!("udev poll error: {err}");
            break;
        }

        if ret == 0 {
            continue;
        }

        let Some(event) = socket.iter().next() else {
            continue;
        };

        // Each knob shows up as inputN and eventN; only the event node is openable
        let is_event_node = event.sysname().to_string_lossy().starts_with("event");
        let has_id = |key: &str, want: &str| {
            event
                .property_value(key)
                .and_then(|v| v.to_str())
                .is_some_and(|v| v.eq_ignore_ascii_case(want))
        };
        if !is_event_node || !has_id("ID_VENDOR_ID", &vendor_hex) || !has_id("ID_MODEL_ID", &product_hex) {
            continue;
        }

        let dev_event = match event.event_type() {
            udev::EventType::Add => Some(DeviceEvent::Added),
            udev::EventType::Remove => Some(DeviceEvent::Removed),
            _ => None,
        };
        if let Some(evt) = dev_event {
            debug!("udev: knob {evt:?}");
            let _ = event_tx.try_send(evt);
        }
    }

    info!("udev monitor exiting");
}
