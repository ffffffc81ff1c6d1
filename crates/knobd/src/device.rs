use std::os::fd::AsRawFd;
use std::path::PathBuf;

use evdev::{EventType, InputEvent};
use knobd_core::event::{DeviceError, RawEvent, MSC_PULSELED};
use tracing::{debug, trace};

/// Abstraction over the knob's input device for testability.
///
/// The real implementation wraps an `evdev::Device`.
/// The mock implementation replays scripted event batches.
pub trait InputTransport: Send + 'static {
    /// Wait up to `timeout_ms` for events. An empty batch means timeout.
    /// Sync reports and other noise are returned with the ignored kind.
    fn read_events(&mut self, timeout_ms: i32) -> Result<Vec<RawEvent>, DeviceError>;

    /// Write an `EV_MSC/MSC_PULSELED` value.
    fn write_led(&mut self, value: i32) -> Result<(), DeviceError>;

    fn name(&self) -> String;
}

/// An input device as seen by enumeration.
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
}

/// Every input device we are allowed to open.
///
/// Devices without read permission are skipped silently by evdev, so an empty
/// list often means the user is not in the `input` group.
pub fn list_devices() -> Vec<DeviceListing> {
    evdev::enumerate()
        .map(|(path, device)| {
            let id = device.input_id();
            DeviceListing {
                path,
                name: device.name().unwrap_or("unknown").to_string(),
                vendor: id.vendor(),
                product: id.product(),
            }
        })
        .collect()
}

/// Real transport over `/dev/input/event*`.
pub struct EvdevTransport {
    device: evdev::Device,
    path: PathBuf,
}

impl EvdevTransport {
    /// Open the first input device matching `vendor`/`product`.
    pub fn open(vendor: u16, product: u16) -> Result<Self, DeviceError> {
        let (path, device) = evdev::enumerate()
            .find(|(_, d)| {
                let id = d.input_id();
                id.vendor() == vendor && id.product() == product
            })
            .ok_or(DeviceError::NotFound { vendor, product })?;
        debug!("opened input device {}", path.display());
        Ok(EvdevTransport { device, path })
    }
}

impl InputTransport for EvdevTransport {
    fn read_events(&mut self, timeout_ms: i32) -> Result<Vec<RawEvent>, DeviceError> {
        let mut pollfd = libc::pollfd {
            fd: self.device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(DeviceError::Io(err.to_string()));
        }
        if ret == 0 {
            return Ok(Vec::new());
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(DeviceError::Closed);
        }

        let events = self
            .device
            .fetch_events()
            .map_err(|e| DeviceError::Io(e.to_string()))?
            .map(|ev| RawEvent::from_kernel(ev.event_type().0, ev.code(), ev.value(), ev.timestamp()))
            .collect::<Vec<_>>();
        trace!("read {} events from {}", events.len(), self.path.display());
        Ok(events)
    }

    fn write_led(&mut self, value: i32) -> Result<(), DeviceError> {
        self.device
            .send_events(&[InputEvent::new(EventType::MISC, MSC_PULSELED, value)])
            .map_err(|e| DeviceError::Io(e.to_string()))
    }

    fn name(&self) -> String {
        format!(
            "{} ({})",
            self.device.name().unwrap_or("unknown"),
            self.path.display()
        )
    }
}

/// Mock transport for testing. Replays scripted read batches.
#[cfg(test)]
pub struct MockInputTransport {
    reads: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<Result<Vec<RawEvent>, DeviceError>>>>,
    leds: std::sync::Arc<std::sync::Mutex<Vec<i32>>>,
}

#[cfg(test)]
impl MockInputTransport {
    pub fn new() -> Self {
        MockInputTransport {
            reads: Default::default(),
            leds: Default::default(),
        }
    }

    pub fn queue_events(&self, events: Vec<RawEvent>) {
        self.reads.lock().unwrap().push_back(Ok(events));
    }

    pub fn queue_error(&self, msg: &str) {
        self.reads
            .lock()
            .unwrap()
            .push_back(Err(DeviceError::Io(msg.to_string())));
    }

    /// LED values written so far. Shared with clones handed to a device thread.
    pub fn leds(&self) -> Vec<i32> {
        self.leds.lock().unwrap().clone()
    }

    pub fn handle(&self) -> Self {
        MockInputTransport {
            reads: self.reads.clone(),
            leds: self.leds.clone(),
        }
    }
}

#[cfg(test)]
impl InputTransport for MockInputTransport {
    fn read_events(&mut self, _timeout_ms: i32) -> Result<Vec<RawEvent>, DeviceError> {
        // No more scripted data -> timeout
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn write_led(&mut self, value: i32) -> Result<(), DeviceError> {
        self.leds.lock().unwrap().push(value);
        Ok(())
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}
