use std::time::Duration;

/// Default pause between device acquisition attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Device link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Listening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The backoff elapsed (or hotplug fired); try to open the device.
    Retry,
    Opened,
    /// Open failed: device absent or permission denied.
    OpenFailed,
    /// Read or write failed on an open device.
    IoError,
}

/// What the device thread should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Open,
    /// Device is ready. Reset per-device state and start reading.
    Listen,
    /// Close any handle and wait before retrying.
    Wait(Duration),
}

/// Reconnect state machine with a fixed backoff.
///
/// `Disconnected -> Connecting -> Listening -> Disconnected` on error, with a
/// wait after every failure. Cancellation is left to the caller.
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    backoff: Duration,
    failures: u32,
}

impl Link {
    #[must_use]
    pub fn new(backoff: Duration) -> Self {
        Link {
            state: LinkState::Disconnected,
            backoff,
            failures: 0,
        }
    }

    #[cfg(test)]
    fn state(&self) -> LinkState {
        self.state
    }

    /// Failed attempts since the last successful open.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Apply `event`. Returns `None` for an event that makes no sense in
    /// the current state, leaving the state unchanged.
    pub fn on(&mut self, event: LinkEvent) -> Option<LinkAction> {
        let (next, action) = match (self.state, event) {
            (LinkState::Disconnected, LinkEvent::Retry) => (LinkState::Connecting, LinkAction::Open),
            (LinkState::Connecting, LinkEvent::Opened) => {
                self.failures = 0;
                (LinkState::Listening, LinkAction::Listen)
            }
            (LinkState::Connecting, LinkEvent::OpenFailed)
            | (LinkState::Listening, LinkEvent::IoError) => {
                self.failures = self.failures.saturating_add(1);
                (LinkState::Disconnected, LinkAction::Wait(self.backoff))
            }
            _ => return None,
        };
        self.state = next;
        Some(action)
    }
}
