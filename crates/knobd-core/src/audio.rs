use thiserror::Error;

use crate::app::ApplicationId;

/// Volume as a normalized value in [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Volume(f64);

impl Volume {
    pub const ZERO: Volume = Volume(0.0);
    pub const MAX: Volume = Volume(1.0);

    /// Create a Volume from a normalized float, clamped to [0.0, 1.0].
    /// NaN maps to zero.
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Volume::ZERO;
        }
        Volume(value.clamp(0.0, 1.0))
    }

    /// Get the raw normalized value.
    #[must_use]
    pub fn get(self) -> f64 {
        self.0
    }

    /// Move by `delta` detents of `step` each, clamped.
    #[must_use]
    pub fn stepped(self, delta: i32, step: f64) -> Volume {
        Volume::new(self.0 + f64::from(delta) * step)
    }

    /// Rounded percentage for display.
    #[must_use]
    pub fn percent(self) -> u8 {
        // Clamped to [0, 1] so the cast cannot overflow
        (self.0 * 100.0).round() as u8
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixerError {
    #[error("mixer connection is down")]
    Disconnected,
    #[error("mixer request timed out")]
    Timeout,
    #[error("mixer operation failed: {0}")]
    Failed(String),
}

/// Run state of an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkState {
    Running,
    Idle,
    Suspended,
    #[default]
    Unknown,
}

/// An output device.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub volume: Volume,
    pub muted: bool,
    pub channels: u8,
    pub state: SinkState,
}

/// An application audio stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkInputInfo {
    pub index: u32,
    pub name: String,
    /// Owning application, `None` when the stream carries no usable metadata.
    pub app: Option<ApplicationId>,
    pub binary: Option<String>,
    pub pid: Option<u32>,
    pub sink_index: u32,
    pub volume: Volume,
    pub muted: bool,
    pub corked: bool,
    pub channels: u8,
}

impl SinkInputInfo {
    #[must_use]
    pub fn belongs_to(&self, app: &ApplicationId) -> bool {
        self.app.as_ref() == Some(app)
    }

    /// Playing, as opposed to paused by its client.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.corked
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub default_sink_name: Option<String>,
}

/// Output device a stream is heard through: the sink it plays on, else the
/// server default, else the first running sink.
#[must_use]
pub fn primary_output<'a>(
    input: Option<&SinkInputInfo>,
    sinks: &'a [SinkInfo],
    server: &ServerInfo,
) -> Option<&'a SinkInfo> {
    input
        .and_then(|si| sinks.iter().find(|s| s.index == si.sink_index))
        .or_else(|| {
            let name = server.default_sink_name.as_deref()?;
            sinks.iter().find(|s| s.name == name)
        })
        .or_else(|| sinks.iter().find(|s| s.state == SinkState::Running))
}

/// Stream volume scaled by its output device volume. A muted output counts
/// as zero; no identifiable output counts as 1.
#[must_use]
pub fn effective_volume(
    input: &SinkInputInfo,
    sinks: &[SinkInfo],
    server: &ServerInfo,
) -> Volume {
    let output = primary_output(Some(input), sinks, server).map_or(1.0, |sink| {
        if sink.muted {
            0.0
        } else {
            sink.volume.get()
        }
    });
    Volume::new(input.volume.get() * output)
}
