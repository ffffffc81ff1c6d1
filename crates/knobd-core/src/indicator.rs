use std::fmt;

/// Largest pulse speed the PowerMate driver accepts.
pub const MAX_PULSE_SPEED: u16 = 510;
/// Largest pulse table index (0, 1 or 2).
pub const MAX_PULSE_TABLE: u8 = 2;

/// What the knob's LED shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Constant brightness. Normal operation.
    Steady,
    /// Breathing. An application is pinned.
    Pulsing,
    Off,
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndicatorState::Steady => "steady",
            IndicatorState::Pulsing => "pulsing",
            IndicatorState::Off => "off",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedParams {
    pub brightness: u8,
    pub pulse_speed: u16,
    pub pulse_table: u8,
}

impl Default for LedParams {
    fn default() -> Self {
        LedParams {
            brightness: 255,
            pulse_speed: 255,
            pulse_table: 0,
        }
    }
}

impl LedParams {
    /// Value to write as `EV_MSC/MSC_PULSELED`.
    ///
    /// Bits 0-7 brightness, 8-16 pulse speed, 17-18 pulse table, bit 19
    /// pulse while the host sleeps, bit 20 pulse while awake.
    #[must_use]
    pub fn encode(&self, state: IndicatorState) -> i32 {
        match state {
            IndicatorState::Off => 0,
            IndicatorState::Steady => i32::from(self.brightness),
            IndicatorState::Pulsing => {
                let speed = i32::from(self.pulse_speed.min(MAX_PULSE_SPEED));
                let table = i32::from(self.pulse_table.min(MAX_PULSE_TABLE));
                i32::from(self.brightness) | speed << 8 | table << 17 | 1 << 19 | 1 << 20
            }
        }
    }
}
