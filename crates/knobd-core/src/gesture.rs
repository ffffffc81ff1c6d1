use std::fmt;
use std::time::{Duration, SystemTime};

use crate::event::{ButtonState, EventKind, RawEvent};

/// Default long-press threshold.
pub const DEFAULT_LONG_PRESS: Duration = Duration::from_millis(500);
/// Events lagging the wall clock by more than this are dropped.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2);

/// A semantic gesture derived from raw knob events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    ShortPress,
    LongPress,
    /// Rotation with the button up. Negative is counter-clockwise.
    Rotate { delta: i32 },
    /// Rotation with the button held down.
    PressRotate { delta: i32 },
}

impl Gesture {
    #[must_use]
    pub fn kind(&self) -> GestureKind {
        match self {
            Gesture::ShortPress => GestureKind::ShortPress,
            Gesture::LongPress => GestureKind::LongPress,
            Gesture::Rotate { .. } => GestureKind::Rotate,
            Gesture::PressRotate { .. } => GestureKind::PressRotate,
        }
    }
}

/// Payload-free discriminant of [`Gesture`], used as the event bus key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GestureKind {
    ShortPress,
    LongPress,
    Rotate,
    PressRotate,
}

impl GestureKind {
    pub const ALL: [GestureKind; 4] = [
        GestureKind::ShortPress,
        GestureKind::LongPress,
        GestureKind::Rotate,
        GestureKind::PressRotate,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            GestureKind::ShortPress => "short_press",
            GestureKind::LongPress => "long_press",
            GestureKind::Rotate => "rotate",
            GestureKind::PressRotate => "press_rotate",
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Button state tracked by the classifier.
///
/// The press start time only exists while the button is down, and a
/// rotation during the press is recorded by moving to `PressedRotated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressState {
    Idle,
    Pressed { since: SystemTime },
    PressedRotated,
}

/// Turns the raw event stream of a single knob into gestures.
#[derive(Debug)]
pub struct GestureClassifier {
    state: PressState,
    long_press: Duration,
    stale_after: Duration,
}

impl Default for GestureClassifier {
    fn default() -> Self {
        GestureClassifier::new(DEFAULT_LONG_PRESS, DEFAULT_STALE_AFTER)
    }
}

impl GestureClassifier {
    #[must_use]
    pub fn new(long_press: Duration, stale_after: Duration) -> Self {
        GestureClassifier {
            state: PressState::Idle,
            long_press,
            stale_after,
        }
    }

    #[cfg(test)]
    fn state(&self) -> PressState {
        self.state
    }

    /// Replace the timing parameters. The current press state is kept.
    pub fn set_timing(&mut self, long_press: Duration, stale_after: Duration) {
        self.long_press = long_press;
        self.stale_after = stale_after;
    }

    /// Forget any in-progress press. Call when the device is reacquired.
    pub fn reset(&mut self) {
        self.state = PressState::Idle;
    }

    /// Returns true if `event` lags `now` by more than the staleness bound.
    ///
    /// Timestamps ahead of `now` (clock adjustments) are never stale.
    #[must_use]
    pub fn is_stale(&self, event: &RawEvent, now: SystemTime) -> bool {
        now.duration_since(event.timestamp)
            .map(|lag| lag > self.stale_after)
            .unwrap_or(false)
    }

    /// Feed one raw event observed at wall-clock time `now`.
    ///
    /// Returns the gesture completed by this event, if any. Stale and
    /// irrelevant events leave the state untouched.
    pub fn feed(&mut self, event: &RawEvent, now: SystemTime) -> Option<Gesture> {
        if !event.is_relevant() || self.is_stale(event, now) {
            return None;
        }

        match event.kind {
            EventKind::Rotation => self.on_rotation(event.value),
            EventKind::Button => match ButtonState::from_value(event.value)? {
                ButtonState::Pressed => {
                    // A second down without an up in between means the release
                    // was lost (dropped as stale); start the press over.
                    self.state = PressState::Pressed {
                        since: event.timestamp,
                    };
                    None
                }
                ButtonState::Released => self.on_release(event.timestamp),
                ButtonState::Repeat => None,
            },
            EventKind::Ignored => None,
        }
    }

    fn on_rotation(&mut self, delta: i32) -> Option<Gesture> {
        if delta == 0 {
            return None;
        }
        match self.state {
            PressState::Idle => Some(Gesture::Rotate { delta }),
            PressState::Pressed { .. } | PressState::PressedRotated => {
                self.state = PressState::PressedRotated;
                Some(Gesture::PressRotate { delta })
            }
        }
    }

    fn on_release(&mut self, at: SystemTime) -> Option<Gesture> {
        match std::mem::replace(&mut self.state, PressState::Idle) {
            PressState::Pressed { since } => {
                let held = at.duration_since(since).unwrap_or_default();
                if held < self.long_press {
                    Some(Gesture::ShortPress)
                } else {
                    Some(Gesture::LongPress)
                }
            }
            PressState::PressedRotated | PressState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RawEvent, EV_SYN};

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000) + Duration::from_millis(ms)
    }

    fn classifier(threshold_ms: u64) -> GestureClassifier {
        GestureClassifier::new(Duration::from_millis(threshold_ms), DEFAULT_STALE_AFTER)
    }

    /// Feed events with `now` equal to each event's own timestamp.
    fn run(c: &mut GestureClassifier, events: &[RawEvent]) -> Vec<Gesture> {
        events
            .iter()
            .filter_map(|ev| c.feed(ev, ev.timestamp))
            .collect()
    }

    fn press_for(c: &mut GestureClassifier, held_ms: u64) -> Vec<Gesture> {
        run(
            c,
            &[
                RawEvent::button(true, at(0)),
                RawEvent::button(false, at(held_ms)),
            ],
        )
    }

    #[test]
    fn short_press_below_threshold() {
        let mut c = classifier(500);
        assert_eq!(press_for(&mut c, 200), vec![Gesture::ShortPress]);
        assert_eq!(c.state(), PressState::Idle);
    }

    #[test]
    fn long_press_above_threshold() {
        let mut c = classifier(500);
        assert_eq!(press_for(&mut c, 800), vec![Gesture::LongPress]);
    }

    #[test]
    fn press_exactly_at_threshold_is_long() {
        let mut c = classifier(500);
        assert_eq!(press_for(&mut c, 500), vec![Gesture::LongPress]);
        assert_eq!(press_for(&mut c, 499), vec![Gesture::ShortPress]);
    }

    #[test]
    fn classification_boundary_holds_for_all_durations() {
        for threshold in [300u64, 500] {
            for held in (0..=1000).step_by(25) {
                let mut c = classifier(threshold);
                let expected = if held < threshold {
                    Gesture::ShortPress
                } else {
                    Gesture::LongPress
                };
                assert_eq!(
                    press_for(&mut c, held),
                    vec![expected],
                    "threshold={threshold}, held={held}"
                );
            }
        }
    }

    #[test]
    fn rotation_while_idle_is_rotate() {
        let mut c = classifier(500);
        let out = run(&mut c, &[RawEvent::rotation(-1, at(0))]);
        assert_eq!(out, vec![Gesture::Rotate { delta: -1 }]);
        assert_eq!(c.state(), PressState::Idle);
    }

    #[test]
    fn rotation_while_pressed_suppresses_press_gesture() {
        let mut c = classifier(500);
        let out = run(
            &mut c,
            &[
                RawEvent::button(true, at(0)),
                RawEvent::rotation(3, at(100)),
                RawEvent::button(false, at(300)),
            ],
        );
        assert_eq!(out, vec![Gesture::PressRotate { delta: 3 }]);
        assert_eq!(c.state(), PressState::Idle);
    }

    #[test]
    fn every_rotation_during_a_press_is_reported() {
        let mut c = classifier(500);
        let out = run(
            &mut c,
            &[
                RawEvent::button(true, at(0)),
                RawEvent::rotation(1, at(50)),
                RawEvent::rotation(-2, at(60)),
                RawEvent::button(false, at(2000)),
            ],
        );
        assert_eq!(
            out,
            vec![
                Gesture::PressRotate { delta: 1 },
                Gesture::PressRotate { delta: -2 },
            ]
        );
    }

    #[test]
    fn press_after_press_rotate_classifies_normally() {
        let mut c = classifier(500);
        run(
            &mut c,
            &[
                RawEvent::button(true, at(0)),
                RawEvent::rotation(1, at(10)),
                RawEvent::button(false, at(20)),
            ],
        );
        let out = run(
            &mut c,
            &[
                RawEvent::button(true, at(1000)),
                RawEvent::button(false, at(1100)),
            ],
        );
        assert_eq!(out, vec![Gesture::ShortPress]);
    }

    #[test]
    fn stale_rotation_is_dropped_without_state_change() {
        let mut c = classifier(500);
        let ev = RawEvent::rotation(5, at(0));
        assert!(c.feed(&ev, at(2001)).is_none());
        assert_eq!(c.state(), PressState::Idle);

        // Exactly at the bound is still processed
        assert_eq!(c.feed(&ev, at(2000)), Some(Gesture::Rotate { delta: 5 }));
    }

    #[test]
    fn stale_button_down_does_not_start_a_press() {
        let mut c = classifier(500);
        assert!(c.feed(&RawEvent::button(true, at(0)), at(5000)).is_none());
        assert_eq!(c.state(), PressState::Idle);
    }

    #[test]
    fn future_timestamps_are_not_stale() {
        let c = classifier(500);
        assert!(!c.is_stale(&RawEvent::rotation(1, at(9000)), at(0)));
    }

    #[test]
    fn release_without_press_is_ignored() {
        let mut c = classifier(500);
        assert!(run(&mut c, &[RawEvent::button(false, at(0))]).is_empty());
    }

    #[test]
    fn autorepeat_and_sync_events_are_ignored() {
        let mut c = classifier(500);
        let out = run(
            &mut c,
            &[
                RawEvent::button(true, at(0)),
                RawEvent {
                    value: 2,
                    ..RawEvent::button(true, at(100))
                },
                RawEvent::from_kernel(EV_SYN, 0, 0, at(110)),
                RawEvent::button(false, at(200)),
            ],
        );
        assert_eq!(out, vec![Gesture::ShortPress]);
    }

    #[test]
    fn repeated_down_restarts_the_press() {
        let mut c = classifier(500);
        let out = run(
            &mut c,
            &[
                RawEvent::button(true, at(0)),
                RawEvent::button(true, at(1000)),
                RawEvent::button(false, at(1100)),
            ],
        );
        assert_eq!(out, vec![Gesture::ShortPress]);
    }

    #[test]
    fn zero_delta_rotation_emits_nothing() {
        let mut c = classifier(500);
        assert!(run(&mut c, &[RawEvent::rotation(0, at(0))]).is_empty());
    }

    #[test]
    fn reset_forgets_press() {
        let mut c = classifier(500);
        c.feed(&RawEvent::button(true, at(0)), at(0));
        c.reset();
        assert_eq!(c.state(), PressState::Idle);
        assert!(c.feed(&RawEvent::button(false, at(100)), at(100)).is_none());
    }

    #[test]
    fn gesture_kind_names() {
        assert_eq!(Gesture::ShortPress.kind().name(), "short_press");
        assert_eq!(Gesture::LongPress.kind().to_string(), "long_press");
        assert_eq!(Gesture::Rotate { delta: 1 }.kind(), GestureKind::Rotate);
        assert_eq!(
            Gesture::PressRotate { delta: 1 }.kind().name(),
            "press_rotate"
        );
    }
}
