//! Gesture target resolution.
//!
//! Pure policy: given the gesture, the session, the focused application and
//! a fresh stream listing, decide which application and which streams a
//! gesture acts on.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::app::ApplicationId;
use crate::audio::SinkInputInfo;
use crate::gesture::Gesture;
use crate::session::SessionState;

/// How an application is driven.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppController {
    /// Mute and volume on the application's streams.
    #[default]
    VolumeOnly,
    /// Volume like `VolumeOnly`, but a short press is a media play/pause
    /// sent to the MPRIS player (`None` picks the active player).
    Full { player: Option<String> },
}

/// What to do when the focused application has no streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Use the first stream that is not paused.
    #[default]
    FirstActive,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPolicy {
    pub default_app: Option<ApplicationId>,
    pub fallback: FallbackPolicy,
    pub controllers: BTreeMap<ApplicationId, AppController>,
}

impl TargetPolicy {
    #[must_use]
    pub fn controller_for(&self, app: Option<&ApplicationId>) -> AppController {
        app.and_then(|a| self.controllers.get(a))
            .cloned()
            .unwrap_or_default()
    }
}

/// Which rule produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Pinned,
    LastSelection,
    Focused,
    DefaultApp,
    FirstActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTargets {
    pub app: Option<ApplicationId>,
    /// Human-readable name for notifications.
    pub label: String,
    pub controller: AppController,
    /// Sink-input indices to act on. May be empty for a pinned application
    /// that currently has no streams.
    pub streams: Vec<u32>,
    pub via: Via,
}

impl ResolvedTargets {
    fn for_app(app: &ApplicationId, streams: &[SinkInputInfo], policy: &TargetPolicy, via: Via) -> Self {
        ResolvedTargets {
            app: Some(app.clone()),
            label: app.to_string(),
            controller: policy.controller_for(Some(app)),
            streams: streams_of(app, streams),
            via,
        }
    }
}

/// Inputs to [`resolve`] that come from outside the session.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub focused: Option<&'a ApplicationId>,
    pub streams: &'a [SinkInputInfo],
    pub policy: &'a TargetPolicy,
}

/// Decide the target of `gesture`. `None` means the gesture is a no-op.
///
/// - Long press never resolves; it drives the latch instead.
/// - Press-rotate targets the most recent picker selection, and falls back
///   to the rotate rules when nothing was ever selected.
/// - While latched, the pinned application wins over focus.
/// - Otherwise the focused application is used. If it has no streams, the
///   configured default application, then the first active stream, are
///   tried. A short press on a media-controlled application is the
///   exception: it resolves without streams.
#[must_use]
pub fn resolve(
    gesture: &Gesture,
    session: &SessionState,
    ctx: &ResolveContext<'_>,
) -> Option<ResolvedTargets> {
    match gesture {
        Gesture::LongPress => None,
        Gesture::PressRotate { .. } => match session.last_selection() {
            Some(app) => Some(ResolvedTargets::for_app(
                app,
                ctx.streams,
                ctx.policy,
                Via::LastSelection,
            )),
            None => resolve_current(gesture, session, ctx),
        },
        Gesture::ShortPress | Gesture::Rotate { .. } => resolve_current(gesture, session, ctx),
    }
}

fn resolve_current(
    gesture: &Gesture,
    session: &SessionState,
    ctx: &ResolveContext<'_>,
) -> Option<ResolvedTargets> {
    if let Some(pinned) = session.pinned() {
        return Some(ResolvedTargets::for_app(
            pinned,
            ctx.streams,
            ctx.policy,
            Via::Pinned,
        ));
    }

    let focused = ctx.focused?;
    let targets = ResolvedTargets::for_app(focused, ctx.streams, ctx.policy, Via::Focused);
    // Play/pause needs no stream; volume gestures do
    let media_press = matches!(gesture, Gesture::ShortPress)
        && matches!(targets.controller, AppController::Full { .. });
    if !targets.streams.is_empty() || media_press {
        return Some(targets);
    }

    if let Some(default_app) = &ctx.policy.default_app {
        let targets =
            ResolvedTargets::for_app(default_app, ctx.streams, ctx.policy, Via::DefaultApp);
        if !targets.streams.is_empty() {
            return Some(targets);
        }
    }

    match ctx.policy.fallback {
        FallbackPolicy::FirstActive => {
            let first = ctx.streams.iter().find(|si| si.is_active())?;
            Some(ResolvedTargets {
                app: first.app.clone(),
                label: first
                    .app
                    .as_ref()
                    .map_or_else(|| first.name.clone(), ToString::to_string),
                controller: AppController::VolumeOnly,
                streams: vec![first.index],
                via: Via::FirstActive,
            })
        }
        FallbackPolicy::None => None,
    }
}

/// Indices of every stream owned by `app`.
#[must_use]
pub fn streams_of(app: &ApplicationId, streams: &[SinkInputInfo]) -> Vec<u32> {
    streams
        .iter()
        .filter(|si| si.belongs_to(app))
        .map(|si| si.index)
        .collect()
}

/// Applications the picker offers: every application with at least one
/// stream, except the focused one. Sorted and unique.
#[must_use]
pub fn picker_candidates(
    streams: &[SinkInputInfo],
    focused: Option<&ApplicationId>,
) -> Vec<ApplicationId> {
    streams
        .iter()
        .filter_map(|si| si.app.as_ref())
        .filter(|app| Some(*app) != focused)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Volume;

    fn id(s: &str) -> ApplicationId {
        ApplicationId::new(s).unwrap()
    }

    fn stream(index: u32, app: &str, corked: bool) -> SinkInputInfo {
        SinkInputInfo {
            index,
            name: format!("{app} playback"),
            app: ApplicationId::new(app),
            binary: Some(app.into()),
            pid: None,
            sink_index: 0,
            volume: Volume::new(0.5),
            muted: false,
            corked,
            channels: 2,
        }
    }

    fn streams() -> Vec<SinkInputInfo> {
        vec![
            stream(10, "clementine", true),
            stream(11, "browser", false),
            stream(12, "browser", false),
            stream(13, "mpv", false),
        ]
    }

    fn run(
        gesture: Gesture,
        session: &SessionState,
        focused: Option<&str>,
        streams: &[SinkInputInfo],
        policy: &TargetPolicy,
    ) -> Option<ResolvedTargets> {
        let focused = focused.map(id);
        resolve(
            &gesture,
            session,
            &ResolveContext {
                focused: focused.as_ref(),
                streams,
                policy,
            },
        )
    }

    #[test]
    fn focused_app_gets_all_its_streams() {
        let r = run(
            Gesture::ShortPress,
            &SessionState::new(),
            Some("browser"),
            &streams(),
            &TargetPolicy::default(),
        )
        .unwrap();
        assert_eq!(r.app, Some(id("browser")));
        assert_eq!(r.streams, vec![11, 12]);
        assert_eq!(r.via, Via::Focused);
        assert_eq!(r.controller, AppController::VolumeOnly);
    }

    #[test]
    fn latched_target_ignores_focus() {
        let mut session = SessionState::new();
        session.latch(id("mpv"));
        let r = run(
            Gesture::Rotate { delta: 1 },
            &session,
            Some("browser"),
            &streams(),
            &TargetPolicy::default(),
        )
        .unwrap();
        assert_eq!(r.streams, vec![13]);
        assert_eq!(r.via, Via::Pinned);
    }

    #[test]
    fn pinned_app_without_streams_resolves_empty() {
        let mut session = SessionState::new();
        session.latch(id("gone"));
        let r = run(
            Gesture::Rotate { delta: 1 },
            &session,
            Some("browser"),
            &streams(),
            &TargetPolicy::default(),
        )
        .unwrap();
        assert!(r.streams.is_empty());
    }

    #[test]
    fn no_focus_is_noop() {
        assert!(run(
            Gesture::ShortPress,
            &SessionState::new(),
            None,
            &streams(),
            &TargetPolicy::default(),
        )
        .is_none());
    }

    #[test]
    fn unknown_focus_falls_back_to_default_app() {
        let policy = TargetPolicy {
            default_app: Some(id("clementine")),
            ..Default::default()
        };
        let r = run(
            Gesture::Rotate { delta: -1 },
            &SessionState::new(),
            Some("terminal"),
            &streams(),
            &policy,
        )
        .unwrap();
        assert_eq!(r.via, Via::DefaultApp);
        assert_eq!(r.streams, vec![10]);
    }

    #[test]
    fn unknown_focus_falls_back_to_first_active_stream() {
        let policy = TargetPolicy {
            default_app: Some(id("not-running")),
            ..Default::default()
        };
        let r = run(
            Gesture::Rotate { delta: -1 },
            &SessionState::new(),
            Some("terminal"),
            &streams(),
            &policy,
        )
        .unwrap();
        // clementine (10) is corked
        assert_eq!(r.via, Via::FirstActive);
        assert_eq!(r.streams, vec![11]);
        assert_eq!(r.label, "browser");
    }

    #[test]
    fn fallback_none_is_noop() {
        let policy = TargetPolicy {
            fallback: FallbackPolicy::None,
            ..Default::default()
        };
        assert!(run(
            Gesture::ShortPress,
            &SessionState::new(),
            Some("terminal"),
            &streams(),
            &policy,
        )
        .is_none());
    }

    #[test]
    fn no_streams_at_all_is_noop() {
        assert!(run(
            Gesture::ShortPress,
            &SessionState::new(),
            Some("terminal"),
            &[],
            &TargetPolicy::default(),
        )
        .is_none());
    }

    #[test]
    fn media_app_resolves_without_streams() {
        let mut policy = TargetPolicy::default();
        policy.controllers.insert(
            id("clementine"),
            AppController::Full {
                player: Some("clementine".into()),
            },
        );
        let r = run(
            Gesture::ShortPress,
            &SessionState::new(),
            Some("clementine"),
            &[],
            &policy,
        )
        .unwrap();
        assert_eq!(r.via, Via::Focused);
        assert!(r.streams.is_empty());
        assert!(matches!(r.controller, AppController::Full { .. }));
    }

    #[test]
    fn rotating_a_media_app_without_streams_falls_back() {
        let mut policy = TargetPolicy::default();
        policy
            .controllers
            .insert(id("clementine"), AppController::Full { player: None });
        let active = vec![stream(11, "browser", false)];

        let r = run(
            Gesture::Rotate { delta: 3 },
            &SessionState::new(),
            Some("clementine"),
            &active,
            &policy,
        )
        .unwrap();
        assert_eq!(r.via, Via::FirstActive);
        assert_eq!(r.streams, vec![11]);

        let r = run(
            Gesture::PressRotate { delta: 3 },
            &SessionState::new(),
            Some("clementine"),
            &active,
            &policy,
        )
        .unwrap();
        assert_eq!(r.streams, vec![11]);

        // The press itself still reaches the player
        let r = run(
            Gesture::ShortPress,
            &SessionState::new(),
            Some("clementine"),
            &active,
            &policy,
        )
        .unwrap();
        assert_eq!(r.via, Via::Focused);
        assert!(r.streams.is_empty());
    }

    #[test]
    fn press_rotate_uses_last_selection_after_unlatch() {
        let mut session = SessionState::new();
        session.latch(id("mpv"));
        session.unlatch();
        let r = run(
            Gesture::PressRotate { delta: 2 },
            &session,
            Some("browser"),
            &streams(),
            &TargetPolicy::default(),
        )
        .unwrap();
        assert_eq!(r.via, Via::LastSelection);
        assert_eq!(r.streams, vec![13]);
    }

    #[test]
    fn press_rotate_without_selection_falls_back_to_focus() {
        let r = run(
            Gesture::PressRotate { delta: 2 },
            &SessionState::new(),
            Some("browser"),
            &streams(),
            &TargetPolicy::default(),
        )
        .unwrap();
        assert_eq!(r.via, Via::Focused);
        assert_eq!(r.streams, vec![11, 12]);
    }

    #[test]
    fn long_press_never_resolves() {
        assert!(run(
            Gesture::LongPress,
            &SessionState::new(),
            Some("browser"),
            &streams(),
            &TargetPolicy::default(),
        )
        .is_none());
    }

    #[test]
    fn candidates_exclude_focused_and_dedupe() {
        let c = picker_candidates(&streams(), Some(&id("browser")));
        assert_eq!(c, vec![id("clementine"), id("mpv")]);

        let c = picker_candidates(&streams(), None);
        assert_eq!(c, vec![id("browser"), id("clementine"), id("mpv")]);

        assert!(picker_candidates(&[], None).is_empty());
    }
}
