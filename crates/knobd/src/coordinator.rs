use knobd_core::app::ApplicationId;
use knobd_core::audio::MixerError;
use knobd_core::gesture::Gesture;
use knobd_core::indicator::IndicatorState;
use knobd_core::resolve::{self, AppController, ResolveContext, ResolvedTargets, TargetPolicy};
use knobd_core::session::SessionState;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::mixer::Mixer;
use crate::mpris::PlayPause;
use crate::picker::{Pick, Picker};
use crate::volume::VolumeController;

/// Outbound channels of the coordinator.
pub struct CoordinatorLinks {
    pub indicator_tx: mpsc::Sender<IndicatorState>,
    pub media_tx: mpsc::Sender<PlayPause>,
    /// Currently pinned application, for the tray.
    pub pinned_tx: watch::Sender<Option<ApplicationId>>,
}

/// Turns gestures into mixer, picker, indicator and media actions.
///
/// Owns the only [`SessionState`]. A gesture that fails on the mixer leaves
/// the session as it was.
pub struct SessionCoordinator<M, P> {
    volume: VolumeController<M>,
    picker: P,
    session: SessionState,
    policy: TargetPolicy,
    focused: Option<ApplicationId>,
    links: CoordinatorLinks,
}

impl<M: Mixer, P: Picker> SessionCoordinator<M, P> {
    pub fn new(
        volume: VolumeController<M>,
        picker: P,
        policy: TargetPolicy,
        links: CoordinatorLinks,
    ) -> Self {
        SessionCoordinator {
            volume,
            picker,
            session: SessionState::new(),
            policy,
            focused: None,
            links,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn volume_mut(&mut self) -> &mut VolumeController<M> {
        &mut self.volume
    }

    pub fn set_policy(&mut self, policy: TargetPolicy) {
        self.policy = policy;
    }

    pub fn set_focus(&mut self, focused: Option<ApplicationId>) {
        if self.focused != focused {
            debug!(
                "focus: {}",
                focused.as_ref().map_or("none", ApplicationId::as_str)
            );
            self.focused = focused;
        }
    }

    /// Drop the pin and the last selection, and show the steady indicator.
    pub fn reset(&mut self) {
        self.session.reset();
        self.publish_pinned();
        self.show(IndicatorState::Steady);
    }

    pub async fn handle(&mut self, gesture: Gesture) -> Result<(), MixerError> {
        match gesture {
            Gesture::LongPress => self.toggle_latch().await,
            Gesture::ShortPress => {
                let Some(targets) = self.resolve(&gesture).await? else {
                    return Ok(());
                };
                match targets.controller {
                    AppController::Full { player } => {
                        debug!("play/pause for {}", targets.label);
                        if self.links.media_tx.try_send(PlayPause { player }).is_err() {
                            warn!("media channel full, dropping play/pause");
                        }
                    }
                    AppController::VolumeOnly => {
                        self.volume
                            .toggle_mute(&targets.label, &targets.streams)
                            .await?;
                    }
                }
                Ok(())
            }
            Gesture::Rotate { delta } | Gesture::PressRotate { delta } => {
                let Some(targets) = self.resolve(&gesture).await? else {
                    return Ok(());
                };
                self.volume
                    .adjust_volume(&targets.label, &targets.streams, delta)
                    .await?;
                Ok(())
            }
        }
    }

    async fn resolve(&self, gesture: &Gesture) -> Result<Option<ResolvedTargets>, MixerError> {
        let streams = self.volume.mixer().sink_inputs().await?;
        let ctx = ResolveContext {
            focused: self.focused.as_ref(),
            streams: &streams,
            policy: &self.policy,
        };
        let targets = resolve::resolve(gesture, &self.session, &ctx);
        match &targets {
            Some(t) => debug!(
                "{} -> {} via {:?}, streams {:?}",
                gesture.kind(),
                t.label,
                t.via,
                t.streams
            ),
            None => debug!("{} has no target", gesture.kind()),
        }
        Ok(targets)
    }

    /// Unpin when latched, otherwise ask the picker for an application to pin.
    async fn toggle_latch(&mut self) -> Result<(), MixerError> {
        if self.session.is_latched() {
            if let Some(app) = self.session.unlatch() {
                info!("unpinned {app}");
            }
            self.publish_pinned();
            self.show(IndicatorState::Steady);
            return Ok(());
        }

        let streams = self.volume.mixer().sink_inputs().await?;
        let candidates = resolve::picker_candidates(&streams, self.focused.as_ref());
        if candidates.is_empty() {
            info!("no other applications are playing, nothing to pin");
            self.show(IndicatorState::Steady);
            return Ok(());
        }

        self.show(IndicatorState::Pulsing);
        match self.picker.pick(&candidates).await {
            Pick::Selected(app) => {
                info!("pinned {app}");
                self.session.latch(app);
                self.publish_pinned();
            }
            Pick::Cancelled => {
                debug!("pick cancelled");
                self.show(IndicatorState::Steady);
            }
        }
        Ok(())
    }

    fn show(&self, state: IndicatorState) {
        if self.links.indicator_tx.try_send(state).is_err() {
            debug!("indicator channel full, dropping {state}");
        }
    }

    fn publish_pinned(&self) {
        let pinned = self.session.pinned().cloned();
        self.links.pinned_tx.send_if_modified(|current| {
            if *current == pinned {
                false
            } else {
                *current = pinned;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::mixer::{stream, MockMixer};
    use crate::picker::MockPicker;
    use knobd_core::resolve::FallbackPolicy;

    fn id(s: &str) -> ApplicationId {
        ApplicationId::new(s).unwrap()
    }

    struct Rig {
        coord: SessionCoordinator<MockMixer, MockPicker>,
        indicator_rx: mpsc::Receiver<IndicatorState>,
        media_rx: mpsc::Receiver<PlayPause>,
        pinned_rx: watch::Receiver<Option<ApplicationId>>,
    }

    impl Rig {
        fn indicators(&mut self) -> Vec<IndicatorState> {
            std::iter::from_fn(|| self.indicator_rx.try_recv().ok()).collect()
        }
    }

    fn rig(mixer: MockMixer, picker: MockPicker, policy: TargetPolicy) -> Rig {
        let (indicator_tx, indicator_rx) = mpsc::channel(16);
        let (media_tx, media_rx) = mpsc::channel(4);
        let (pinned_tx, pinned_rx) = watch::channel(None);
        let coord = SessionCoordinator::new(
            VolumeController::new(mixer, 0.005, None),
            picker,
            policy,
            CoordinatorLinks {
                indicator_tx,
                media_tx,
                pinned_tx,
            },
        );
        Rig {
            coord,
            indicator_rx,
            media_rx,
            pinned_rx,
        }
    }

    fn two_apps() -> MockMixer {
        MockMixer::with_inputs(vec![
            stream(1, "browser", 0.5, false),
            stream(2, "mpv", 0.5, false),
        ])
    }

    #[tokio::test]
    async fn short_press_mutes_focused_app() {
        let mut r = rig(two_apps(), MockPicker::default(), TargetPolicy::default());
        r.coord.set_focus(Some(id("browser")));

        r.coord.handle(Gesture::ShortPress).await.unwrap();
        let mixer = r.coord.volume_mut().mixer();
        assert!(mixer.input(1).muted);
        assert!(!mixer.input(2).muted);
    }

    #[tokio::test]
    async fn all_streams_of_an_app_move_together() {
        let mixer = MockMixer::with_inputs(vec![
            stream(1, "browser", 0.5, false),
            stream(3, "browser", 0.2, false),
        ]);
        let mut r = rig(mixer, MockPicker::default(), TargetPolicy::default());
        r.coord.set_focus(Some(id("browser")));

        r.coord.handle(Gesture::Rotate { delta: 20 }).await.unwrap();
        let mixer = r.coord.volume_mut().mixer();
        assert!((mixer.input(1).volume.get() - 0.6).abs() < 1e-9);
        assert!((mixer.input(3).volume.get() - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn latch_select_then_release() {
        let picker = MockPicker::answering(vec![Pick::Selected(id("mpv"))]);
        let mut r = rig(two_apps(), picker, TargetPolicy::default());
        r.coord.set_focus(Some(id("browser")));

        r.coord.handle(Gesture::LongPress).await.unwrap();
        assert_eq!(r.coord.session().pinned(), Some(&id("mpv")));
        assert_eq!(r.indicators(), vec![IndicatorState::Pulsing]);
        assert_eq!(*r.pinned_rx.borrow(), Some(id("mpv")));
        // The focused app is not offered
        assert_eq!(r.coord.picker.shown(), vec![vec![id("mpv")]]);

        // Rotation follows the pin, not focus
        r.coord.handle(Gesture::Rotate { delta: 10 }).await.unwrap();
        let mixer = r.coord.volume_mut().mixer();
        assert!((mixer.input(2).volume.get() - 0.55).abs() < 1e-9);
        assert!((mixer.input(1).volume.get() - 0.5).abs() < 1e-9);

        r.coord.handle(Gesture::LongPress).await.unwrap();
        assert!(!r.coord.session().is_latched());
        assert_eq!(r.indicators(), vec![IndicatorState::Steady]);
        assert_eq!(*r.pinned_rx.borrow(), None);
    }

    #[tokio::test]
    async fn cancelled_pick_stays_unlatched() {
        let picker = MockPicker::answering(vec![Pick::Cancelled]);
        let mut r = rig(two_apps(), picker, TargetPolicy::default());

        r.coord.handle(Gesture::LongPress).await.unwrap();
        assert!(!r.coord.session().is_latched());
        assert_eq!(
            r.indicators(),
            vec![IndicatorState::Pulsing, IndicatorState::Steady]
        );
    }

    #[tokio::test]
    async fn no_candidates_skips_picker() {
        let mixer = MockMixer::with_inputs(vec![stream(1, "browser", 0.5, false)]);
        let mut r = rig(mixer, MockPicker::default(), TargetPolicy::default());
        r.coord.set_focus(Some(id("browser")));

        r.coord.handle(Gesture::LongPress).await.unwrap();
        assert!(!r.coord.session().is_latched());
        assert!(r.coord.picker.shown().is_empty());
        assert_eq!(r.indicators(), vec![IndicatorState::Steady]);
    }

    #[tokio::test]
    async fn press_rotate_keeps_last_selection_after_unlatch() {
        let picker = MockPicker::answering(vec![Pick::Selected(id("mpv"))]);
        let mut r = rig(two_apps(), picker, TargetPolicy::default());
        r.coord.set_focus(Some(id("browser")));

        r.coord.handle(Gesture::LongPress).await.unwrap();
        r.coord.handle(Gesture::LongPress).await.unwrap();
        assert!(!r.coord.session().is_latched());

        r.coord
            .handle(Gesture::PressRotate { delta: -20 })
            .await
            .unwrap();
        let mixer = r.coord.volume_mut().mixer();
        assert!((mixer.input(2).volume.get() - 0.4).abs() < 1e-9);
        assert!((mixer.input(1).volume.get() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn press_rotate_without_selection_follows_focus() {
        let mut r = rig(two_apps(), MockPicker::default(), TargetPolicy::default());
        r.coord.set_focus(Some(id("browser")));

        r.coord
            .handle(Gesture::PressRotate { delta: 10 })
            .await
            .unwrap();
        let mixer = r.coord.volume_mut().mixer();
        assert!((mixer.input(1).volume.get() - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn media_app_short_press_plays_pauses() {
        let policy = TargetPolicy {
            controllers: BTreeMap::from([(
                id("mpv"),
                AppController::Full {
                    player: Some("mpv".into()),
                },
            )]),
            ..Default::default()
        };
        let mut r = rig(two_apps(), MockPicker::default(), policy);
        r.coord.set_focus(Some(id("mpv")));

        r.coord.handle(Gesture::ShortPress).await.unwrap();
        assert_eq!(
            r.media_rx.try_recv().unwrap(),
            PlayPause {
                player: Some("mpv".into())
            }
        );
        assert!(r.coord.volume_mut().mixer().writes().is_empty());

        // Rotation is still volume
        r.coord.handle(Gesture::Rotate { delta: 2 }).await.unwrap();
        assert_eq!(r.coord.volume_mut().mixer().writes().len(), 1);
    }

    #[tokio::test]
    async fn mixer_error_leaves_session_unchanged() {
        let picker = MockPicker::answering(vec![Pick::Selected(id("mpv"))]);
        let mut r = rig(two_apps(), picker, TargetPolicy::default());
        r.coord.handle(Gesture::LongPress).await.unwrap();
        r.indicators();

        r.coord.volume_mut().mixer().fail(MixerError::Timeout);
        assert_eq!(
            r.coord.handle(Gesture::ShortPress).await,
            Err(MixerError::Timeout)
        );
        assert_eq!(r.coord.session().pinned(), Some(&id("mpv")));

        r.coord.handle(Gesture::LongPress).await.unwrap();
        assert!(!r.coord.session().is_latched());

        // Picking needs the stream list, so a failure leaves us unlatched
        assert_eq!(
            r.coord.handle(Gesture::LongPress).await,
            Err(MixerError::Timeout)
        );
        assert!(!r.coord.session().is_latched());
        assert_eq!(r.coord.picker.shown().len(), 1);
    }

    #[tokio::test]
    async fn unknown_focus_falls_back_to_first_active() {
        let mixer = MockMixer::with_inputs(vec![
            {
                let mut s = stream(1, "browser", 0.5, false);
                s.corked = true;
                s
            },
            stream(2, "mpv", 0.5, false),
        ]);
        let mut r = rig(mixer, MockPicker::default(), TargetPolicy::default());
        r.coord.set_focus(Some(id("terminal")));

        r.coord.handle(Gesture::ShortPress).await.unwrap();
        assert!(r.coord.volume_mut().mixer().input(2).muted);
        assert!(!r.coord.volume_mut().mixer().input(1).muted);
    }

    #[tokio::test]
    async fn no_fallback_is_noop() {
        let policy = TargetPolicy {
            fallback: FallbackPolicy::None,
            ..Default::default()
        };
        let mut r = rig(two_apps(), MockPicker::default(), policy);
        r.coord.set_focus(Some(id("terminal")));

        r.coord.handle(Gesture::ShortPress).await.unwrap();
        r.coord.set_focus(None);
        r.coord.handle(Gesture::Rotate { delta: 5 }).await.unwrap();
        assert!(r.coord.volume_mut().mixer().writes().is_empty());
    }

    #[tokio::test]
    async fn reset_drops_pin_and_selection() {
        let picker = MockPicker::answering(vec![Pick::Selected(id("mpv"))]);
        let mut r = rig(two_apps(), picker, TargetPolicy::default());
        r.coord.handle(Gesture::LongPress).await.unwrap();
        r.indicators();

        r.coord.reset();
        assert_eq!(r.coord.session(), &SessionState::new());
        assert_eq!(*r.pinned_rx.borrow(), None);
        assert_eq!(r.indicators(), vec![IndicatorState::Steady]);
    }
}
