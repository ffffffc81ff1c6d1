use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use knobd_core::app::FocusedWindow;
use knobd_core::bus::{EventBus, Handler};
use knobd_core::config::Config;
use knobd_core::event::RawEvent;
use knobd_core::gesture::{Gesture, GestureClassifier};
use knobd_core::indicator::LedParams;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::SessionCoordinator;
use crate::mixer::Mixer;
use crate::picker::Picker;
use crate::tray::TrayAction;

/// All channel endpoints consumed by the engine.
pub struct EngineChannels {
    pub raw_event_rx: mpsc::Receiver<RawEvent>,
    pub device_connected_rx: watch::Receiver<bool>,
    pub focused_window_rx: watch::Receiver<Option<FocusedWindow>>,
    pub config_reload_rx: mpsc::Receiver<()>,
    pub tray_action_rx: mpsc::Receiver<TrayAction>,
    pub led_params_tx: watch::Sender<LedParams>,
}

/// Central engine loop.
///
/// Raw events go through the classifier and out on the event bus. Gestures
/// queued by the bus are handled one at a time, to completion, before the
/// next raw event is read.
pub async fn run<M: Mixer, P: Picker>(
    mut config: Config,
    config_path: PathBuf,
    mut coordinator: SessionCoordinator<M, P>,
    channels: EngineChannels,
    cancel: CancellationToken,
) {
    let EngineChannels {
        mut raw_event_rx,
        mut device_connected_rx,
        mut focused_window_rx,
        mut config_reload_rx,
        mut tray_action_rx,
        led_params_tx,
    } = channels;

    let mut classifier = GestureClassifier::new(config.long_press(), config.stale_after());
    let (gesture_tx, mut gesture_rx) = mpsc::unbounded_channel::<Gesture>();
    let mut bus = EventBus::new();
    let log_gesture: Handler = Arc::new(|g: &Gesture| debug!("gesture {g:?}"));
    let enqueue: Handler = Arc::new(move |g: &Gesture| {
        let _ = gesture_tx.send(*g);
    });
    bus.register_all(&log_gesture);
    bus.register_all(&enqueue);

    // The focus tracker may have reported before the engine started
    let mut focused_window = focused_window_rx.borrow_and_update().clone();
    coordinator.set_focus(
        focused_window.as_ref().and_then(|w| w.application_id(&config.aliases)),
    );

    info!("engine started");

    'engine: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("engine received shutdown signal");
                break;
            }

            Some(action) = tray_action_rx.recv() => {
                match action {
                    TrayAction::Quit => {
                        info!("quit requested from tray");
                        cancel.cancel();
                        break;
                    }
                }
            }

            Some(event) = raw_event_rx.recv() => {
                let now = SystemTime::now();
                if classifier.is_stale(&event, now) {
                    debug!("dropping stale {:?} event", event.kind);
                    continue;
                }
                let Some(gesture) = classifier.feed(&event, now) else {
                    continue;
                };
                bus.publish(&gesture);

                while let Ok(g) = gesture_rx.try_recv() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("engine received shutdown signal");
                            break 'engine;
                        }
                        result = coordinator.handle(g) => {
                            if let Err(e) = result {
                                warn!("{} failed: {e}", g.kind());
                            }
                        }
                    }
                }
            }

            result = focused_window_rx.changed() => {
                if result.is_ok() {
                    focused_window = focused_window_rx.borrow_and_update().clone();
                    coordinator.set_focus(
                        focused_window.as_ref().and_then(|w| w.application_id(&config.aliases)),
                    );
                }
            }

            result = device_connected_rx.changed() => {
                if result.is_ok() {
                    let connected = *device_connected_rx.borrow_and_update();
                    classifier.reset();
                    if connected {
                        info!("device connected, starting a fresh session");
                        coordinator.reset();
                    } else {
                        info!("device disconnected");
                    }
                }
            }

            Some(()) = config_reload_rx.recv() => {
                info!("config reload triggered");
                match Config::load(&config_path) {
                    Ok(new_config) => {
                        if new_config.device != config.device || new_config.picker != config.picker {
                            warn!("device and picker settings take effect after a restart");
                        }
                        config = new_config;
                        classifier.set_timing(config.long_press(), config.stale_after());
                        coordinator.set_policy(config.target_policy());
                        coordinator.volume_mut().set_step(config.volume_step());
                        coordinator.volume_mut().set_notify(config.volume.notify);
                        led_params_tx.send_replace(config.led_params());
                        // Aliases may have changed what the focused window maps to
                        coordinator.set_focus(
                            focused_window.as_ref().and_then(|w| w.application_id(&config.aliases)),
                        );
                        info!("config reloaded successfully");
                        match config.to_toml() {
                            Ok(toml) => debug!("active config:\n{toml}"),
                            Err(e) => warn!("failed to serialize config for logging: {e}"),
                        }
                    }
                    Err(e) => {
                        warn!("config reload failed (keeping previous config): {e}");
                    }
                }
            }
        }
    }

    bus.clear();
    info!("engine stopped");
}
