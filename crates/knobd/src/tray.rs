use std::time::Duration;

use knobd_core::app::ApplicationId;
use ksni::TrayMethods;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Actions from the system tray to the engine.
#[derive(Debug, Clone)]
pub enum TrayAction {
    Quit,
}

struct KnobTray {
    action_tx: mpsc::Sender<TrayAction>,
    pinned: Option<ApplicationId>,
}

impl KnobTray {
    fn status_line(&self) -> String {
        match &self.pinned {
            Some(app) => format!("Pinned to {app}"),
            None => "Following focus".into(),
        }
    }
}

impl ksni::Tray for KnobTray {
    fn id(&self) -> String {
        "knobd".into()
    }

    fn title(&self) -> String {
        format!("knobd: {}", self.status_line())
    }

    fn icon_name(&self) -> String {
        if self.pinned.is_some() {
            "audio-volume-medium".into()
        } else {
            "audio-volume-high".into()
        }
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        ksni::ToolTip {
            title: "knobd".into(),
            description: self.status_line(),
            ..Default::default()
        }
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        vec![
            ksni::MenuItem::Standard(ksni::menu::StandardItem {
                label: self.status_line(),
                enabled: false,
                ..Default::default()
            }),
            ksni::MenuItem::Separator,
            ksni::MenuItem::Standard(ksni::menu::StandardItem {
                label: "Quit".into(),
                activate: Box::new(|tray: &mut Self| {
                    // ksni callbacks are synchronous
                    let _ = tray.action_tx.blocking_send(TrayAction::Quit);
                }),
                ..Default::default()
            }),
        ]
    }
}

/// Run the system tray until cancelled, mirroring the pinned application.
pub async fn run(
    action_tx: mpsc::Sender<TrayAction>,
    mut pinned_rx: watch::Receiver<Option<ApplicationId>>,
    cancel: CancellationToken,
) {
    // spawn() consumes the tray, so build a fresh one per attempt
    let handle = 'retry: {
        for attempt in 1..=5u64 {
            let tray = KnobTray {
                action_tx: action_tx.clone(),
                pinned: pinned_rx.borrow_and_update().clone(),
            };
            match tray.spawn().await {
                Ok(handle) => break 'retry handle,
                Err(e) => {
                    if attempt < 5 {
                        warn!("tray spawn failed (attempt {attempt}/5): {e}");
                        tokio::time::sleep(Duration::from_millis(500 * attempt)).await;
                    } else {
                        warn!("tray spawn failed after {attempt} attempts: {e}");
                        return;
                    }
                }
            }
        }
        return;
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = pinned_rx.changed() => {
                if result.is_err() {
                    cancel.cancelled().await;
                    break;
                }
                let pinned = pinned_rx.borrow_and_update().clone();
                debug!("tray: pinned {pinned:?}");
                handle.update(|tray: &mut KnobTray| tray.pinned = pinned).await;
            }
        }
    }
    handle.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_pin() {
        let (action_tx, _rx) = mpsc::channel(1);
        let mut tray = KnobTray {
            action_tx,
            pinned: None,
        };
        assert_eq!(tray.status_line(), "Following focus");
        tray.pinned = ApplicationId::new("mpv");
        assert_eq!(tray.status_line(), "Pinned to mpv");
    }
}
