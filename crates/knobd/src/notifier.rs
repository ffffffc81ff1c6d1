use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::zvariant::Value;

use crate::volume::VolumeNotice;

const EXPIRE_MS: i32 = 1500;

fn icon_for(notice: &VolumeNotice) -> &'static str {
    match notice.percent {
        _ if notice.muted => "audio-volume-muted",
        0 => "audio-volume-muted",
        1..=33 => "audio-volume-low",
        34..=66 => "audio-volume-medium",
        _ => "audio-volume-high",
    }
}

fn body_for(notice: &VolumeNotice) -> String {
    if notice.muted {
        format!("{}% (muted)", notice.percent)
    } else {
        format!("{}%", notice.percent)
    }
}

/// Show volume notices through `org.freedesktop.Notifications`.
///
/// Consecutive notices replace the previous bubble. Without a notification
/// daemon, notices are logged and dropped.
pub async fn run(mut rx: mpsc::Receiver<VolumeNotice>, cancel: CancellationToken) {
    let conn = match zbus::Connection::session().await {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to connect to session bus (notifications disabled): {e}");
            drain(rx, cancel).await;
            return;
        }
    };

    let mut replaces_id: u32 = 0;
    loop {
        let notice = tokio::select! {
            () = cancel.cancelled() => break,
            n = rx.recv() => match n {
                Some(n) => n,
                None => break,
            },
        };

        // Only the latest value matters when the knob spins fast
        let notice = std::iter::from_fn(|| rx.try_recv().ok())
            .last()
            .unwrap_or(notice);

        match notify(&conn, replaces_id, &notice).await {
            Ok(id) => replaces_id = id,
            Err(e) => debug!("notification failed: {e}"),
        }
    }

    info!("notifier exiting");
}

async fn drain(mut rx: mpsc::Receiver<VolumeNotice>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            n = rx.recv() => match n {
                Some(n) => debug!("volume {}: {}", n.label, body_for(&n)),
                None => break,
            },
        }
    }
}

async fn notify(
    conn: &zbus::Connection,
    replaces_id: u32,
    notice: &VolumeNotice,
) -> Result<u32, zbus::Error> {
    let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
    hints.insert("value", Value::from(i32::from(notice.percent)));
    hints.insert("transient", Value::from(true));

    let actions: Vec<&str> = Vec::new();
    let reply = conn
        .call_method(
            Some("org.freedesktop.Notifications"),
            "/org/freedesktop/Notifications",
            Some("org.freedesktop.Notifications"),
            "Notify",
            &(
                "knobd",
                replaces_id,
                icon_for(notice),
                notice.label.as_str(),
                body_for(notice),
                actions,
                hints,
                EXPIRE_MS,
            ),
        )
        .await?;
    let id: u32 = reply.body().deserialize()?;
    Ok(id)
}
