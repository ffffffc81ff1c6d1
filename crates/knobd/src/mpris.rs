use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

/// Toggle playback on a player. `None` targets the best running player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayPause {
    pub player: Option<String>,
}

/// Serve play/pause requests on the session bus until cancelled.
///
/// The bus connection is opened on first use and reopened after a failure.
pub async fn run(mut rx: mpsc::Receiver<PlayPause>, cancel: CancellationToken) {
    let mut conn: Option<zbus::Connection> = None;

    loop {
        let req = tokio::select! {
            () = cancel.cancelled() => break,
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };

        if conn.is_none() {
            match zbus::Connection::session().await {
                Ok(c) => conn = Some(c),
                Err(e) => {
                    warn!("failed to connect to session bus for MPRIS: {e}");
                    continue;
                }
            }
        }
        let Some(c) = conn.as_ref() else {
            continue;
        };

        if let Err(e) = play_pause(c, req.player.as_deref()).await {
            warn!("MPRIS PlayPause failed: {e}");
            if matches!(e, zbus::Error::InputOutput(_)) {
                conn = None;
            }
        }
    }

    info!("MPRIS task exiting");
}

/// Send `PlayPause` to `player` (bus name suffix), or to the most appropriate
/// player when none is given.
///
/// Without a named player, one with `PlaybackStatus == "Playing"` is
/// preferred, otherwise the first found. No player at all is not an error.
pub async fn play_pause(conn: &zbus::Connection, player: Option<&str>) -> Result<(), zbus::Error> {
    let target = match player {
        Some(name) => player_bus_name(name),
        None => {
            let players = list_mpris_players(conn).await?;
            let Some(first) = players.first() else {
                debug!("no MPRIS players found, ignoring play/pause");
                return Ok(());
            };
            let mut target = first.clone();
            for p in &players {
                if is_playing(conn, p).await {
                    target = p.clone();
                    break;
                }
            }
            target
        }
    };

    debug!("sending MPRIS PlayPause to {target}");

    conn.call_method(
        Some(target.as_str()),
        "/org/mpris/MediaPlayer2",
        Some("org.mpris.MediaPlayer2.Player"),
        "PlayPause",
        &(),
    )
    .await?;

    Ok(())
}

/// Full bus name for a configured player, which may be given with or
/// without the MPRIS prefix.
fn player_bus_name(player: &str) -> String {
    if player.starts_with(MPRIS_PREFIX) {
        player.to_string()
    } else {
        format!("{MPRIS_PREFIX}{player}")
    }
}

async fn list_mpris_players(conn: &zbus::Connection) -> Result<Vec<String>, zbus::Error> {
    let reply = conn
        .call_method(
            Some("org.freedesktop.DBus"),
            "/org/freedesktop/DBus",
            Some("org.freedesktop.DBus"),
            "ListNames",
            &(),
        )
        .await?;

    let names: Vec<String> = reply.body().deserialize()?;
    Ok(names
        .into_iter()
        .filter(|n| n.starts_with(MPRIS_PREFIX))
        .collect())
}

async fn is_playing(conn: &zbus::Connection, player_name: &str) -> bool {
    try_is_playing(conn, player_name).await.unwrap_or(false)
}

async fn try_is_playing(conn: &zbus::Connection, player_name: &str) -> Option<bool> {
    let reply = conn
        .call_method(
            Some(player_name),
            "/org/mpris/MediaPlayer2",
            Some("org.freedesktop.DBus.Properties"),
            "Get",
            &("org.mpris.MediaPlayer2.Player", "PlaybackStatus"),
        )
        .await
        .ok()?;
    let val: zbus::zvariant::OwnedValue = reply.body().deserialize().ok()?;
    let s: String = val.try_into().ok()?;
    Some(s == "Playing")
}
