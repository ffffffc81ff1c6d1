use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::truncate;
use crate::mixer::{Mixer, PulseMixer};
use crate::pulse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn run() -> Result<()> {
    let cancel = CancellationToken::new();
    let (request_tx, request_rx) = std::sync::mpsc::channel();
    let (connected_tx, connected_rx) = watch::channel(false);

    let pa_cancel = cancel.clone();
    let pa_join = std::thread::Builder::new()
        .name("pulse".into())
        .spawn(move || pulse::run(request_rx, connected_tx, pa_cancel))?;

    let mut mixer = PulseMixer::new(request_tx, connected_rx);
    let result = if mixer.wait_connected(CONNECT_TIMEOUT).await {
        mixer.sink_inputs().await.map_err(anyhow::Error::from)
    } else {
        Err(anyhow::anyhow!("could not connect to PulseAudio"))
    };

    cancel.cancel();
    let _ = tokio::task::spawn_blocking(move || pa_join.join()).await;

    let streams = result?;
    if streams.is_empty() {
        println!("No audio streams playing.");
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:<30} {:<20} {:<8} {:<6} {:<7}",
        "INDEX", "APP", "NAME", "BINARY", "VOLUME", "MUTED", "STATE"
    );
    for si in &streams {
        println!(
            "{:<6} {:<20} {:<30} {:<20} {:<7}% {:<6} {:<7}",
            si.index,
            truncate(si.app.as_ref().map_or("-", |a| a.as_str()), 19),
            truncate(&si.name, 29),
            truncate(si.binary.as_deref().unwrap_or("-"), 19),
            si.volume.percent(),
            if si.muted { "yes" } else { "no" },
            if si.is_active() { "playing" } else { "paused" },
        );
    }
    Ok(())
}
