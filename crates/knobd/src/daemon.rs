use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use knobd_core::app::{ApplicationId, FocusedWindow};
use knobd_core::config::{self, Config};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::{CoordinatorLinks, SessionCoordinator};
use crate::device_thread::{self, DeviceLinks};
use crate::mixer::PulseMixer;
use crate::picker::CommandPicker;
use crate::volume::VolumeController;
use crate::{config_watcher, engine, kwin, mpris, notifier, pulse, tray};

/// Run the daemon with the given log level.
pub fn run(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("knobd v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = Config::default_path().context("failed to resolve XDG config directory")?;
    match config::bootstrap_config(&config_path) {
        Ok(true) => info!("created default config at {}", config_path.display()),
        Ok(false) => {}
        Err(e) => warn!("failed to bootstrap config: {e}"),
    }

    let config = Config::load(&config_path).context("failed to load config")?;
    info!("loaded config from {}", config_path.display());
    match config.to_toml() {
        Ok(toml) => info!("active config:\n{toml}"),
        Err(e) => warn!("failed to serialize config for logging: {e}"),
    }

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let result = rt.block_on(async_main(config, config_path));
    // The device, PulseAudio and udev threads block in poll/recv; don't wait
    // on them forever.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(config: Config, config_path: PathBuf) -> Result<()> {
    let cancel = CancellationToken::new();

    let config_dir = config_path
        .parent()
        .context("config path has no parent directory")?
        .to_owned();
    let config_filename = config_path
        .file_name()
        .and_then(|f| f.to_str())
        .context("config filename is not valid UTF-8")?
        .to_owned();

    // Set up channels
    let (raw_event_tx, raw_event_rx) = mpsc::channel(64);
    let (indicator_tx, indicator_rx) = mpsc::channel(8);
    let (led_params_tx, led_params_rx) = watch::channel(config.led_params());
    let (device_connected_tx, device_connected_rx) = watch::channel(false);
    let (hotplug_tx, hotplug_rx) = std::sync::mpsc::sync_channel(4);
    let (mixer_request_tx, mixer_request_rx) = std::sync::mpsc::channel();
    let (pulse_connected_tx, pulse_connected_rx) = watch::channel(false);
    let (notice_tx, notice_rx) = mpsc::channel(8);
    let (media_tx, media_rx) = mpsc::channel(4);
    let (pinned_tx, pinned_rx) = watch::channel::<Option<ApplicationId>>(None);
    let (focused_window_tx, focused_window_rx) = watch::channel::<Option<FocusedWindow>>(None);
    let (tray_action_tx, tray_action_rx) = mpsc::channel(4);
    let (config_reload_tx, config_reload_rx) = mpsc::channel(4);

    let (vendor, product) = (config.device.vendor_id, config.device.product_id);

    // Start udev monitor (std::thread, MonitorSocket is not Send)
    let udev_cancel = cancel.clone();
    let udev_join = std::thread::Builder::new()
        .name("udev".into())
        .spawn(move || {
            device_thread::run_udev_monitor(vendor, product, hotplug_tx, udev_cancel);
        })
        .context("failed to spawn udev thread")?;

    // Start device thread (std::thread)
    let backoff = config.reconnect_backoff();
    let device_cancel = cancel.clone();
    let device_links = DeviceLinks {
        event_tx: raw_event_tx,
        indicator_rx,
        led_params: led_params_rx,
        connected_tx: device_connected_tx,
        hotplug_rx,
    };
    let device_join = std::thread::Builder::new()
        .name("device".into())
        .spawn(move || {
            device_thread::run(vendor, product, backoff, device_links, device_cancel);
        })
        .context("failed to spawn device thread")?;

    // Start PulseAudio thread (std::thread)
    let pa_cancel = cancel.clone();
    let pa_join = std::thread::Builder::new()
        .name("pulse".into())
        .spawn(move || {
            pulse::run(mixer_request_rx, pulse_connected_tx, pa_cancel);
        })
        .context("failed to spawn PulseAudio thread")?;

    let tray_cancel = cancel.clone();
    let tray_handle = tokio::spawn(async move {
        tray::run(tray_action_tx, pinned_rx, tray_cancel).await;
    });

    let kwin_cancel = cancel.clone();
    let kwin_handle = tokio::spawn(async move {
        kwin::run(focused_window_tx, kwin_cancel).await;
    });

    let mpris_cancel = cancel.clone();
    tokio::spawn(async move {
        mpris::run(media_rx, mpris_cancel).await;
    });

    let notifier_cancel = cancel.clone();
    tokio::spawn(async move {
        notifier::run(notice_rx, notifier_cancel).await;
    });

    let watcher_cancel = cancel.clone();
    tokio::spawn(async move {
        config_watcher::run(config_dir, config_filename, config_reload_tx, watcher_cancel).await;
    });

    // Set up signal handling
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        signal_cancel.cancel();
    });

    let mut volume = VolumeController::new(
        PulseMixer::new(mixer_request_tx, pulse_connected_rx),
        config.volume_step(),
        Some(notice_tx),
    );
    volume.set_notify(config.volume.notify);
    let picker = CommandPicker::new(
        config.picker.command.clone(),
        config.picker.args.clone(),
        config.picker_timeout(),
    );
    let coordinator = SessionCoordinator::new(
        volume,
        picker,
        config.target_policy(),
        CoordinatorLinks {
            indicator_tx,
            media_tx,
            pinned_tx,
        },
    );

    // Run the engine (blocks until shutdown)
    let channels = engine::EngineChannels {
        raw_event_rx,
        device_connected_rx,
        focused_window_rx,
        config_reload_rx,
        tray_action_rx,
        led_params_tx,
    };
    engine::run(config, config_path, coordinator, channels, cancel.clone()).await;

    info!("engine stopped, shutting down subsystems");
    cancel.cancel();

    // Wait for threads with timeout
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        let _ = tokio::task::spawn_blocking(move || {
            let _ = device_join.join();
            let _ = pa_join.join();
            let _ = udev_join.join();
        })
        .await;
    })
    .await;

    // The KWin task unloads its script on the way out
    let _ = tokio::time::timeout(Duration::from_millis(300), async {
        let _ = kwin_handle.await;
        let _ = tray_handle.await;
    })
    .await;

    info!("shutdown complete");
    Ok(())
}
