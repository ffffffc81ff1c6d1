use std::path::PathBuf;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Quiet period before a change is reported, so multi-step editor saves
/// collapse into one reload.
const SETTLE: Duration = Duration::from_millis(150);

/// Watch the config file and ask the engine to reload on every change.
///
/// The directory is watched rather than the file so that editors which save
/// by renaming a temp file over the old one are still seen.
pub async fn run(
    config_dir: PathBuf,
    config_filename: String,
    reload_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if event.paths.iter().any(|p| is_config_file(p, &config_filename)) {
                // Full channel means a reload is already pending
                let _ = tx.try_send(());
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to create config file watcher: {e}");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_dir, RecursiveMode::NonRecursive) {
        error!(
            "failed to watch config directory {}: {e}",
            config_dir.display()
        );
        return;
    }

    info!("watching config directory: {}", config_dir.display());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(()) = rx.recv() => {
                // Swallow the burst that follows the first event
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        () = tokio::time::sleep(SETTLE) => break,
                        Some(()) = rx.recv() => {}
                    }
                }
                debug!("config file changed, triggering reload");
                let _ = reload_tx.send(()).await;
            }
        }
    }
}

fn is_config_file(path: &std::path::Path, config_filename: &str) -> bool {
    path.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f == config_filename)
}
