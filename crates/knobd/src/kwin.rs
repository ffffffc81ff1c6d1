use std::path::{Path, PathBuf};
use std::time::Duration;

use knobd_core::app::FocusedWindow;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DBUS_SERVICE: &str = "org.knobd.Focus";
const DBUS_PATH: &str = "/org/knobd/Focus";
const DBUS_IFACE: &str = "org.knobd.Focus";
const KWIN_SCRIPT_NAME: &str = "knobd";
const LOAD_ATTEMPTS: u64 = 5;

/// Receives active-window reports from the KWin script.
struct FocusReceiver {
    tx: watch::Sender<Option<FocusedWindow>>,
}

#[zbus::interface(name = "org.knobd.Focus")]
impl FocusReceiver {
    fn update(
        &self,
        resource_class: &str,
        resource_name: &str,
        desktop_file: &str,
        parent_class: &str,
        pid: i32,
    ) {
        let window = focused_window(resource_class, resource_name, desktop_file, parent_class, pid);
        debug!("KWin script reported focused window: {window:?}");
        let _ = self.tx.send(window);
    }
}

/// Build the report, or `None` when KWin told us nothing usable.
fn focused_window(
    resource_class: &str,
    resource_name: &str,
    desktop_file: &str,
    parent_class: &str,
    pid: i32,
) -> Option<FocusedWindow> {
    let window = FocusedWindow {
        resource_class: resource_class.trim().to_string(),
        resource_name: resource_name.trim().to_string(),
        desktop_file: desktop_file.trim().to_string(),
        parent_class: parent_class.trim().to_string(),
        pid: u32::try_from(pid).unwrap_or(0),
    };
    if window == FocusedWindow::default() {
        None
    } else {
        Some(window)
    }
}

/// KWin script pushing the active window on every activation.
///
/// Null windows (desktop, panels) are not reported, so the last real window
/// stays focused from our point of view.
fn kwin_script_content() -> String {
    format!(
        r#"function sendWindowInfo(window) {{
    if (!window) {{
        return;
    }}
    var parent = window.transientFor;
    callDBus(
        "{DBUS_SERVICE}", "{DBUS_PATH}", "{DBUS_IFACE}", "Update",
        window.resourceClass || "",
        window.resourceName || "",
        window.desktopFileName || "",
        (parent && parent.resourceClass) || "",
        window.pid || 0
    );
}}
workspace.windowActivated.connect(sendWindowInfo);
sendWindowInfo(workspace.activeWindow);
"#
    )
}

/// Tracks the focused KDE Plasma window.
///
/// Registers `org.knobd.Focus` on the session bus, then loads a KWin script
/// that calls it on every focus change. If any step fails the tracker logs
/// a warning and idles until cancellation; focus-based targeting then finds
/// no application and gestures fall through to the configured fallback.
pub async fn run(focused_tx: watch::Sender<Option<FocusedWindow>>, cancel: CancellationToken) {
    // The script reports immediately on load, so the service must exist first
    let conn = match setup_dbus_service(focused_tx).await {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to register D-Bus service for focus tracking: {e}");
            cancel.cancelled().await;
            return;
        }
    };

    let script_path = match write_kwin_script() {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to write KWin script (focus tracking disabled): {e}");
            cancel.cancelled().await;
            return;
        }
    };

    // KWin may not be up yet at login
    let mut loaded = false;
    for attempt in 1..=LOAD_ATTEMPTS {
        match load_kwin_script(&conn, &script_path).await {
            Ok(()) => {
                loaded = true;
                break;
            }
            Err(e) if attempt < LOAD_ATTEMPTS => {
                warn!("KWin script load failed (attempt {attempt}/{LOAD_ATTEMPTS}): {e}");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(500 * attempt)) => {}
                }
            }
            Err(e) => {
                warn!("KWin script load failed after {attempt} attempts (focus tracking disabled): {e}");
            }
        }
    }
    if !loaded {
        let _ = std::fs::remove_file(&script_path);
        cancel.cancelled().await;
        return;
    }

    info!("KWin focus tracking active");
    cancel.cancelled().await;

    if let Err(e) = unload_kwin_script(&conn).await {
        debug!("failed to unload KWin script on shutdown: {e}");
    }
    let _ = std::fs::remove_file(&script_path);
}

async fn setup_dbus_service(
    focused_tx: watch::Sender<Option<FocusedWindow>>,
) -> Result<zbus::Connection, zbus::Error> {
    let receiver = FocusReceiver { tx: focused_tx };

    zbus::connection::Builder::session()?
        .name(DBUS_SERVICE)?
        .serve_at(DBUS_PATH, receiver)?
        .build()
        .await
}

fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn write_kwin_script() -> Result<PathBuf, std::io::Error> {
    let path = runtime_dir().join("knobd-kwin.js");
    std::fs::write(&path, kwin_script_content())?;
    Ok(path)
}

async fn load_kwin_script(conn: &zbus::Connection, script_path: &Path) -> Result<(), zbus::Error> {
    // A previous run killed with SIGKILL leaves its script registered
    let _ = unload_kwin_script(conn).await;

    let path_str = script_path.to_str().unwrap_or_default();
    let reply = conn
        .call_method(
            Some("org.kde.KWin"),
            "/Scripting",
            Some("org.kde.kwin.Scripting"),
            "loadScript",
            &(path_str, KWIN_SCRIPT_NAME),
        )
        .await?;
    let script_id: i32 = reply.body().deserialize()?;
    debug!("loaded KWin script '{KWIN_SCRIPT_NAME}' with id {script_id}");

    conn.call_method(
        Some("org.kde.KWin"),
        "/Scripting",
        Some("org.kde.kwin.Scripting"),
        "start",
        &(),
    )
    .await?;
    Ok(())
}

async fn unload_kwin_script(conn: &zbus::Connection) -> Result<(), zbus::Error> {
    conn.call_method(
        Some("org.kde.KWin"),
        "/Scripting",
        Some("org.kde.kwin.Scripting"),
        "unloadScript",
        &(KWIN_SCRIPT_NAME,),
    )
    .await?;
    debug!("unloaded KWin script '{KWIN_SCRIPT_NAME}'");
    Ok(())
}
