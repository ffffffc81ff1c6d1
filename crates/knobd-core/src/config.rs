use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{Aliases, ApplicationId};
use crate::event::{PRODUCT_ID, VENDOR_ID};
use crate::indicator::LedParams;
use crate::resolve::{AppController, FallbackPolicy, TargetPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write config to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml_edit::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize { source: toml_edit::ser::Error },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

/// Which input device to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    /// Pause between attempts to (re)open the device.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
}

fn default_vendor_id() -> u16 {
    VENDOR_ID
}
fn default_product_id() -> u16 {
    PRODUCT_ID
}
fn default_reconnect_backoff_secs() -> u64 {
    10
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
        }
    }
}

/// Gesture timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureConfig {
    /// Presses held at least this long are long presses.
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,
    /// Events older than this when read are dropped.
    #[serde(default = "default_stale_event_ms")]
    pub stale_event_ms: u64,
}

fn default_long_press_ms() -> u64 {
    500
}
fn default_stale_event_ms() -> u64 {
    2000
}

impl Default for GestureConfig {
    fn default() -> Self {
        GestureConfig {
            long_press_ms: default_long_press_ms(),
            stale_event_ms: default_stale_event_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume change per rotation detent, as a fraction of full scale.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Show a desktop notification after each change.
    #[serde(default = "default_true")]
    pub notify: bool,
}

fn default_step() -> f64 {
    0.005
}

fn default_true() -> bool {
    true
}

impl Default for VolumeConfig {
    fn default() -> Self {
        VolumeConfig {
            step: default_step(),
            notify: true,
        }
    }
}

/// Fallback when the focused application has no audio streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_app: Option<ApplicationId>,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    /// 0-510, higher is faster.
    #[serde(default = "default_pulse_speed")]
    pub pulse_speed: u16,
    /// Pulse waveform, 0-2.
    #[serde(default)]
    pub pulse_table: u8,
}

fn default_brightness() -> u8 {
    255
}
fn default_pulse_speed() -> u16 {
    255
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            brightness: default_brightness(),
            pulse_speed: default_pulse_speed(),
            pulse_table: 0,
        }
    }
}

/// dmenu-style command used to pick the application to pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickerConfig {
    #[serde(default = "default_picker_command")]
    pub command: String,
    #[serde(default = "default_picker_args")]
    pub args: Vec<String>,
    #[serde(default = "default_picker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_picker_command() -> String {
    "rofi".into()
}
fn default_picker_args() -> Vec<String> {
    ["-dmenu", "-i", "-p", "Pin application"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_picker_timeout_secs() -> u64 {
    60
}

impl Default for PickerConfig {
    fn default() -> Self {
        PickerConfig {
            command: default_picker_command(),
            args: default_picker_args(),
            timeout_secs: default_picker_timeout_secs(),
        }
    }
}

/// Per-application behaviour under `[apps.<id>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "controller", rename_all = "snake_case")]
pub enum AppConfig {
    Volume,
    /// Short press toggles playback over MPRIS instead of muting.
    Media {
        /// MPRIS bus name suffix, e.g. `clementine` for
        /// `org.mpris.MediaPlayer2.clementine`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<String>,
    },
}

impl From<&AppConfig> for AppController {
    fn from(cfg: &AppConfig) -> Self {
        match cfg {
            AppConfig::Volume => AppController::VolumeOnly,
            AppConfig::Media { player } => AppController::Full {
                player: player.clone(),
            },
        }
    }
}

/// Top-level configuration.
///
/// Forward-compatible: unknown fields are silently ignored (no `deny_unknown_fields`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub gesture: GestureConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub picker: PickerConfig,
    /// Window class rewrites, e.g. `gl = "mpv"`.
    #[serde(default)]
    pub aliases: Aliases,
    #[serde(default)]
    pub apps: BTreeMap<ApplicationId, AppConfig>,
}

impl Config {
    #[must_use]
    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.gesture.long_press_ms)
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.gesture.stale_event_ms)
    }

    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.device.reconnect_backoff_secs.max(1))
    }

    #[must_use]
    pub fn picker_timeout(&self) -> Duration {
        Duration::from_secs(self.picker.timeout_secs.max(1))
    }

    /// Volume step per detent. Non-positive or absurd values fall back to
    /// the default.
    #[must_use]
    pub fn volume_step(&self) -> f64 {
        let step = self.volume.step;
        if step.is_finite() && step > 0.0 && step <= 1.0 {
            step
        } else {
            default_step()
        }
    }

    #[must_use]
    pub fn led_params(&self) -> LedParams {
        LedParams {
            brightness: self.indicator.brightness,
            pulse_speed: self.indicator.pulse_speed,
            pulse_table: self.indicator.pulse_table,
        }
    }

    #[must_use]
    pub fn target_policy(&self) -> TargetPolicy {
        TargetPolicy {
            default_app: self.target.default_app.clone(),
            fallback: self.target.fallback,
            controllers: self
                .apps
                .iter()
                .map(|(id, cfg)| (id.clone(), AppController::from(cfg)))
                .collect(),
        }
    }

    /// Load config from a TOML file. Returns default config if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml_edit::de::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }

    /// Serialize this config to a TOML string.
    ///
    /// Every section renders as a `[section]` header and each application
    /// as its own `[apps.<id>]` table.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut doc = toml_edit::ser::to_document(self)
            .map_err(|source| ConfigError::Serialize { source })?;

        expand_top_level_tables(&mut doc);

        if self.aliases.is_empty() {
            doc.remove("aliases");
        }
        if self.apps.is_empty() {
            doc.remove("apps");
        } else {
            expand_app_tables(&mut doc);
        }

        Ok(doc.to_string())
    }

    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("knobd"))
    }

    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(Self::default_dir()?.join("config.toml"))
    }
}

/// Convert top-level `InlineTable` values into proper `Table` entries so they
/// render as `[section]` headers instead of `section = { ... }` one-liners.
fn expand_top_level_tables(doc: &mut toml_edit::DocumentMut) {
    use toml_edit::{Item, Value};

    let keys: Vec<String> = doc.iter().map(|(k, _)| k.to_owned()).collect();
    for key in keys {
        let Some(item) = doc.get_mut(&key) else {
            continue;
        };
        if let Item::Value(Value::InlineTable(inline)) = item {
            let table = inline.clone().into_table();
            *item = Item::Table(table);
        }
    }
}

/// Give every `[apps.<id>]` entry its own header and hide the bare `[apps]`
/// parent.
fn expand_app_tables(doc: &mut toml_edit::DocumentMut) {
    use toml_edit::{Item, Value};

    let Some(Item::Table(apps)) = doc.get_mut("apps") else {
        return;
    };

    let keys: Vec<String> = apps.iter().map(|(k, _)| k.to_owned()).collect();
    for key in &keys {
        let Some(item) = apps.get_mut(key) else {
            continue;
        };
        if let Item::Value(Value::InlineTable(inline)) = item {
            let table = inline.clone().into_table();
            *item = Item::Table(table);
        }
    }

    apps.sort_values();
    apps.set_implicit(true);
}

const HEADER: &str = "\
# knobd configuration
# Changes are picked up automatically while the daemon runs.

";

const EXAMPLE: &str = "\n\
# Example: treat a window class as another application
# [aliases]
# gl = \"mpv\"

# Example: short press toggles playback instead of muting
# [apps.clementine]
# controller = \"media\"
# player = \"clementine\"

# Example: always fall back to a music player when the focused window
# has no audio
# [target]
# default_app = \"clementine\"
# fallback = \"first_active\"
";

/// Generate the default config file content for new users.
///
/// The body is `Config::default().to_toml()`, so the documented defaults
/// can never drift from the code.
pub fn default_config_content() -> Result<String, ConfigError> {
    let body = Config::default().to_toml()?;
    Ok(format!("{HEADER}{body}{EXAMPLE}"))
}

/// Write the default config with comments to the given path if it doesn't exist.
/// Creates parent directories as needed. Returns true if the file was created.
pub fn bootstrap_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_owned(),
            source,
        })?;
    }

    write_atomic(path, &default_config_content()?)?;
    Ok(true)
}

/// Write `contents` to `path.tmp`, then rename it over `path`. The config
/// watcher only ever sees a complete file.
fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, contents).map_err(|source| ConfigError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
        path: path.to_owned(),
        source,
    })
}
