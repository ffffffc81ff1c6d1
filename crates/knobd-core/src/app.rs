use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower-cased application identifier.
///
/// Both sides of a match (window focus and mixer stream metadata) are
/// normalised through this type, so comparing two ids is plain equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationId(String);

impl ApplicationId {
    /// Normalise `raw` (trim, lower-case). Returns `None` for blank input.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(ApplicationId(trimmed.to_lowercase()))
    }

    /// Id for a process binary name: extension and wrapper suffixes removed.
    #[must_use]
    pub fn from_binary(binary: &str) -> Option<Self> {
        Self::new(binary_stem(binary.trim()))
    }

    /// Id for a mixer stream, from `application.process.binary` with
    /// `application.name` as fallback.
    #[must_use]
    pub fn for_stream(binary: Option<&str>, name: Option<&str>) -> Option<Self> {
        binary
            .and_then(Self::from_binary)
            .or_else(|| name.and_then(Self::new))
    }

    /// Replace this id by its alias target, if one is configured.
    #[must_use]
    pub fn aliased(self, aliases: &Aliases) -> Self {
        match aliases.get(&self) {
            Some(target) => target.clone(),
            None => self,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ApplicationId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ApplicationId::new(&value).ok_or_else(|| "application id must not be empty".to_string())
    }
}

impl From<ApplicationId> for String {
    fn from(id: ApplicationId) -> Self {
        id.0
    }
}

/// Window-class to application-id rewrites (`[aliases]` in the config).
pub type Aliases = BTreeMap<ApplicationId, ApplicationId>;

/// What the focus tracker reports about the active window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusedWindow {
    pub resource_class: String,
    pub resource_name: String,
    pub desktop_file: String,
    /// Class of the transient parent, for dialogs that carry no class.
    pub parent_class: String,
    pub pid: u32,
}

impl FocusedWindow {
    /// Application id of the window: its class, else the parent's class,
    /// else the resource name, else the desktop file stem. Aliases apply to
    /// whichever wins.
    #[must_use]
    pub fn application_id(&self, aliases: &Aliases) -> Option<ApplicationId> {
        ApplicationId::new(&self.resource_class)
            .or_else(|| ApplicationId::new(&self.parent_class))
            .or_else(|| ApplicationId::new(&self.resource_name))
            .or_else(|| ApplicationId::new(desktop_file_stem(&self.desktop_file)))
            .map(|id| id.aliased(aliases))
    }
}

/// Last dotted segment of a reverse-DNS desktop file id.
///
/// `"org.mozilla.firefox"` → `"firefox"`, `"firefox"` → `"firefox"`.
#[must_use]
pub fn desktop_file_stem(s: &str) -> &str {
    let s = s.strip_suffix(".desktop").unwrap_or(s);
    match s.rfind('.') {
        Some(pos) => &s[pos + 1..],
        None => s,
    }
}

/// Strip one file extension, then one wrapper suffix (`-bin`, `-wrapped`).
///
/// `"vlc.bin"` → `"vlc"`, `"firefox-bin"` → `"firefox"`, `"cabin"` → `"cabin"`.
#[must_use]
pub fn binary_stem(s: &str) -> &str {
    let without_ext = match s.rfind('.') {
        Some(pos) if pos > 0 => &s[..pos],
        _ => s,
    };
    without_ext
        .strip_suffix("-bin")
        .or_else(|| without_ext.strip_suffix("-wrapped"))
        .unwrap_or(without_ext)
}
