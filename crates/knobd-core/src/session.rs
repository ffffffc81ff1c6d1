use crate::app::ApplicationId;

/// Whether a long-press has pinned an application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Latch {
    #[default]
    Unlatched,
    Latched(ApplicationId),
}

/// Cross-gesture state owned by the session coordinator.
///
/// The pinned application only exists while latched. `last_selection`
/// outlives the latch so press-rotate keeps acting on the most recent pick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    latch: Latch,
    last_selection: Option<ApplicationId>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_latched(&self) -> bool {
        matches!(self.latch, Latch::Latched(_))
    }

    #[must_use]
    pub fn pinned(&self) -> Option<&ApplicationId> {
        match &self.latch {
            Latch::Latched(app) => Some(app),
            Latch::Unlatched => None,
        }
    }

    #[must_use]
    pub fn last_selection(&self) -> Option<&ApplicationId> {
        self.last_selection.as_ref()
    }

    /// Pin `app` and remember it as the latest selection.
    pub fn latch(&mut self, app: ApplicationId) {
        self.last_selection = Some(app.clone());
        self.latch = Latch::Latched(app);
    }

    /// Release the pin. Returns the application that was pinned.
    pub fn unlatch(&mut self) -> Option<ApplicationId> {
        match std::mem::take(&mut self.latch) {
            Latch::Latched(app) => Some(app),
            Latch::Unlatched => None,
        }
    }

    /// Forget everything, including the last selection. Used when the
    /// device is reacquired.
    pub fn reset(&mut self) {
        *self = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ApplicationId {
        ApplicationId::new(s).unwrap()
    }

    #[test]
    fn starts_unlatched() {
        let s = SessionState::new();
        assert!(!s.is_latched());
        assert_eq!(s.pinned(), None);
        assert_eq!(s.last_selection(), None);
    }

    #[test]
    fn latch_then_unlatch_keeps_last_selection() {
        let mut s = SessionState::new();
        s.latch(id("mpv"));
        assert!(s.is_latched());
        assert_eq!(s.pinned(), Some(&id("mpv")));

        assert_eq!(s.unlatch(), Some(id("mpv")));
        assert!(!s.is_latched());
        assert_eq!(s.pinned(), None);
        assert_eq!(s.last_selection(), Some(&id("mpv")));
    }

    #[test]
    fn unlatch_when_unlatched_is_noop() {
        let mut s = SessionState::new();
        assert_eq!(s.unlatch(), None);
        assert_eq!(s, SessionState::new());
    }

    #[test]
    fn reset_clears_everything() {
        let mut s = SessionState::new();
        s.latch(id("mpv"));
        s.reset();
        assert!(!s.is_latched());
        assert_eq!(s.pinned(), None);
        assert_eq!(s.last_selection(), None);
    }
}
