use std::time::{Duration, Instant};

/// Coalesces rapid card-selection clicks: each request re-arms a single
/// deadline, and only the latest card id fires once the quiet period has
/// passed. An explicit poll-driven scheduler rather than an implicit
/// timer, so callers decide when time advances.
#[derive(Debug)]
pub struct DebouncedSelect {
    wait: Duration,
    pending: Option<(String, Instant)>,
}

impl DebouncedSelect {
    pub const DEFAULT_WAIT: Duration = Duration::from_millis(100);

    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            pending: None,
        }
    }

    pub fn request(&mut self, card_id: impl Into<String>, now: Instant) {
        self.pending = Some((card_id.into(), now + self.wait));
    }

    /// Fires the pending selection if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => {
                self.pending.take().map(|(card_id, _)| card_id)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Default for DebouncedSelect {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WAIT)
    }
}
