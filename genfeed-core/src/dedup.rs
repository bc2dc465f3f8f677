use std::collections::HashSet;

use crate::types::{NotificationEvent, NotificationId};

/// Passes through only the first occurrence of each notification id.
///
/// The seen-set lives for the whole session and is never evicted; it is
/// cleared on logout via [`NotificationDeduper::reset`].
#[derive(Debug, Default)]
pub struct NotificationDeduper {
    seen: HashSet<NotificationId>,
}

impl NotificationDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time an event id is observed, `false` after.
    pub fn should_process(&mut self, event: &NotificationEvent) -> bool {
        self.seen.insert(event.id)
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
