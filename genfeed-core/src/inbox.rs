use std::collections::VecDeque;

use crate::types::{NotificationEvent, NotificationId};

pub const DEFAULT_INBOX_CAPACITY: usize = 50;

/// Delivered notifications, newest first, with a client-local read flag.
///
/// This backs the notification dropdown and its unread badge. The oldest
/// entries fall off once `capacity` is reached.
#[derive(Debug)]
pub struct NotificationInbox {
    entries: VecDeque<NotificationEvent>,
    capacity: usize,
}

impl NotificationInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_INBOX_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Adds a notification at the head. An id already present is replaced in place.
    pub fn push(&mut self, event: NotificationEvent) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == event.id) {
            let read = existing.read;
            *existing = event;
            existing.read |= read;
            return;
        }
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.read).count()
    }

    /// Returns `false` if the id is not in the inbox.
    pub fn mark_read(&mut self, id: NotificationId) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.read = true;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NotificationInbox {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}
