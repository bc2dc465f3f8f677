use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use genfeed_core::TaskListReconciler;
use tokio::sync::watch;

use crate::api::TaskApi;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub has_more: bool,
    pub loading: bool,
    pub cursor: Option<String>,
    /// The last fetch failed. Cleared by the next fetch.
    pub failed: bool,
    pub loaded_first: bool,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            has_more: true,
            loading: false,
            cursor: None,
            failed: false,
            loaded_first: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { added: usize },
    /// Another fetch was in flight, or there is nothing left to load.
    Skipped,
    /// The list was reset while the page was on its way; the page was dropped.
    Stale,
    Failed,
}

/// Cursor pagination over the shared task list.
///
/// At most one page fetch runs at a time: `load_more` refuses to start while
/// another fetch is in flight, `load_first` waits for it.
pub struct PaginationController {
    api: Arc<dyn TaskApi>,
    reconciler: Arc<Mutex<TaskListReconciler>>,
    page_size: u32,
    in_flight: tokio::sync::Mutex<()>,
    state: watch::Sender<PaginationState>,
}

impl PaginationController {
    pub fn new(
        api: Arc<dyn TaskApi>,
        reconciler: Arc<Mutex<TaskListReconciler>>,
        page_size: u32,
    ) -> Self {
        let (state, _) = watch::channel(PaginationState::default());
        Self {
            api,
            reconciler,
            page_size,
            in_flight: tokio::sync::Mutex::new(()),
            state,
        }
    }

    pub async fn load_more(&self) -> Result<LoadOutcome, ClientError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("page fetch already in flight");
            return Ok(LoadOutcome::Skipped);
        };

        let state = self.state();
        if !state.has_more {
            return Ok(LoadOutcome::Skipped);
        }
        if !state.loaded_first {
            return self.fetch(None, true).await;
        }
        self.fetch(state.cursor, false).await
    }

    pub async fn load_first(&self) -> Result<LoadOutcome, ClientError> {
        let _guard = self.in_flight.lock().await;
        self.fetch(None, true).await
    }

    /// Re-enables loading after a failed fetch and tries again from the last
    /// good cursor.
    pub async fn retry(&self) -> Result<LoadOutcome, ClientError> {
        self.state.send_modify(|s| {
            s.has_more = true;
            s.failed = false;
        });
        self.load_more().await
    }

    /// Back to the initial state, e.g. after logout.
    pub fn reset(&self) {
        self.state.send_replace(PaginationState::default());
    }

    pub fn has_more(&self) -> bool {
        self.state.borrow().has_more
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn state(&self) -> PaginationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaginationState> {
        self.state.subscribe()
    }

    fn lock_reconciler(&self) -> MutexGuard<'_, TaskListReconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches one page and applies it, unless the list was reset while the
    /// request was out. Callers hold `in_flight`, so any reset seen here came
    /// from outside pagination (e.g. logout).
    async fn fetch(&self, cursor: Option<String>, first: bool) -> Result<LoadOutcome, ClientError> {
        let generation = self.lock_reconciler().generation();
        self.state.send_modify(|s| {
            s.loading = true;
            s.failed = false;
        });

        let result = self.api.list_tasks(self.page_size, cursor.as_deref()).await;

        // State updates happen under the reconciler lock so they cannot
        // interleave with a reset.
        let mut reconciler = self.lock_reconciler();
        if reconciler.generation() != generation {
            tracing::debug!(cursor = ?cursor, "dropping page from before a reset");
            self.state.send_modify(|s| s.loading = false);
            return Ok(LoadOutcome::Stale);
        }

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.has_more = false;
                    s.failed = true;
                });
                drop(reconciler);
                if err.is_auth() {
                    return Err(err);
                }
                tracing::warn!(error = %err, cursor = ?cursor, "page fetch failed");
                return Ok(LoadOutcome::Failed);
            }
        };

        let next_cursor = page.cursor().map(String::from);
        let has_more = page.has_next();
        let added = if first {
            reconciler.reset(page);
            reconciler.len()
        } else {
            reconciler.append_page(page)
        };
        tracing::debug!(cursor = ?cursor, next = ?next_cursor, added, "page loaded");
        self.state.send_modify(|s| {
            s.loading = false;
            s.cursor = next_cursor;
            s.has_more = has_more;
            s.loaded_first = true;
        });
        Ok(LoadOutcome::Loaded { added })
    }
}
