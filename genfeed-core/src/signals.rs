use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{GenerationKind, NotificationEvent, NotificationId, TaskId, TaskStatus};

/// Coarse, process-local signal raised for every processed notification so
/// that independent parts of the client can react without knowing about the
/// event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    ImageCompleted(SignalContext),
    VideoCompleted(SignalContext),
    UpscaleCompleted(SignalContext),
    TaskFailed(SignalContext),
    TaskProgress(SignalContext),
    /// The server rejected the session; a fresh login is required.
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalContext {
    pub notification_id: NotificationId,
    pub kind: GenerationKind,
    pub task_id: Option<TaskId>,
}

impl Signal {
    pub fn from_notification(event: &NotificationEvent) -> Signal {
        let ctx = SignalContext {
            notification_id: event.id,
            kind: event.r#type,
            task_id: event.task_id(),
        };
        match event.task_status() {
            Some(TaskStatus::Completed) => match event.r#type {
                GenerationKind::Image => Signal::ImageCompleted(ctx),
                GenerationKind::Video => Signal::VideoCompleted(ctx),
                GenerationKind::Upscale => Signal::UpscaleCompleted(ctx),
            },
            Some(TaskStatus::Failed) => Signal::TaskFailed(ctx),
            _ => Signal::TaskProgress(ctx),
        }
    }

    pub fn context(&self) -> Option<&SignalContext> {
        match self {
            Signal::ImageCompleted(ctx)
            | Signal::VideoCompleted(ctx)
            | Signal::UpscaleCompleted(ctx)
            | Signal::TaskFailed(ctx)
            | Signal::TaskProgress(ctx) => Some(ctx),
            Signal::SessionExpired => None,
        }
    }

    /// True for completion and failure signals.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::TaskProgress(_) | Signal::SessionExpired)
    }
}

// ─── SignalBus ──────────────────────────────────────────────────────────────

type Handler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Typed local publish/subscribe. Handlers run synchronously on the
/// publishing task, in registration order.
#[derive(Clone, Default)]
pub struct SignalBus {
    listeners: Arc<RwLock<Vec<Handler>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, signal: &Signal) {
        let handlers = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(signal);
        }
    }

    /// Registers a handler and returns a closure that removes it again.
    pub fn subscribe(&self, handler: impl Fn(&Signal) + Send + Sync + 'static) -> Unsubscribe {
        let handler: Handler = Arc::new(handler);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&handler));

        let listeners = Arc::clone(&self.listeners);
        // Identity comparison only, never dereferenced.
        let handler_addr = Arc::as_ptr(&handler) as *const () as usize;

        Box::new(move || {
            listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|h| (Arc::as_ptr(h) as *const () as usize) != handler_addr);
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub type Unsubscribe = Box<dyn Fn() + Send + Sync>;
