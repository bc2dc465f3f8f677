use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use futures_util::StreamExt;
use genfeed_core::config::ReconnectConfig;
use genfeed_core::{GenerationKind, NotificationDeduper, NotificationEvent, Signal, SignalBus};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Response;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::api::check_status;
use crate::credential::SessionCredential;
use crate::error::ClientError;
use crate::sse::{SseDecoder, SseFrame};

const LAST_EVENT_ID: &str = "Last-Event-ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// No usable session. Nothing is retried until `connect` is called again
    /// with a fresh credential.
    AwaitingAuth,
}

type Handler = Arc<dyn Fn(&NotificationEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: Option<GenerationKind>,
    handler: Handler,
}

/// Handle returned by [`EventStreamClient::on_event`]. Dropping it keeps the
/// handler registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    inner: Weak<StreamInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|r| r.id != self.id);
        }
    }
}

// ─── EventStreamClient ──────────────────────────────────────────────────────

/// Long-lived push connection for task notifications.
///
/// Every distinct event is delivered once to the handlers registered for its
/// kind, then raised as a coarse [`Signal`]. Transport failures are retried
/// with backoff and never surfaced to callers.
pub struct EventStreamClient {
    inner: Arc<StreamInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct StreamInner {
    client: reqwest::Client,
    url: Url,
    reconnect: ReconnectConfig,
    handlers: RwLock<Vec<Registration>>,
    next_handler_id: AtomicU64,
    deduper: Mutex<NotificationDeduper>,
    signals: SignalBus,
    status: watch::Sender<ConnectionStatus>,
    last_event_id: Mutex<Option<String>>,
}

impl EventStreamClient {
    pub fn new(client: reqwest::Client, url: Url, reconnect: ReconnectConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            inner: Arc::new(StreamInner {
                client,
                url,
                reconnect,
                handlers: RwLock::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                deduper: Mutex::new(NotificationDeduper::new()),
                signals: SignalBus::new(),
                status,
                last_event_id: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Opens the stream. A no-op while a connection (or reconnect loop) is
    /// already running.
    pub fn connect(&self, credential: &SessionCredential) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("event stream already running");
            return;
        }
        if !credential.is_authenticated() {
            tracing::warn!("no valid session, event stream not opened");
            self.inner.set_status(ConnectionStatus::AwaitingAuth);
            return;
        }

        let inner = Arc::clone(&self.inner);
        let token = credential.token().to_string();
        *task = Some(tokio::spawn(run(inner, token)));
    }

    /// Idempotent. The dedup set survives so a later reconnect that replays
    /// events does not deliver them twice.
    pub fn disconnect(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            tracing::info!("event stream disconnected");
        }
        self.inner.set_status(ConnectionStatus::Idle);
    }

    /// Disconnects and forgets every delivered event id.
    pub fn logout(&self) {
        self.disconnect();
        self.inner
            .deduper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        *self
            .inner
            .last_event_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn on_event(
        &self,
        kind: GenerationKind,
        handler: impl Fn(&NotificationEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(Some(kind), Arc::new(handler))
    }

    pub fn on_any(
        &self,
        handler: impl Fn(&NotificationEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(None, Arc::new(handler))
    }

    /// Pushes an event through dedup and dispatch as if it had arrived on the
    /// wire. Used for notifications obtained out of band.
    pub fn deliver(&self, event: NotificationEvent) {
        self.inner.dispatch(&event);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn signals(&self) -> &SignalBus {
        &self.inner.signals
    }

    fn register(&self, kind: Option<GenerationKind>, handler: Handler) -> Subscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { id, kind, handler });
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

// ─── Read loop ──────────────────────────────────────────────────────────────

async fn run(inner: Arc<StreamInner>, token: String) {
    let mut attempt: u32 = 0;

    loop {
        // Only the connection that carried a `retry:` hint may shorten the
        // next wait; open failures always fall back to backoff.
        let mut retry_hint: Option<u64> = None;
        inner.set_status(if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        match inner.open(&token).await {
            Ok(response) => {
                inner.set_status(ConnectionStatus::Connected);
                tracing::info!(url = %inner.url, "event stream connected");
                attempt = 0;

                let mut decoder = SseDecoder::new();
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for frame in decoder.feed(&bytes) {
                                inner.handle_frame(frame);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "event stream read failed");
                            break;
                        }
                    }
                }
                retry_hint = decoder.retry_ms();
                tracing::info!("event stream ended");
            }
            Err(ClientError::Unauthorized) => {
                tracing::warn!("event stream rejected the session");
                inner.set_status(ConnectionStatus::AwaitingAuth);
                inner.signals.publish(&Signal::SessionExpired);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "failed to open event stream");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = match retry_hint {
            Some(ms) => inner.reconnect.hinted_delay(ms),
            None => inner.reconnect.delay(attempt),
        };
        inner.set_status(ConnectionStatus::Reconnecting);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting event stream");
        tokio::time::sleep(delay).await;
    }
}

impl StreamInner {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    async fn open(&self, token: &str) -> Result<Response, ClientError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .bearer_auth(token);
        let last_event_id = self
            .last_event_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID, id);
        }
        check_status(request.send().await?).await
    }

    fn handle_frame(&self, frame: SseFrame) {
        if let Some(id) = &frame.id {
            *self
                .last_event_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        }
        if !frame.is_notification() {
            tracing::trace!(event = ?frame.event, "ignoring non-notification frame");
            return;
        }
        match serde_json::from_str::<NotificationEvent>(&frame.data) {
            Ok(event) => self.dispatch(&event),
            Err(e) => tracing::warn!(error = %e, "discarding malformed notification frame"),
        }
    }

    fn dispatch(&self, event: &NotificationEvent) {
        let fresh = self
            .deduper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_process(event);
        if !fresh {
            tracing::debug!(notification_id = event.id, "duplicate notification dropped");
            return;
        }

        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind.map_or(true, |kind| kind == event.r#type))
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }

        self.signals.publish(&Signal::from_notification(event));
    }
}
