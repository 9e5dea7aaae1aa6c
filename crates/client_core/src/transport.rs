use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ChatMessage, ParticipantId, SessionId},
    protocol::OutboundEvent,
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connected,
    Disconnected {
        reason: String,
        will_reconnect: bool,
    },
    Error {
        detail: String,
    },
    MessageReceived(ChatMessage),
    UserJoined(ParticipantId),
    UserLeft(ParticipantId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    MessageReceived,
    UserJoined,
    UserLeft,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Error,
        EventKind::MessageReceived,
        EventKind::UserJoined,
        EventKind::UserLeft,
    ];
}

impl RelayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RelayEvent::Connected => EventKind::Connected,
            RelayEvent::Disconnected { .. } => EventKind::Disconnected,
            RelayEvent::Error { .. } => EventKind::Error,
            RelayEvent::MessageReceived(_) => EventKind::MessageReceived,
            RelayEvent::UserJoined(_) => EventKind::UserJoined,
            RelayEvent::UserLeft(_) => EventKind::UserLeft,
        }
    }
}

/// One open link to the relay. Emits are fire-and-forget.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError>;
    fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent>;
    async fn close(&self);
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn RelayChannel>, TransportError>;
}

pub type EventHandler = Arc<dyn Fn(RelayEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub generation: u64,
}

struct ActiveLink {
    channel: Arc<dyn RelayChannel>,
    pump: JoinHandle<()>,
}

struct TransportInner {
    connector: Arc<dyn RelayConnector>,
    connect_timeout: Duration,
    handlers: Mutex<HashMap<EventKind, EventHandler>>,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
}

impl TransportInner {
    fn dispatch(&self, event: RelayEvent) {
        let kind = event.kind();
        let handler = lock_unpoisoned(&self.handlers).get(&kind).cloned();
        match handler {
            Some(handler) => handler(event),
            None => debug!(?kind, "relay: no handler registered; event dropped"),
        }
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        if let Some(link) = lock_unpoisoned(&self.link).take() {
            link.pump.abort();
        }
    }
}

/// Room-scoped view over a relay connection with at most one handler per event kind.
#[derive(Clone)]
pub struct RelayTransport {
    inner: Arc<TransportInner>,
}

impl RelayTransport {
    pub fn new(connector: Arc<dyn RelayConnector>, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                connector,
                connect_timeout,
                handlers: Mutex::new(HashMap::new()),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub async fn connect(&self, credential: &str) -> Result<ConnectionHandle, TransportError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let channel = match tokio::time::timeout(
            self.inner.connect_timeout,
            self.inner.connector.connect(credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout),
        };

        let events = channel.subscribe_events();
        let (attached, replaced) = {
            let mut link = lock_unpoisoned(&self.inner.link);
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                (false, None)
            } else {
                let pump = spawn_pump(Arc::downgrade(&self.inner), events);
                let replaced = link
                    .replace(ActiveLink {
                        channel: Arc::clone(&channel),
                        pump,
                    })
                    .map(|previous| {
                        previous.pump.abort();
                        previous.channel
                    });
                (true, replaced)
            }
        };

        if let Some(previous) = replaced {
            previous.close().await;
        }
        if !attached {
            info!("relay: connect finished after disconnect; closing stale link");
            channel.close().await;
            return Err(TransportError::Cancelled);
        }

        info!(generation, "relay: connected");
        self.inner.dispatch(RelayEvent::Connected);
        Ok(ConnectionHandle { generation })
    }

    pub fn join_room(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<(), TransportError> {
        self.emit(OutboundEvent::JoinRoom {
            room_id: session_id.clone(),
            user_id: participant_id.clone(),
        })
    }

    /// Best-effort; does nothing when no link is open.
    pub fn leave_room(&self, session_id: &SessionId) {
        if !self.is_connected() {
            return;
        }
        if let Err(err) = self.emit(OutboundEvent::LeaveRoom {
            room_id: session_id.clone(),
        }) {
            debug!(%err, "relay: leave-room not delivered");
        }
    }

    pub fn send(&self, session_id: &SessionId, content: &str) -> Result<(), TransportError> {
        self.emit(OutboundEvent::SendMessage {
            room_id: session_id.clone(),
            message: content.to_string(),
        })
    }

    /// Registers `handler` for `kind`, replacing any previous handler. Returns true on replace.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> bool
    where
        F: Fn(RelayEvent) + Send + Sync + 'static,
    {
        lock_unpoisoned(&self.inner.handlers)
            .insert(kind, Arc::new(handler))
            .is_some()
    }

    pub fn unsubscribe(&self, kind: EventKind) -> bool {
        lock_unpoisoned(&self.inner.handlers).remove(&kind).is_some()
    }

    pub fn unsubscribe_all(&self) {
        lock_unpoisoned(&self.inner.handlers).clear();
    }

    pub fn handler_count(&self) -> usize {
        lock_unpoisoned(&self.inner.handlers).len()
    }

    pub fn is_connected(&self) -> bool {
        lock_unpoisoned(&self.inner.link).is_some()
    }

    /// Closes the current link and invalidates any connect still in flight.
    pub async fn disconnect(&self) {
        let link = {
            let mut guard = lock_unpoisoned(&self.inner.link);
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            guard.take()
        };

        if let Some(link) = link {
            link.pump.abort();
            link.channel.close().await;
            info!("relay: disconnected");
        }
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        let channel = lock_unpoisoned(&self.inner.link)
            .as_ref()
            .map(|link| Arc::clone(&link.channel));
        match channel {
            Some(channel) => channel.emit(event),
            None => Err(TransportError::NotConnected),
        }
    }
}

fn spawn_pump(
    inner: Weak<TransportInner>,
    mut events: broadcast::Receiver<RelayEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.dispatch(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "relay: event consumer lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
