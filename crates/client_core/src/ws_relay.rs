use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{InboundEvent, OutboundEvent};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{http::StatusCode, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::SessionSettings,
    error::TransportError,
    transport::{lock_unpoisoned, RelayChannel, RelayConnector, RelayEvent},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RELAY_EVENT_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Connects to a JSON-over-WebSocket relay speaking `{"event": .., "data": ..}` frames.
#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    url: Url,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl WsRelayConnector {
    pub fn new(
        relay_url: &str,
        reconnect_attempts: u32,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let url =
            Url::parse(relay_url).with_context(|| format!("invalid relay url: {relay_url}"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(anyhow!("relay url must start with ws:// or wss://"));
        }
        Ok(Self {
            url,
            reconnect_attempts,
            reconnect_delay,
        })
    }

    pub fn from_settings(settings: &SessionSettings) -> Result<Self> {
        Self::new(
            &settings.relay_url,
            settings.reconnect_attempts,
            settings.reconnect_delay,
        )
    }

    fn handshake_url(&self, credential: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", credential);
        url
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn RelayChannel>, TransportError> {
        let url = self.handshake_url(credential);
        let socket = open_socket(&url).await?;
        info!(relay = %self.url, "relay: websocket established");

        let (events, _) = broadcast::channel(RELAY_EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive_relay(
            socket,
            outbound_rx,
            events.clone(),
            ReconnectPolicy {
                url,
                attempts: self.reconnect_attempts,
                delay: self.reconnect_delay,
            },
        ));

        Ok(Arc::new(WsRelayChannel {
            outbound: Mutex::new(Some(outbound_tx)),
            events,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

struct WsRelayChannel {
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundEvent>>>,
    events: broadcast::Sender<RelayEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl RelayChannel for WsRelayChannel {
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        lock_unpoisoned(&self.outbound)
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .send(event)
            .map_err(|_| TransportError::NotConnected)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    async fn close(&self) {
        // Dropping the sender lets the driver send a close frame; reconnect backoff is aborted.
        drop(lock_unpoisoned(&self.outbound).take());
        let driver = lock_unpoisoned(&self.driver).take();
        if let Some(mut driver) = driver {
            if tokio::time::timeout(CLOSE_GRACE, &mut driver).await.is_err() {
                driver.abort();
            }
        }
    }
}

impl Drop for WsRelayChannel {
    fn drop(&mut self) {
        if let Some(driver) = lock_unpoisoned(&self.driver).take() {
            driver.abort();
        }
    }
}

struct ReconnectPolicy {
    url: Url,
    attempts: u32,
    delay: Duration,
}

enum LinkEnd {
    Closed,
    Dropped(String),
}

/// Linear reconnect backoff, saturating at `Duration::MAX`.
pub(crate) fn backoff(delay: Duration, attempt: u32) -> Duration {
    delay.saturating_mul(attempt)
}

async fn open_socket(url: &Url) -> Result<WsStream, TransportError> {
    match connect_async(url.as_str()).await {
        Ok((socket, _)) => Ok(socket),
        Err(WsError::Http(response))
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            Err(TransportError::Unauthorized)
        }
        Err(err) => Err(TransportError::NetworkUnavailable(err.to_string())),
    }
}

async fn drive_relay(
    mut socket: WsStream,
    mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    events: broadcast::Sender<RelayEvent>,
    policy: ReconnectPolicy,
) {
    loop {
        let reason = match pump_socket(socket, &mut outbound, &events).await {
            LinkEnd::Closed => return,
            LinkEnd::Dropped(reason) => reason,
        };

        if policy.attempts == 0 {
            warn!(%reason, "relay: link dropped");
            let _ = events.send(RelayEvent::Disconnected {
                reason,
                will_reconnect: false,
            });
            return;
        }

        warn!(%reason, attempts = policy.attempts, "relay: link dropped; reconnecting");
        let _ = events.send(RelayEvent::Disconnected {
            reason: reason.clone(),
            will_reconnect: true,
        });

        let mut reconnected = None;
        for attempt in 1..=policy.attempts {
            tokio::time::sleep(backoff(policy.delay, attempt)).await;
            match open_socket(&policy.url).await {
                Ok(next) => {
                    reconnected = Some(next);
                    break;
                }
                Err(TransportError::Unauthorized) => {
                    warn!(attempt, "relay: credential rejected on reconnect");
                    break;
                }
                Err(err) => {
                    warn!(attempt, %err, "relay: reconnect attempt failed");
                    let _ = events.send(RelayEvent::Error {
                        detail: err.to_string(),
                    });
                }
            }
        }

        match reconnected {
            Some(next) => {
                info!("relay: reconnected");
                socket = next;
                let _ = events.send(RelayEvent::Connected);
            }
            None => {
                let _ = events.send(RelayEvent::Disconnected {
                    reason,
                    will_reconnect: false,
                });
                return;
            }
        }
    }
}

async fn pump_socket(
    socket: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    events: &broadcast::Sender<RelayEvent>,
) -> LinkEnd {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(%err, "relay: failed to encode outbound frame");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        return LinkEnd::Dropped(err.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return LinkEnd::Closed;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_frame(&text) {
                        let _ = events.send(event);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by relay".to_string());
                    return LinkEnd::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return LinkEnd::Dropped(err.to_string()),
                None => return LinkEnd::Dropped("relay stream ended".to_string()),
            },
        }
    }
}

pub(crate) fn decode_frame(text: &str) -> Option<RelayEvent> {
    match serde_json::from_str::<InboundEvent>(text) {
        Ok(InboundEvent::ReceiveMessage(payload)) => {
            Some(RelayEvent::MessageReceived(payload.into_chat_message()))
        }
        Ok(InboundEvent::UserJoined(payload)) => {
            payload.participant_id().map(RelayEvent::UserJoined)
        }
        Ok(InboundEvent::UserLeft(payload)) => payload.participant_id().map(RelayEvent::UserLeft),
        Err(err) => {
            debug!(%err, "relay: ignoring unrecognized frame");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/ws_relay_tests.rs"]
mod tests;
