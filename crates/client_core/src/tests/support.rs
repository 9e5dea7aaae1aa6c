use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{ChatMessage, Meeting, MeetingStatus, ParticipantId, SessionId},
    protocol::OutboundEvent,
};
use tokio::sync::broadcast;

use crate::{
    error::TransportError,
    transport::{RelayChannel, RelayConnector, RelayEvent},
    CredentialProvider, MeetingLookup, MeetingUpdate,
};

pub(crate) fn meeting(id: &str, created_by: &str, participants: &[&str]) -> Meeting {
    Meeting {
        id: SessionId::from(id),
        title: format!("meeting {id}"),
        status: MeetingStatus::Active,
        participants: participants.iter().map(|p| ParticipantId::from(*p)).collect(),
        max_participants: None,
        created_by: ParticipantId::from(created_by),
    }
}

pub(crate) fn chat(room: &str, sender: &str, content: &str, timestamp: &str) -> ChatMessage {
    ChatMessage {
        session_id: SessionId::from(room),
        sender_id: ParticipantId::from(sender),
        sender_name: format!("{sender} name"),
        content: content.to_string(),
        timestamp: timestamp.to_string(),
    }
}

pub(crate) fn ids(values: &[&str]) -> Vec<ParticipantId> {
    values.iter().map(|value| ParticipantId::from(*value)).collect()
}

#[derive(Default)]
pub(crate) struct FakeMeetingStore {
    meetings: Mutex<HashMap<SessionId, Meeting>>,
    pub lookups: AtomicUsize,
    pub updates: Mutex<Vec<Vec<ParticipantId>>>,
    pub credentials_seen: Mutex<Vec<String>>,
    pub fail_lookups: AtomicBool,
    pub fail_updates: AtomicBool,
    pub lookup_delay: Mutex<Duration>,
    pub update_delay: Mutex<Duration>,
}

impl FakeMeetingStore {
    pub fn with_meeting(meeting: Meeting) -> Arc<Self> {
        let store = Self::default();
        store.put(meeting);
        Arc::new(store)
    }

    pub fn put(&self, meeting: Meeting) {
        self.meetings
            .lock()
            .expect("meetings lock")
            .insert(meeting.id.clone(), meeting);
    }

    pub fn participants(&self, id: &str) -> Vec<ParticipantId> {
        self.meetings
            .lock()
            .expect("meetings lock")
            .get(&SessionId::from(id))
            .map(|meeting| meeting.participants.clone())
            .unwrap_or_default()
    }

    pub fn set_participants(&self, id: &str, participants: &[&str]) {
        if let Some(meeting) = self
            .meetings
            .lock()
            .expect("meetings lock")
            .get_mut(&SessionId::from(id))
        {
            meeting.participants = ids(participants);
        }
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock().expect("delay lock") = delay;
    }

    pub fn set_update_delay(&self, delay: Duration) {
        *self.update_delay.lock().expect("delay lock") = delay;
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn update_log(&self) -> Vec<Vec<ParticipantId>> {
        self.updates.lock().expect("updates lock").clone()
    }
}

#[async_trait]
impl MeetingLookup for FakeMeetingStore {
    async fn get_meeting(&self, id: &SessionId, credential: &str) -> Result<Option<Meeting>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen
            .lock()
            .expect("credentials lock")
            .push(credential.to_string());
        let delay = *self.lookup_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(anyhow!("meeting service unavailable"));
        }
        Ok(self.meetings.lock().expect("meetings lock").get(id).cloned())
    }
}

#[async_trait]
impl MeetingUpdate for FakeMeetingStore {
    async fn update_participants(
        &self,
        id: &SessionId,
        participants: &[ParticipantId],
        _credential: &str,
    ) -> Result<()> {
        let delay = *self.update_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.updates
            .lock()
            .expect("updates lock")
            .push(participants.to_vec());
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(anyhow!("participant update rejected"));
        }
        if let Some(meeting) = self.meetings.lock().expect("meetings lock").get_mut(id) {
            meeting.participants = participants.to_vec();
        }
        Ok(())
    }
}

pub(crate) struct FakeChannel {
    events: broadcast::Sender<RelayEvent>,
    emitted: Mutex<Vec<OutboundEvent>>,
    closed: AtomicBool,
}

impl FakeChannel {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            emitted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    pub fn emitted(&self) -> Vec<OutboundEvent> {
        self.emitted.lock().expect("emitted lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn join_count(&self) -> usize {
        self.emitted()
            .iter()
            .filter(|event| matches!(event, OutboundEvent::JoinRoom { .. }))
            .count()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.emitted()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::SendMessage { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RelayChannel for FakeChannel {
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.emitted.lock().expect("emitted lock").push(event);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    pub connects: AtomicUsize,
    pub credentials: Mutex<Vec<String>>,
    pub fail_with: Mutex<Option<TransportError>>,
    pub connect_delay: Mutex<Duration>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: TransportError) -> Arc<Self> {
        let connector = Self::default();
        *connector.fail_with.lock().expect("fail lock") = Some(err);
        Arc::new(connector)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().expect("delay lock") = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channels
            .lock()
            .expect("channels lock")
            .last()
            .cloned()
            .expect("connector has opened a channel")
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().expect("channels lock").clone()
    }
}

#[async_trait]
impl RelayConnector for FakeConnector {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn RelayChannel>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.credentials
            .lock()
            .expect("credentials lock")
            .push(credential.to_string());
        let delay = *self.connect_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_with.lock().expect("fail lock").clone() {
            return Err(err);
        }
        let channel = Arc::new(FakeChannel::new());
        self.channels
            .lock()
            .expect("channels lock")
            .push(Arc::clone(&channel));
        Ok(channel)
    }
}

pub(crate) struct SlowCredentials {
    pub token: Option<String>,
    pub delay: Duration,
}

#[async_trait]
impl CredentialProvider for SlowCredentials {
    async fn get_token(&self) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        self.token.clone()
    }
}
