//! Meeting session controller.
//!
//! One tokio task owns all session state and processes triggers strictly one at a time:
//! relay events, timer ticks, completions of dispatched calls, and UI commands. Every
//! dispatched call carries the epoch it was issued in; the epoch advances on each state
//! transition, so completions that outlive their state are recognised and dropped.

use std::{collections::VecDeque, fmt, future::Future, sync::Arc, time::Duration};

use shared::domain::{ChatMessage, Meeting, MeetingStatus, ParticipantId, SessionId};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::SessionSettings,
    dedup::{Admission, MessageDeduplicator},
    error::{FailureReason, SessionError, TransportError, ValidationError},
    participants::{ParticipantSet, ParticipantView},
    transport::{EventKind, RelayConnector, RelayEvent, RelayTransport},
    unread::UnreadTracker,
    CredentialProvider, MeetingLookup, MeetingUpdate,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Validating,
    Joining,
    Synchronized,
    Leaving,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Validating => f.write_str("validating"),
            SessionState::Joining => f.write_str("joining"),
            SessionState::Synchronized => f.write_str("synchronized"),
            SessionState::Leaving => f.write_str("leaving"),
            SessionState::Closed => f.write_str("closed"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Read-only snapshot published to the UI after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub state: SessionState,
    pub participants: Vec<ParticipantView>,
    pub messages: Vec<ChatMessage>,
    pub unread_count: u32,
    pub latest_preview: Option<ChatMessage>,
}

pub struct SessionDeps {
    pub lookup: Arc<dyn MeetingLookup>,
    pub updater: Arc<dyn MeetingUpdate>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn RelayConnector>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub session_id: SessionId,
    pub local_id: ParticipantId,
    pub local_name: Option<String>,
    pub chat_visible: bool,
}

impl SessionOptions {
    pub fn new(session_id: SessionId, local_id: ParticipantId) -> Self {
        Self {
            session_id,
            local_id,
            local_name: None,
            chat_visible: false,
        }
    }
}

/// Checks that `local_id` may enter `meeting`. Existing participants may always rejoin.
pub fn validate_meeting(
    meeting: &Meeting,
    local_id: &ParticipantId,
) -> Result<(), ValidationError> {
    match meeting.status {
        MeetingStatus::Ended => return Err(ValidationError::Ended),
        MeetingStatus::Cancelled => return Err(ValidationError::Cancelled),
        MeetingStatus::Scheduled | MeetingStatus::Active => {}
    }

    if let Some(max) = meeting.max_participants {
        if !meeting.has_participant(local_id) && meeting.participants.len() >= max as usize {
            return Err(ValidationError::Full { max });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LookupFailure {
    Timeout,
    Failed(String),
}

type LookupOutcome = Result<Option<Meeting>, LookupFailure>;

/// Progress of the write that adds the local user to the meeting record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinWrite {
    NotNeeded,
    Pending,
    Settled,
}
type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Trigger {
    CredentialResolved {
        epoch: u64,
        token: Option<String>,
    },
    MeetingResolved {
        epoch: u64,
        outcome: LookupOutcome,
    },
    TransportOpened {
        epoch: u64,
        outcome: Result<(), TransportError>,
    },
    JoinPersisted {
        outcome: Result<(), String>,
    },
    Relay(RelayEvent),
    PollTick {
        epoch: u64,
    },
    PollResolved {
        epoch: u64,
        outcome: LookupOutcome,
    },
    PreviewExpired {
        generation: u64,
    },
    LeavePersisted {
        epoch: u64,
    },
    SendMessage {
        text: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    RequestLeave {
        respond_to: Reply,
    },
    SetChatVisible {
        visible: bool,
    },
    Close {
        respond_to: Option<Reply>,
    },
}

/// UI-facing handle. Dropping it tears the session down.
pub struct SessionHandle {
    triggers: mpsc::UnboundedSender<Trigger>,
    view: watch::Receiver<SessionView>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn start(options: SessionOptions, settings: &SessionSettings, deps: SessionDeps) -> Self {
        let (controller, trigger_rx) = SessionController::new(options, settings, deps);
        let triggers = controller.triggers.clone();
        let view = controller.view_tx.subscribe();
        let task = tokio::spawn(controller.run(trigger_rx));
        Self {
            triggers,
            view,
            task: Some(task),
        }
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        let (respond_to, reply) = oneshot::channel();
        let trigger = Trigger::SendMessage {
            text: text.to_string(),
            respond_to,
        };
        if self.triggers.send(trigger).is_err() {
            return Err(SessionError::NotReady(self.view.borrow().state.clone()));
        }
        match reply.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::NotReady(self.view.borrow().state.clone())),
        }
    }

    /// Resolves once the session is `Closed`. Calling it again is a no-op.
    pub async fn request_leave(&self) -> Result<(), SessionError> {
        let (respond_to, reply) = oneshot::channel();
        if self
            .triggers
            .send(Trigger::RequestLeave { respond_to })
            .is_err()
        {
            return Ok(());
        }
        reply.await.unwrap_or(Ok(()))
    }

    pub fn set_chat_visible(&self, visible: bool) {
        let _ = self.triggers.send(Trigger::SetChatVisible { visible });
    }

    /// Unmount: tears down from any state and waits for the controller task to finish.
    pub async fn close(mut self) {
        let (respond_to, reply) = oneshot::channel();
        if self
            .triggers
            .send(Trigger::Close {
                respond_to: Some(respond_to),
            })
            .is_ok()
        {
            let _ = reply.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.triggers.send(Trigger::Close { respond_to: None });
        }
    }
}

struct SessionController {
    session_id: SessionId,
    local_id: ParticipantId,
    settings: SessionSettings,
    deps: SessionDeps,
    transport: RelayTransport,
    triggers: mpsc::UnboundedSender<Trigger>,
    view_tx: watch::Sender<SessionView>,

    state: SessionState,
    epoch: u64,
    token: Option<String>,
    meeting: Option<Meeting>,
    listed_in_record: bool,
    join_write: JoinWrite,
    relay_down: bool,
    poll_in_flight: bool,

    participants: ParticipantSet,
    dedup: MessageDeduplicator,
    log: VecDeque<ChatMessage>,
    unread: UnreadTracker,

    poll_timer: Option<JoinHandle<()>>,
    preview_timer: Option<JoinHandle<()>>,
    leave_waiters: Vec<Reply>,
}

impl SessionController {
    fn new(
        options: SessionOptions,
        settings: &SessionSettings,
        deps: SessionDeps,
    ) -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let transport = RelayTransport::new(Arc::clone(&deps.connector), settings.connect_timeout);

        let mut participants = ParticipantSet::new(options.local_id.clone());
        if let Some(name) = options.local_name {
            participants.set_local_name(name);
        }
        let history_limit = settings.history_limit.max(1);

        let (view_tx, _) = watch::channel(SessionView {
            state: SessionState::Idle,
            participants: Vec::new(),
            messages: Vec::new(),
            unread_count: 0,
            latest_preview: None,
        });

        let controller = Self {
            session_id: options.session_id,
            local_id: options.local_id,
            settings: settings.clone(),
            deps,
            transport,
            triggers,
            view_tx,
            state: SessionState::Idle,
            epoch: 0,
            token: None,
            meeting: None,
            listed_in_record: false,
            join_write: JoinWrite::NotNeeded,
            relay_down: false,
            poll_in_flight: false,
            participants,
            dedup: MessageDeduplicator::new(history_limit),
            log: VecDeque::with_capacity(history_limit),
            unread: UnreadTracker::new(options.chat_visible),
            poll_timer: None,
            preview_timer: None,
            leave_waiters: Vec::new(),
        };
        (controller, trigger_rx)
    }

    async fn run(mut self, mut triggers: mpsc::UnboundedReceiver<Trigger>) {
        self.start();
        while let Some(trigger) = triggers.recv().await {
            self.handle(trigger).await;
            if self.state == SessionState::Closed {
                break;
            }
        }
        debug!(session_id = %self.session_id, "session: controller stopped");
    }

    fn start(&mut self) {
        self.transition(SessionState::Connecting);
        let credentials = Arc::clone(&self.deps.credentials);
        let limit = self.settings.lookup_timeout;
        let epoch = self.epoch;
        self.dispatch(async move {
            let token = time::timeout(limit, credentials.get_token())
                .await
                .ok()
                .flatten();
            Trigger::CredentialResolved { epoch, token }
        });
    }

    async fn handle(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::CredentialResolved { epoch, token } => {
                self.on_credential_resolved(epoch, token).await
            }
            Trigger::MeetingResolved { epoch, outcome } => {
                self.on_meeting_resolved(epoch, outcome).await
            }
            Trigger::TransportOpened { epoch, outcome } => {
                self.on_transport_opened(epoch, outcome).await
            }
            Trigger::JoinPersisted { outcome } => self.on_join_persisted(outcome),
            Trigger::Relay(event) => self.on_relay_event(event).await,
            Trigger::PollTick { epoch } => self.on_poll_tick(epoch),
            Trigger::PollResolved { epoch, outcome } => self.on_poll_resolved(epoch, outcome),
            Trigger::PreviewExpired { generation } => {
                if self.unread.expire_preview(generation) {
                    self.publish();
                }
            }
            Trigger::LeavePersisted { epoch } => {
                if self.is_current(epoch) && self.state == SessionState::Leaving {
                    self.finish_closed().await;
                }
            }
            Trigger::SendMessage { text, respond_to } => {
                let _ = respond_to.send(self.send_message(&text));
            }
            Trigger::RequestLeave { respond_to } => self.request_leave(respond_to).await,
            Trigger::SetChatVisible { visible } => self.set_chat_visible(visible),
            Trigger::Close { respond_to } => self.close(respond_to).await,
        }
    }

    async fn on_credential_resolved(&mut self, epoch: u64, token: Option<String>) {
        if !self.is_current(epoch) {
            return;
        }
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            self.fail(FailureReason::MissingCredential).await;
            return;
        };
        self.token = Some(token);

        self.transition(SessionState::Validating);
        let epoch = self.epoch;
        let lookup = self.lookup();
        self.dispatch(async move {
            Trigger::MeetingResolved {
                epoch,
                outcome: lookup.await,
            }
        });
    }

    async fn on_meeting_resolved(&mut self, epoch: u64, outcome: LookupOutcome) {
        if !self.is_current(epoch) {
            return;
        }
        let meeting = match outcome {
            Ok(Some(meeting)) => meeting,
            Ok(None) => {
                self.fail(ValidationError::NotFound.into()).await;
                return;
            }
            Err(LookupFailure::Timeout) => {
                self.fail(FailureReason::LookupTimeout).await;
                return;
            }
            Err(LookupFailure::Failed(detail)) => {
                self.fail(FailureReason::LookupFailed(detail)).await;
                return;
            }
        };

        if let Err(err) = validate_meeting(&meeting, &self.local_id) {
            self.fail(err.into()).await;
            return;
        }
        self.enter_joining(meeting);
    }

    fn enter_joining(&mut self, meeting: Meeting) {
        self.transition(SessionState::Joining);
        self.register_handlers();

        self.listed_in_record = meeting.has_participant(&self.local_id);
        if !self.listed_in_record {
            let mut participants = meeting.participants.clone();
            participants.push(self.local_id.clone());
            self.join_write = JoinWrite::Pending;
            let persist = self.record_writer().write(participants);
            self.dispatch(async move {
                Trigger::JoinPersisted {
                    outcome: persist.await,
                }
            });
        }
        self.meeting = Some(meeting);

        let transport = self.transport.clone();
        let token = self.token.clone().unwrap_or_default();
        let epoch = self.epoch;
        self.dispatch(async move {
            Trigger::TransportOpened {
                epoch,
                outcome: transport.connect(&token).await.map(|_| ()),
            }
        });
    }

    fn on_join_persisted(&mut self, outcome: Result<(), String>) {
        self.join_write = JoinWrite::Settled;
        match outcome {
            Ok(()) => {
                self.listed_in_record = true;
                if let Some(meeting) = self.meeting.as_mut() {
                    if !meeting.has_participant(&self.local_id) {
                        meeting.participants.push(self.local_id.clone());
                    }
                }
            }
            Err(err) => warn!(
                session_id = %self.session_id,
                %err,
                "session: participant record not updated on join"
            ),
        }
        // Leaving began while the join write was in flight and deferred its removal.
        if self.state == SessionState::Leaving {
            self.dispatch_leave_write();
        }
    }

    async fn on_transport_opened(&mut self, epoch: u64, outcome: Result<(), TransportError>) {
        if !self.is_current(epoch) {
            debug!(session_id = %self.session_id, "session: ignoring stale transport result");
            return;
        }
        if let Err(err) = outcome {
            self.fail(err.into()).await;
            return;
        }

        if let Err(err) = self.transport.join_room(&self.session_id, &self.local_id) {
            warn!(session_id = %self.session_id, %err, "session: join-room not sent");
        }
        if let Some(meeting) = &self.meeting {
            self.participants.seed(meeting.participants.iter().cloned());
            self.participants.set_host(meeting.created_by.clone());
        }
        self.participants.seed([self.local_id.clone()]);

        self.transition(SessionState::Synchronized);
        self.start_poll_timer();
    }

    async fn on_relay_event(&mut self, event: RelayEvent) {
        if self.state != SessionState::Synchronized {
            debug!(
                session_id = %self.session_id,
                kind = ?event.kind(),
                state = %self.state,
                "session: relay event outside synchronized state dropped"
            );
            return;
        }

        match event {
            RelayEvent::MessageReceived(message) => self.on_chat_message(message),
            RelayEvent::UserJoined(id) => {
                if self.participants.observe_joined(id) {
                    self.publish();
                }
            }
            RelayEvent::UserLeft(id) => {
                if id == self.local_id {
                    debug!(session_id = %self.session_id, "session: ignoring userLeft for self");
                    return;
                }
                if self.participants.remove(&id) {
                    info!(
                        session_id = %self.session_id,
                        participant = %id,
                        "session: participant left"
                    );
                    self.publish();
                }
            }
            RelayEvent::Connected => {
                if self.relay_down {
                    self.relay_down = false;
                    info!(session_id = %self.session_id, "session: relay restored; rejoining room");
                    if let Err(err) = self.transport.join_room(&self.session_id, &self.local_id) {
                        warn!(session_id = %self.session_id, %err, "session: rejoin not sent");
                    }
                }
            }
            RelayEvent::Disconnected {
                reason,
                will_reconnect: true,
            } => {
                self.relay_down = true;
                warn!(session_id = %self.session_id, %reason, "session: relay link interrupted");
            }
            RelayEvent::Disconnected {
                reason,
                will_reconnect: false,
            } => {
                self.fail(FailureReason::ConnectionLost(reason)).await;
            }
            RelayEvent::Error { detail } => {
                warn!(session_id = %self.session_id, %detail, "session: relay reported error");
            }
        }
    }

    fn on_chat_message(&mut self, message: ChatMessage) {
        if message.session_id != self.session_id {
            debug!(
                session_id = %self.session_id,
                room = %message.session_id,
                "session: message for another room dropped"
            );
            return;
        }
        if let Admission::Rejected(reason) = self.dedup.admit(&message) {
            debug!(
                session_id = %self.session_id,
                sender = %message.sender_id,
                ?reason,
                "session: message rejected"
            );
            return;
        }

        self.participants
            .observe_sender(&message.sender_id, &message.sender_name);
        if message.sender_id != self.local_id {
            if let Some(generation) = self.unread.on_message_admitted(&message) {
                self.schedule_preview_expiry(generation);
            }
        }

        // The dedup window and the log share one capacity, so evicting here keeps them aligned.
        if self.log.len() >= self.settings.history_limit.max(1) {
            self.log.pop_front();
        }
        self.log.push_back(message);
        self.publish();
    }

    fn on_poll_tick(&mut self, epoch: u64) {
        if !self.is_current(epoch) || self.state != SessionState::Synchronized {
            return;
        }
        if self.poll_in_flight {
            debug!(session_id = %self.session_id, "session: poll still running; tick skipped");
            return;
        }
        self.poll_in_flight = true;
        let lookup = self.lookup();
        self.dispatch(async move {
            Trigger::PollResolved {
                epoch,
                outcome: lookup.await,
            }
        });
    }

    fn on_poll_resolved(&mut self, epoch: u64, outcome: LookupOutcome) {
        if !self.is_current(epoch) {
            debug!(session_id = %self.session_id, epoch, "session: stale poll result discarded");
            return;
        }
        self.poll_in_flight = false;

        match outcome {
            Ok(Some(meeting)) => {
                let mut changed = self
                    .participants
                    .observe_poll(meeting.participants.iter().cloned());
                changed |= self.participants.set_host(meeting.created_by.clone());
                self.listed_in_record |= meeting.has_participant(&self.local_id);
                self.meeting = Some(meeting);
                if changed {
                    self.publish();
                }
            }
            Ok(None) => {
                warn!(session_id = %self.session_id, "session: poll found no meeting record");
            }
            Err(LookupFailure::Timeout) => {
                warn!(session_id = %self.session_id, "session: poll timed out; retrying next tick");
            }
            Err(LookupFailure::Failed(err)) => {
                warn!(session_id = %self.session_id, %err, "session: poll failed; will retry");
            }
        }
    }

    fn send_message(&mut self, text: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Synchronized {
            return Err(SessionError::NotReady(self.state.clone()));
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        // No delivery acknowledgement exists, so an emit failure is only logged.
        if let Err(err) = self.transport.send(&self.session_id, text) {
            warn!(session_id = %self.session_id, %err, "session: message emit failed");
        }
        Ok(())
    }

    async fn request_leave(&mut self, respond_to: Reply) {
        match self.state {
            SessionState::Closed => {
                let _ = respond_to.send(Ok(()));
            }
            SessionState::Leaving => self.leave_waiters.push(respond_to),
            SessionState::Synchronized | SessionState::Joining => {
                self.leave_waiters.push(respond_to);
                self.begin_leave();
            }
            SessionState::Failed(_) => {
                self.leave_waiters.push(respond_to);
                self.finish_closed().await;
            }
            SessionState::Idle | SessionState::Connecting | SessionState::Validating => {
                let _ = respond_to.send(Err(SessionError::NotReady(self.state.clone())));
            }
        }
    }

    async fn close(&mut self, respond_to: Option<Reply>) {
        if let Some(respond_to) = respond_to {
            self.leave_waiters.push(respond_to);
        }
        match self.state {
            SessionState::Synchronized | SessionState::Joining => self.begin_leave(),
            SessionState::Leaving => {}
            SessionState::Closed => {
                for waiter in self.leave_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            _ => self.finish_closed().await,
        }
    }

    fn set_chat_visible(&mut self, visible: bool) {
        if !self.unread.set_visible(visible) {
            return;
        }
        if visible {
            if let Some(timer) = self.preview_timer.take() {
                timer.abort();
            }
        }
        self.publish();
    }

    /// Handlers go first so no relay event is acted on once leaving has begun.
    fn begin_leave(&mut self) {
        self.cancel_poll_timer();
        self.transport.unsubscribe_all();
        self.transition(SessionState::Leaving);
        self.transport.leave_room(&self.session_id);

        if self.join_write == JoinWrite::Pending {
            debug!(session_id = %self.session_id, "session: leave waits for the join write");
            return;
        }
        self.dispatch_leave_write();
    }

    /// Removes the local user from the meeting record, then reports `LeavePersisted`.
    ///
    /// The update replaces the whole list, so the record is re-read first to keep anyone
    /// who joined since the last poll. A failed re-read falls back to the last snapshot.
    fn dispatch_leave_write(&self) {
        let epoch = self.epoch;
        let Some(snapshot) = self.removal_snapshot() else {
            let _ = self.triggers.send(Trigger::LeavePersisted { epoch });
            return;
        };

        let fresh = self.lookup();
        let writer = self.record_writer();
        let local_id = self.local_id.clone();
        let session_id = self.session_id.clone();
        self.dispatch(async move {
            let current = match fresh.await {
                Ok(Some(meeting)) => meeting.participants,
                Ok(None) => Vec::new(),
                Err(err) => {
                    debug!(%session_id, ?err, "session: record re-read failed; using snapshot");
                    snapshot
                }
            };
            if current.contains(&local_id) {
                let remaining = current.into_iter().filter(|id| *id != local_id).collect();
                if let Err(err) = writer.write(remaining).await {
                    warn!(%session_id, %err, "session: leave not persisted; tearing down");
                }
            }
            Trigger::LeavePersisted { epoch }
        });
    }

    /// Last known participant list, when the local user may be removed from the record.
    fn removal_snapshot(&self) -> Option<Vec<ParticipantId>> {
        let meeting = self.meeting.as_ref()?;
        self.token.as_ref()?;
        if meeting.created_by == self.local_id {
            return None;
        }
        // A failed or timed-out join write may still have landed, so it is checked again.
        if !self.listed_in_record && self.join_write == JoinWrite::NotNeeded {
            return None;
        }
        Some(meeting.participants.clone())
    }

    async fn finish_closed(&mut self) {
        self.release_resources().await;
        self.transition(SessionState::Closed);
        for waiter in self.leave_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn fail(&mut self, reason: FailureReason) {
        warn!(session_id = %self.session_id, %reason, "session: failed");
        self.transport.leave_room(&self.session_id);
        self.release_resources().await;
        self.transition(SessionState::Failed(reason));
    }

    async fn release_resources(&mut self) {
        self.cancel_poll_timer();
        if let Some(timer) = self.preview_timer.take() {
            timer.abort();
        }
        self.transport.unsubscribe_all();
        self.transport.disconnect().await;
    }

    fn register_handlers(&self) {
        for kind in EventKind::ALL {
            let triggers = self.triggers.clone();
            self.transport.subscribe(kind, move |event| {
                let _ = triggers.send(Trigger::Relay(event));
            });
        }
    }

    fn start_poll_timer(&mut self) {
        self.cancel_poll_timer();
        let triggers = self.triggers.clone();
        let period = self.settings.poll_interval;
        let epoch = self.epoch;
        self.poll_timer = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if triggers.send(Trigger::PollTick { epoch }).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_poll_timer(&mut self) {
        if let Some(timer) = self.poll_timer.take() {
            timer.abort();
        }
    }

    fn schedule_preview_expiry(&mut self, generation: u64) {
        if let Some(timer) = self.preview_timer.take() {
            timer.abort();
        }
        let triggers = self.triggers.clone();
        let timeout = self.settings.preview_timeout;
        self.preview_timer = Some(tokio::spawn(async move {
            time::sleep(timeout).await;
            let _ = triggers.send(Trigger::PreviewExpired { generation });
        }));
    }

    fn lookup(&self) -> impl Future<Output = LookupOutcome> + Send + 'static {
        let lookup = Arc::clone(&self.deps.lookup);
        let session_id = self.session_id.clone();
        let token = self.token.clone().unwrap_or_default();
        let limit = self.settings.lookup_timeout;
        async move {
            match time::timeout(limit, lookup.get_meeting(&session_id, &token)).await {
                Ok(Ok(meeting)) => Ok(meeting),
                Ok(Err(err)) => Err(LookupFailure::Failed(format!("{err:#}"))),
                Err(_) => Err(LookupFailure::Timeout),
            }
        }
    }

    fn record_writer(&self) -> RecordWriter {
        RecordWriter {
            updater: Arc::clone(&self.deps.updater),
            session_id: self.session_id.clone(),
            token: self.token.clone().unwrap_or_default(),
            limit: self.settings.lookup_timeout,
        }
    }

    fn dispatch<F>(&self, work: F)
    where
        F: Future<Output = Trigger> + Send + 'static,
    {
        let triggers = self.triggers.clone();
        tokio::spawn(async move {
            let _ = triggers.send(work.await);
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    fn transition(&mut self, next: SessionState) {
        info!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "session: state transition"
        );
        self.state = next;
        self.epoch += 1;
        self.poll_in_flight = false;
        self.publish();
    }

    fn snapshot(&self) -> SessionView {
        SessionView {
            state: self.state.clone(),
            participants: self.participants.snapshot(),
            messages: self.log.iter().cloned().collect(),
            unread_count: self.unread.unread_count(),
            latest_preview: self.unread.latest_preview().cloned(),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.snapshot());
    }
}

/// Best-effort, time-bounded participant list update detached from the controller.
struct RecordWriter {
    updater: Arc<dyn MeetingUpdate>,
    session_id: SessionId,
    token: String,
    limit: Duration,
}

impl RecordWriter {
    async fn write(self, participants: Vec<ParticipantId>) -> Result<(), String> {
        let update = self
            .updater
            .update_participants(&self.session_id, &participants, &self.token);
        match time::timeout(self.limit, update).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(_) => Err("participant update timed out".to_string()),
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
