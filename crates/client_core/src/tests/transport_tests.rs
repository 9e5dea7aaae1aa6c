use super::*;
use crate::test_support::{chat, FakeConnector};
use tokio::sync::mpsc;

fn transport(connector: &Arc<FakeConnector>) -> RelayTransport {
    RelayTransport::new(connector.clone(), Duration::from_secs(1))
}

fn collect(transport: &RelayTransport, kind: EventKind) -> mpsc::UnboundedReceiver<RelayEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.subscribe(kind, move |event| {
        let _ = tx.send(event);
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("handler alive")
}

#[tokio::test]
async fn connect_dispatches_connected_to_handler() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    let mut connected = collect(&transport, EventKind::Connected);

    let handle = transport.connect("token-1").await.expect("connect");

    assert_eq!(handle.generation, 0);
    assert_eq!(next(&mut connected).await, RelayEvent::Connected);
    assert!(transport.is_connected());
    assert_eq!(
        *connector.credentials.lock().expect("credentials lock"),
        vec!["token-1".to_string()]
    );
}

#[tokio::test]
async fn relay_events_reach_the_handler_for_their_kind() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    let mut messages = collect(&transport, EventKind::MessageReceived);
    let mut joined = collect(&transport, EventKind::UserJoined);
    transport.connect("token").await.expect("connect");

    let channel = connector.channel();
    channel.push(RelayEvent::UserJoined(ParticipantId::from("B")));
    channel.push(RelayEvent::MessageReceived(chat("M1", "B", "hello", "t1")));

    assert_eq!(
        next(&mut joined).await,
        RelayEvent::UserJoined(ParticipantId::from("B"))
    );
    assert_eq!(
        next(&mut messages).await,
        RelayEvent::MessageReceived(chat("M1", "B", "hello", "t1"))
    );
}

#[tokio::test]
async fn subscribing_twice_replaces_the_previous_handler() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    let mut first = collect(&transport, EventKind::UserLeft);
    let (tx, mut second) = mpsc::unbounded_channel();
    let replaced = transport.subscribe(EventKind::UserLeft, move |event| {
        let _ = tx.send(event);
    });
    assert!(replaced);
    assert_eq!(transport.handler_count(), 1);

    transport.connect("token").await.expect("connect");
    connector
        .channel()
        .push(RelayEvent::UserLeft(ParticipantId::from("C")));

    assert_eq!(
        next(&mut second).await,
        RelayEvent::UserLeft(ParticipantId::from("C"))
    );
    // The replaced handler's sender was dropped with it.
    assert!(first.recv().await.is_none());
}

#[tokio::test]
async fn room_operations_require_an_open_link() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    let room = SessionId::from("M1");

    assert_eq!(
        transport.join_room(&room, &ParticipantId::from("A")),
        Err(TransportError::NotConnected)
    );
    assert_eq!(transport.send(&room, "hi"), Err(TransportError::NotConnected));
    transport.leave_room(&room);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn room_operations_emit_relay_frames() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    let room = SessionId::from("M1");
    transport.connect("token").await.expect("connect");

    transport
        .join_room(&room, &ParticipantId::from("A"))
        .expect("join");
    transport.send(&room, "hello").expect("send");
    transport.leave_room(&room);

    assert_eq!(
        connector.channel().emitted(),
        vec![
            OutboundEvent::JoinRoom {
                room_id: room.clone(),
                user_id: ParticipantId::from("A"),
            },
            OutboundEvent::SendMessage {
                room_id: room.clone(),
                message: "hello".to_string(),
            },
            OutboundEvent::LeaveRoom { room_id: room },
        ]
    );
}

#[tokio::test]
async fn disconnect_closes_the_link_and_stops_dispatch() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    let mut joined = collect(&transport, EventKind::UserJoined);
    transport.connect("token").await.expect("connect");
    let channel = connector.channel();

    transport.disconnect().await;

    assert!(channel.is_closed());
    assert!(!transport.is_connected());
    channel.push(RelayEvent::UserJoined(ParticipantId::from("late")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(joined.try_recv().is_err());
    assert_eq!(
        transport.send(&SessionId::from("M1"), "hi"),
        Err(TransportError::NotConnected)
    );
}

#[tokio::test]
async fn unsubscribe_all_drops_every_handler() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);
    for kind in EventKind::ALL {
        transport.subscribe(kind, |_| {});
    }
    assert_eq!(transport.handler_count(), EventKind::ALL.len());
    assert!(transport.unsubscribe(EventKind::Error));
    assert!(!transport.unsubscribe(EventKind::Error));

    transport.unsubscribe_all();
    assert_eq!(transport.handler_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_connect_times_out() {
    let connector = FakeConnector::new();
    connector.set_connect_delay(Duration::from_secs(30));
    let transport = transport(&connector);

    let result = transport.connect("token").await;

    assert_eq!(result, Err(TransportError::Timeout));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn rejected_credential_is_reported() {
    let connector = FakeConnector::failing(TransportError::Unauthorized);
    let transport = transport(&connector);

    assert_eq!(
        transport.connect("bad").await,
        Err(TransportError::Unauthorized)
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connecting_cancels_the_connect() {
    let connector = FakeConnector::new();
    connector.set_connect_delay(Duration::from_millis(500));
    let transport = RelayTransport::new(connector.clone(), Duration::from_secs(5));
    let mut connected = collect(&transport, EventKind::Connected);

    let pending = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.connect("token").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.disconnect().await;

    let result = pending.await.expect("connect task");
    assert_eq!(result, Err(TransportError::Cancelled));
    assert!(connector.channel().is_closed());
    assert!(!transport.is_connected());
    assert!(connected.try_recv().is_err());
}

#[tokio::test]
async fn reconnecting_replaces_and_closes_the_previous_link() {
    let connector = FakeConnector::new();
    let transport = transport(&connector);

    transport.connect("token").await.expect("first connect");
    transport.connect("token").await.expect("second connect");

    let channels = connector.channels();
    assert_eq!(channels.len(), 2);
    assert!(channels[0].is_closed());
    assert!(!channels[1].is_closed());
    transport.send(&SessionId::from("M1"), "hi").expect("send");
    assert!(channels[0].emitted().is_empty());
    assert_eq!(channels[1].sent_messages(), vec!["hi".to_string()]);
}
