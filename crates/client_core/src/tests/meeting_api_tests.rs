use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::*;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode as HttpStatus},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::MeetingStatus;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct MeetingServerState {
    auth_headers: Arc<Mutex<Vec<String>>>,
    updates: Arc<Mutex<HashMap<String, Value>>>,
}

fn record_auth(state: &MeetingServerState, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.auth_headers.lock().expect("auth lock").push(auth);
}

async fn get_meeting_route(
    Path(id): Path<String>,
    State(state): State<MeetingServerState>,
    headers: HeaderMap,
) -> Response {
    record_auth(&state, &headers);
    match id.as_str() {
        "wrapped" => Json(json!({
            "success": true,
            "data": {
                "id": "wrapped",
                "title": "Standup",
                "status": "active",
                "participants": ["A", "B"],
                "maxParticipants": 4,
                "createdBy": "A"
            }
        }))
        .into_response(),
        "bare" => Json(json!({
            "id": "bare",
            "status": "ended",
            "participants": [],
            "createdBy": "H"
        }))
        .into_response(),
        "broken" => (
            HttpStatus::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "database offline" })),
        )
            .into_response(),
        _ => HttpStatus::NOT_FOUND.into_response(),
    }
}

async fn put_meeting_route(
    Path(id): Path<String>,
    State(state): State<MeetingServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_auth(&state, &headers);
    if id == "locked" {
        return (
            HttpStatus::FORBIDDEN,
            Json(json!({ "error": "only the host may edit" })),
        )
            .into_response();
    }
    state.updates.lock().expect("updates lock").insert(id, body);
    HttpStatus::NO_CONTENT.into_response()
}

async fn spawn_meeting_server() -> Result<(String, MeetingServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = MeetingServerState::default();
    let app = Router::new()
        .route(
            "/api/meetings/:id",
            get(get_meeting_route).put(put_meeting_route),
        )
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api"), state))
}

fn service(base_url: &str) -> HttpMeetingService {
    HttpMeetingService::new(base_url, Duration::from_secs(5)).expect("meeting service")
}

#[test]
fn meeting_url_appends_segments_to_the_base_path() {
    let service = service("http://localhost:3000/api/");
    let url = service
        .meeting_url(&SessionId::from("room 7"))
        .expect("meeting url");
    assert_eq!(url.as_str(), "http://localhost:3000/api/meetings/room%207");
}

#[test]
fn invalid_base_url_is_rejected() {
    assert!(HttpMeetingService::new("localhost without scheme", Duration::from_secs(1)).is_err());
    assert!(HttpMeetingService::new("mailto:host@example.com", Duration::from_secs(1)).is_err());
}

#[tokio::test]
async fn get_meeting_unwraps_data_envelope_and_sends_bearer_token() {
    let (base_url, state) = spawn_meeting_server().await.expect("spawn server");

    let meeting = service(&base_url)
        .get_meeting(&SessionId::from("wrapped"), "tok-1")
        .await
        .expect("lookup")
        .expect("meeting exists");

    assert_eq!(meeting.title, "Standup");
    assert_eq!(meeting.status, MeetingStatus::Active);
    assert_eq!(
        meeting.participants,
        vec![ParticipantId::from("A"), ParticipantId::from("B")]
    );
    assert_eq!(meeting.max_participants, Some(4));
    assert_eq!(meeting.created_by, ParticipantId::from("A"));
    assert_eq!(
        *state.auth_headers.lock().expect("auth lock"),
        vec!["Bearer tok-1".to_string()]
    );
}

#[tokio::test]
async fn get_meeting_accepts_bare_payload() {
    let (base_url, _state) = spawn_meeting_server().await.expect("spawn server");

    let meeting = service(&base_url)
        .get_meeting(&SessionId::from("bare"), "tok")
        .await
        .expect("lookup")
        .expect("meeting exists");

    assert_eq!(meeting.status, MeetingStatus::Ended);
    assert_eq!(meeting.max_participants, None);
    assert!(meeting.participants.is_empty());
}

#[tokio::test]
async fn missing_meeting_is_none() {
    let (base_url, _state) = spawn_meeting_server().await.expect("spawn server");

    let meeting = service(&base_url)
        .get_meeting(&SessionId::from("nope"), "tok")
        .await
        .expect("lookup");

    assert!(meeting.is_none());
}

#[tokio::test]
async fn server_error_surfaces_the_api_message() {
    let (base_url, _state) = spawn_meeting_server().await.expect("spawn server");

    let err = service(&base_url)
        .get_meeting(&SessionId::from("broken"), "tok")
        .await
        .expect_err("lookup should fail");

    let api = err.downcast_ref::<ApiException>().expect("api exception");
    assert_eq!(api.status, 500);
    assert_eq!(api.message, "database offline");
}

#[tokio::test]
async fn update_participants_puts_the_full_list() {
    let (base_url, state) = spawn_meeting_server().await.expect("spawn server");

    service(&base_url)
        .update_participants(
            &SessionId::from("M1"),
            &[ParticipantId::from("A"), ParticipantId::from("B")],
            "tok-2",
        )
        .await
        .expect("update");

    let updates = state.updates.lock().expect("updates lock").clone();
    assert_eq!(updates.get("M1"), Some(&json!({ "participants": ["A", "B"] })));
    assert_eq!(
        *state.auth_headers.lock().expect("auth lock"),
        vec!["Bearer tok-2".to_string()]
    );
}

#[tokio::test]
async fn rejected_update_is_an_error() {
    let (base_url, _state) = spawn_meeting_server().await.expect("spawn server");

    let err = service(&base_url)
        .update_participants(&SessionId::from("locked"), &[], "tok")
        .await
        .expect_err("update should fail");

    let api = err.downcast_ref::<ApiException>().expect("api exception");
    assert_eq!(api.status, 403);
    assert_eq!(api.message, "only the host may edit");
}
