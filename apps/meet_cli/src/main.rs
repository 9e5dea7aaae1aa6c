use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{
    load_settings, HttpMeetingService, SessionDeps, SessionHandle, SessionOptions, SessionState,
    SessionView, StaticCredentials, WsRelayConnector,
};
use shared::domain::{ChatMessage, ParticipantId, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; defaults to ./meeting.toml when present.
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    meeting_id: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    user_name: Option<String>,
    #[arg(long)]
    token: Option<String>,
    /// Start with the chat panel open so messages are not counted as unread.
    #[arg(long)]
    show_chat: bool,
    /// Print roster updates as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();
    let settings = load_settings(args.settings.as_deref());

    let service = Arc::new(HttpMeetingService::from_settings(&settings)?);
    let deps = SessionDeps {
        lookup: service.clone(),
        updater: service,
        credentials: Arc::new(StaticCredentials::new(args.token.clone())),
        connector: Arc::new(WsRelayConnector::from_settings(&settings)?),
    };
    let options = SessionOptions {
        session_id: SessionId::new(args.meeting_id.clone()),
        local_id: ParticipantId::new(args.user_id.clone()),
        local_name: args.user_name.clone(),
        chat_visible: args.show_chat,
    };

    info!(
        meeting_id = %args.meeting_id,
        user_id = %args.user_id,
        relay = %settings.relay_url,
        "cli: joining meeting"
    );
    let session = SessionHandle::start(options, &settings, deps);
    let mut views = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = ViewPrinter::new(args.json);
    println!("Commands: /leave, /chat on|off, /who; anything else is sent as chat.");

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                printer.print(&view)?;
                match after_view(&view.state) {
                    ViewAction::Continue => {}
                    ViewAction::Dismiss => {
                        warn!(state = %view.state, "cli: session failed; dismissing");
                        if let Err(err) = session.request_leave().await {
                            warn!(%err, "cli: dismiss rejected");
                        }
                        break;
                    }
                    ViewAction::Exit => break,
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("cli: stdin closed");
                    break;
                };
                match line.trim() {
                    "/leave" => {
                        info!("cli: leave requested");
                        if let Err(err) = session.request_leave().await {
                            println!("cannot leave yet: {err}");
                        }
                    }
                    "/chat on" => session.set_chat_visible(true),
                    "/chat off" => session.set_chat_visible(false),
                    "/who" => printer.print_roster(&session.view())?,
                    text => {
                        if let Err(err) = session.send_message(text).await {
                            println!("not sent: {err}");
                        }
                    }
                }
            }
        }
    }

    session.close().await;
    info!("cli: session closed");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ViewAction {
    Continue,
    /// Failed sessions stay mounted until dismissed.
    Dismiss,
    Exit,
}

fn after_view(state: &SessionState) -> ViewAction {
    match state {
        SessionState::Closed => ViewAction::Exit,
        SessionState::Failed(_) => ViewAction::Dismiss,
        _ => ViewAction::Continue,
    }
}

struct ViewPrinter {
    json: bool,
    state: Option<SessionState>,
    roster: Vec<ParticipantId>,
    last_message: Option<ChatMessage>,
    unread: u32,
}

impl ViewPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            state: None,
            roster: Vec::new(),
            last_message: None,
            unread: 0,
        }
    }

    fn print(&mut self, view: &SessionView) -> Result<()> {
        if self.state.as_ref() != Some(&view.state) {
            println!("[{}]", view.state);
            self.state = Some(view.state.clone());
        }

        let roster: Vec<_> = view.participants.iter().map(|p| p.id.clone()).collect();
        if roster != self.roster {
            self.roster = roster;
            self.print_roster(view)?;
        }

        let start = self
            .last_message
            .as_ref()
            .and_then(|last| view.messages.iter().rposition(|m| m == last))
            .map_or(0, |index| index + 1);
        for message in &view.messages[start..] {
            println!(
                "{} <{}> {}",
                message.timestamp, message.sender_name, message.content
            );
        }
        if let Some(last) = view.messages.last() {
            self.last_message = Some(last.clone());
        }

        if view.unread_count != self.unread {
            self.unread = view.unread_count;
            if let Some(preview) = &view.latest_preview {
                println!(
                    "({} unread) {}: {}",
                    view.unread_count, preview.sender_name, preview.content
                );
            }
        }
        Ok(())
    }

    fn print_roster(&self, view: &SessionView) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(&view.participants)?);
            return Ok(());
        }
        let names: Vec<_> = view
            .participants
            .iter()
            .map(|p| {
                if p.is_host {
                    format!("{} (host)", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect();
        println!("in meeting: {}", names.join(", "));
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
