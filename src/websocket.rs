//! # Interview WebSocket Handler
//!
//! Clients connect to `/ws`; each connection owns exactly one interview
//! session in the registry for as long as it stays open.
//!
//! ## Protocol:
//! Every frame is JSON `{"event": <name>, "data": <payload>}`.
//!
//! | Client event | Payload                | Server reply                                   |
//! |--------------|------------------------|------------------------------------------------|
//! | `init`       | settings object        | `responseInit`: `true` / `false`               |
//! | `message`    | `{"question": "..."}`  | `responseMessage`: `[audioPath, visemes]` or `{"error": {...}}` |
//! | `export`     | none                   | `responseExport`: `{"path": "..."}` or `{"error": {...}}` |
//!
//! Malformed frames get an `error` event and leave the socket open.
//!
//! ## Ordering:
//! `init` and `message` are queued to a per-connection worker task and run
//! strictly in arrival order. At most `COMMAND_QUEUE_CAPACITY` commands wait
//! at a time; beyond that the command is answered at once with a
//! `capacity_error`. `export` runs on its own task so it never waits behind a
//! question being answered.

use crate::error::{ErrorPayload, SessionError, SessionResult};
use crate::session::storage::SessionStorage;
use crate::session::{SessionController, Settings};
use crate::speech::Viseme;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Commands a connection may have waiting behind the one being handled.
const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Events sent by the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "init")]
    Init(Settings),

    #[serde(rename = "message")]
    Message { question: String },

    #[serde(rename = "export")]
    Export,
}

/// Events sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "responseInit")]
    ResponseInit(bool),

    #[serde(rename = "responseMessage")]
    ResponseMessage(MessageReply),

    #[serde(rename = "responseExport")]
    ResponseExport(ExportReply),

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// Audio location and viseme timeline, or the reason there is none.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageReply {
    Spoken(String, Vec<Viseme>),
    Failed { error: ErrorPayload },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ExportReply {
    Saved { path: String },
    Failed { error: ErrorPayload },
}

/// Work queued for the connection's session worker.
#[derive(Debug)]
enum SessionCommand {
    Init(Settings),
    Question(String),
}

/// Serialize and send a server event.
#[derive(Message)]
#[rtype(result = "()")]
struct Emit(ServerEvent);

/// WebSocket actor for one interview connection.
pub struct InterviewSocket {
    connection_id: String,
    state: web::Data<AppState>,
    session: Option<Arc<SessionController>>,
    commands: Option<mpsc::Sender<SessionCommand>>,
    last_heartbeat: Instant,
}

impl InterviewSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            state,
            session: None,
            commands: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn emit(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(connection_id = %self.connection_id, error = %e, "Failed to serialize event"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, kind: &str, message: String) {
        warn!(connection_id = %self.connection_id, kind = kind, "{}", message);
        self.emit(
            ctx,
            &ServerEvent::Error(ErrorPayload {
                kind: kind.to_string(),
                message,
            }),
        );
    }

    fn enqueue(&self, command: SessionCommand, ctx: &mut ws::WebsocketContext<Self>) {
        let result = match &self.commands {
            Some(tx) => queue_command(tx, command),
            None => Err(rejection(
                &command,
                SessionError::State("session worker is not running".to_string()),
            )),
        };

        if let Err(event) = result {
            warn!(connection_id = %self.connection_id, "Command rejected");
            self.state.record_event(command_name(&event), 0, true);
            self.emit(ctx, &event);
        }
    }

    fn handle_export(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.clone() else {
            self.send_error(ctx, "session_state_error", "no session for this connection".to_string());
            return;
        };
        let state = self.state.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let started = Instant::now();
            let result = session.export_transcript().await;
            let reply = export_reply(result, session.storage());

            state.record_event(
                "export",
                started.elapsed().as_millis() as u64,
                matches!(reply, ExportReply::Failed { .. }),
            );
            addr.do_send(Emit(ServerEvent::ResponseExport(reply)));
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(ClientEvent::Init(settings)) => {
                debug!(connection_id = %self.connection_id, "init received");
                self.enqueue(SessionCommand::Init(settings), ctx);
            }
            Ok(ClientEvent::Message { question }) => {
                debug!(connection_id = %self.connection_id, "message received");
                self.enqueue(SessionCommand::Question(question), ctx);
            }
            Ok(ClientEvent::Export) => self.handle_export(ctx),
            Err(err) => self.send_error(ctx, "invalid_event", format!("Invalid event: {}", err)),
        }
    }
}

/// Runs the connection's `init` and `message` commands one at a time.
async fn drive_session(
    session: Arc<SessionController>,
    mut commands: mpsc::Receiver<SessionCommand>,
    addr: Addr<InterviewSocket>,
    state: web::Data<AppState>,
) {
    while let Some(command) = commands.recv().await {
        let started = Instant::now();

        let (event_name, event, failed) = match command {
            SessionCommand::Init(settings) => {
                let ok = session.initialize(settings).await.is_ok();
                ("init", ServerEvent::ResponseInit(ok), !ok)
            }
            SessionCommand::Question(question) => match session.handle_question(&question).await {
                Ok(answer) => {
                    let audio = session.storage().public_path(&answer.audio_path);
                    (
                        "message",
                        ServerEvent::ResponseMessage(MessageReply::Spoken(audio, answer.visemes)),
                        false,
                    )
                }
                Err(e) => {
                    warn!(session_id = %session.session_id(), error = %e, "Question failed");
                    (
                        "message",
                        ServerEvent::ResponseMessage(MessageReply::Failed {
                            error: e.to_payload(),
                        }),
                        true,
                    )
                }
            },
        };

        state.record_event(event_name, started.elapsed().as_millis() as u64, failed);
        addr.do_send(Emit(event));
    }

    debug!(session_id = %session.session_id(), "Session worker finished");
}

fn export_reply(result: SessionResult<PathBuf>, storage: &SessionStorage) -> ExportReply {
    match result {
        Ok(path) => ExportReply::Saved {
            path: storage.public_path(&path),
        },
        Err(e) => ExportReply::Failed {
            error: e.to_payload(),
        },
    }
}

/// Hand a command to the session worker without waiting.
///
/// A full queue or a stopped worker yields the reply the client gets instead.
fn queue_command(tx: &mpsc::Sender<SessionCommand>, command: SessionCommand) -> Result<(), ServerEvent> {
    tx.try_send(command).map_err(|err| match err {
        mpsc::error::TrySendError::Full(command) => rejection(
            &command,
            SessionError::Capacity(format!(
                "more than {} requests are waiting for this session",
                COMMAND_QUEUE_CAPACITY
            )),
        ),
        mpsc::error::TrySendError::Closed(command) => rejection(
            &command,
            SessionError::State("session worker is not running".to_string()),
        ),
    })
}

/// The reply a command gets when it is refused before running.
fn rejection(command: &SessionCommand, error: SessionError) -> ServerEvent {
    match command {
        SessionCommand::Init(_) => ServerEvent::ResponseInit(false),
        SessionCommand::Question(_) => ServerEvent::ResponseMessage(MessageReply::Failed {
            error: error.to_payload(),
        }),
    }
}

fn command_name(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::ResponseInit(_) => "init",
        _ => "message",
    }
}

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        match self
            .state
            .sessions
            .create_session(Some(self.connection_id.clone()))
        {
            Ok(session) => {
                let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
                tokio::spawn(drive_session(
                    session.clone(),
                    rx,
                    ctx.address(),
                    self.state.clone(),
                ));
                self.session = Some(session);
                self.commands = Some(tx);
                info!(connection_id = %self.connection_id, "WebSocket connection started");
            }
            Err(e) => {
                self.emit(ctx, &ServerEvent::Error(e.to_payload()));
                warn!(connection_id = %self.connection_id, error = %e, "Rejecting connection");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some(e.to_string()),
                }));
                ctx.stop();
                return;
            }
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection stopped");

        // Closing the queue lets the worker finish its current command and exit
        self.commands.take();

        if self.session.take().is_some() {
            let state = self.state.clone();
            let connection_id = self.connection_id.clone();
            tokio::spawn(async move {
                state.sessions.close_session(&connection_id).await;
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.send_error(
                    ctx,
                    "invalid_event",
                    format!("Binary frames are not supported ({} bytes)", data.len()),
                );
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Emit> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: Emit, ctx: &mut Self::Context) {
        self.emit(ctx, &msg.0);
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the HTTP request; the `InterviewSocket` actor takes it from there.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());
    ws::start(InterviewSocket::new(app_state), &req, stream)
}
