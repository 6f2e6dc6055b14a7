//! Mock Housing Hub backend for integration tests.
//!
//! Serves the REST endpoints and the chat socket on an ephemeral loopback
//! port. Socket message frames are stored and echoed back as `newMessage`,
//! the way the real server broadcasts to every socket in the conversation.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use hub_chat::protocol::{Identity, Role};
use hub_chat::session::{SessionContext, SessionCredential};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const TOKEN: &str = "test-token";
pub const EMAIL: &str = "sam@uni.edu";
pub const PASSWORD: &str = "correct horse";
pub const STUDENT_ID: &str = "s1";
pub const LANDLORD_ID: &str = "l1";

#[derive(Clone, Copy, Default)]
pub struct BackendOptions {
    /// Reply `authOk` after a valid auth frame.
    pub ack_auth: bool,
    /// Never answer on the socket, not even the echo.
    pub silent: bool,
}

pub struct BackendState {
    options: BackendOptions,
    conversations: Vec<Value>,
    messages: Mutex<HashMap<String, Vec<Value>>>,
    /// Every text frame received on any socket, in order.
    pub frames: Mutex<Vec<Value>>,
    /// Bodies of `POST /api/conversations`.
    pub started: Mutex<Vec<Value>>,
    /// `Authorization` header of each socket upgrade request.
    pub upgrade_auth: Mutex<Vec<Option<String>>>,
    /// Sockets currently being served.
    pub open_sockets: AtomicUsize,
    pushes: broadcast::Sender<Value>,
}

pub struct MockBackend {
    pub base_url: String,
    pub ws_url: String,
    pub state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::start_with(BackendOptions::default()).await
    }

    pub async fn start_with(options: BackendOptions) -> Self {
        let (pushes, _) = broadcast::channel(64);
        let mut messages = HashMap::new();
        messages.insert(
            "c1".to_string(),
            vec![
                stored_message("m1", "c1", STUDENT_ID, "Is the flat still available?"),
                stored_message("m2", "c1", LANDLORD_ID, "Yes, viewings on Saturday."),
            ],
        );
        messages.insert("c2".to_string(), Vec::new());

        let state = Arc::new(BackendState {
            options,
            conversations: vec![
                conversation("c1", "Garden flat"),
                conversation("c2", "Attic room"),
            ],
            messages: Mutex::new(messages),
            frames: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            upgrade_auth: Mutex::new(Vec::new()),
            open_sockets: AtomicUsize::new(0),
            pushes,
        });

        let app = Router::new()
            .route("/api/login", axum::routing::post(login))
            .route(
                "/api/conversations",
                get(list_conversations).post(start_conversation),
            )
            .route("/api/conversations/{id}/messages", get(list_messages))
            .route("/ws", get(socket))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws"),
            state,
            server,
        }
    }

    /// Push a frame to every open socket.
    pub fn push(&self, frame: Value) {
        let _ = self.state.pushes.send(frame);
    }

    /// Wait until at least `count` socket frames have been received.
    pub async fn frames(&self, count: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let frames = self.state.frames.lock().unwrap();
                    if frames.len() >= count {
                        return frames.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for socket frames")
    }
}

impl MockBackend {
    /// Wait until the number of open sockets equals `count`.
    pub async fn open_sockets(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.state.open_sockets.load(Ordering::SeqCst) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for open socket count");
    }
}

pub fn student_session() -> SessionContext {
    SessionContext::signed_in(SessionCredential::new(
        TOKEN,
        Identity {
            id: STUDENT_ID.to_string(),
            email: EMAIL.to_string(),
            role: Role::Student,
        },
    ))
}

pub fn conversation(id: &str, title: &str) -> Value {
    json!({
        "_id": id,
        "property_id": { "_id": format!("p-{id}"), "title": title, "price": 650 },
        "student_id": { "_id": STUDENT_ID, "email": EMAIL },
        "landlord_id": { "_id": LANDLORD_ID, "email": "lee@lets.co" },
        "createdAt": "2024-01-30T09:00:00.000Z"
    })
}

pub fn stored_message(id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Value {
    json!({
        "_id": id,
        "conversation_id": conversation_id,
        "sender_id": sender_id,
        "content": content,
        "createdAt": "2024-02-01T10:00:00.000Z",
        "__v": 0
    })
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["email"] == EMAIL && body["password"] == PASSWORD {
        Json(json!({
            "token": TOKEN,
            "email": EMAIL,
            "userId": STUDENT_ID,
            "userType": "student"
        }))
        .into_response()
    } else {
        error(StatusCode::BAD_REQUEST, "Invalid credentials")
    }
}

async fn list_conversations(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "Invalid token");
    }
    Json(state.conversations.clone()).into_response()
}

async fn list_messages(
    State(state): State<Arc<BackendState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "Invalid token");
    }
    match state.messages.lock().unwrap().get(&id) {
        Some(messages) => Json(messages.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "Conversation not found"),
    }
}

async fn start_conversation(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "Invalid token");
    }
    state.started.lock().unwrap().push(body);
    (
        StatusCode::CREATED,
        Json(json!({ "conversationId": "c-new" })),
    )
        .into_response()
}

async fn socket(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.upgrade_auth.lock().unwrap().push(auth);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: Arc<BackendState>) {
    state.open_sockets.fetch_add(1, Ordering::SeqCst);
    serve_frames(socket, &state).await;
    state.open_sockets.fetch_sub(1, Ordering::SeqCst);
}

async fn serve_frames(socket: WebSocket, state: &Arc<BackendState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut pushes = state.pushes.subscribe();
    let mut bound: Option<String> = None;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(Message::Text(text))) = incoming else {
                    break;
                };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                state.frames.lock().unwrap().push(frame.clone());
                if state.options.silent {
                    continue;
                }

                let reply = match frame["type"].as_str() {
                    Some("auth") if frame["token"] == TOKEN => {
                        bound = frame["conversationId"].as_str().map(str::to_string);
                        state.options.ack_auth.then(|| json!({ "type": "authOk" }))
                    }
                    Some("auth") => Some(json!({ "type": "authError", "message": "Invalid token" })),
                    Some("message") if bound.is_some() => Some(store_and_echo(state, &frame)),
                    _ => None,
                };
                if let Some(reply) = reply
                    && sender.send(Message::Text(reply.to_string().into())).await.is_err()
                {
                    break;
                }
            }
            pushed = pushes.recv() => {
                let Ok(frame) = pushed else {
                    continue;
                };
                if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn store_and_echo(state: &BackendState, frame: &Value) -> Value {
    let payload = &frame["payload"];
    let conversation_id = payload["conversation_id"].as_str().unwrap_or_default();
    let mut stored = stored_message(
        &format!("srv-{}", uuid::Uuid::new_v4()),
        conversation_id,
        STUDENT_ID,
        payload["content"].as_str().unwrap_or_default(),
    );
    if let Some(token) = payload.get("clientToken") {
        stored["clientToken"] = token.clone();
    }

    state
        .messages
        .lock()
        .unwrap()
        .entry(conversation_id.to_string())
        .or_default()
        .push(stored.clone());

    json!({ "type": "newMessage", "payload": stored })
}
