use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::{request::Parts, Method},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use campus_shared::constants::MAX_EVENT_SIZE;
use campus_shared::protocol::{check_has_content, MediaFields};
use campus_shared::types::{GroupId, MessageId, UserId};
use campus_store::{
    split_media, DeleteOutcome, DirectHistoryEntry, DirectMessageDraft, GroupHistoryEntry,
};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::session::Realtime;
use crate::store::{run_blocking, SqliteStore, UserDirectory};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub realtime: Arc<Realtime>,
    pub store: SqliteStore,
    pub authenticator: Arc<dyn Authenticator>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/messages/send", post(send_message))
        .route("/messages/chat/{friend_id}", get(chat_history))
        .route("/messages/delete/{message_id}", delete(delete_message))
        .route(
            "/groups/messages/{id}",
            get(group_history).delete(delete_group_message),
        )
        .layer(DefaultBodyLimit::max(MAX_EVENT_SIZE))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Acting user of an HTTP request, from the `X-User-Id` header set by the
/// token layer in front of this service.
#[derive(Debug, Clone, Copy)]
pub struct CallerId(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized("missing X-User-Id header".into()))?;
        let id = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ServerError::Unauthorized("invalid X-User-Id header".into()))?;
        Ok(CallerId(UserId(id)))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
    rooms: usize,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    receiver_id: UserId,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    media: MediaFields,
    #[serde(default)]
    reply_to_id: Option<MessageId>,
}

#[derive(Serialize)]
struct SendMessageResponse {
    message: &'static str,
    id: MessageId,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct History<T> {
    messages: Vec<T>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.realtime.registry.connection_count().await,
        rooms: state.realtime.registry.room_count().await,
    })
}

/// Persist a direct message without a live broadcast.
async fn send_message(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    require_user(&state, req.receiver_id, "Receiver not found").await?;
    check_has_content(req.message.as_deref(), &req.media)?;
    req.media.check_size(state.config.max_attachment_bytes)?;

    let (attachment, voice) = split_media(&req.media);
    let draft = DirectMessageDraft {
        sender_id: caller,
        receiver_id: req.receiver_id,
        content: req.message.filter(|t| !t.trim().is_empty()),
        attachment,
        voice,
        reply_to_id: req.reply_to_id,
    };

    let store = state.store.clone();
    let stored = run_blocking(state.config.store_timeout, move || {
        store.with_db(|db| db.insert_direct_message(&draft))
    })
    .await?;

    info!(id = %stored.id, from = %caller, to = %stored.receiver_id, "Message stored via HTTP");
    Ok(Json(SendMessageResponse {
        message: "sent",
        id: stored.id,
        timestamp: stored.timestamp,
    }))
}

async fn chat_history(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(friend_id): Path<i64>,
) -> Result<Json<History<DirectHistoryEntry>>, ServerError> {
    let friend = UserId(friend_id);
    require_user(&state, friend, "User not found").await?;

    let store = state.store.clone();
    let messages = run_blocking(state.config.store_timeout, move || {
        store.with_db(|db| db.conversation_with_replies(caller, friend))
    })
    .await?;

    Ok(Json(History { messages }))
}

async fn delete_message(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(message_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id = MessageId(message_id);
    let store = state.store.clone();
    let outcome = run_blocking(state.config.store_timeout, move || {
        store.with_db(|db| db.delete_direct_message(id, caller))
    })
    .await?;

    deleted_response(outcome, id)
}

async fn group_history(
    State(state): State<AppState>,
    CallerId(_caller): CallerId,
    Path(group_id): Path<i64>,
) -> Result<Json<History<GroupHistoryEntry>>, ServerError> {
    let group = GroupId(group_id);
    let store = state.store.clone();
    let messages = run_blocking(state.config.store_timeout, move || {
        store.with_db(|db| db.group_history_with_replies(group))
    })
    .await?;

    Ok(Json(History { messages }))
}

async fn delete_group_message(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(message_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id = MessageId(message_id);
    let store = state.store.clone();
    let outcome = run_blocking(state.config.store_timeout, move || {
        store.with_db(|db| db.delete_group_message(id, caller))
    })
    .await?;

    deleted_response(outcome, id)
}

fn deleted_response(
    outcome: DeleteOutcome,
    id: MessageId,
) -> Result<Json<serde_json::Value>, ServerError> {
    match outcome {
        DeleteOutcome::Deleted => {
            info!(id = %id, "Message deleted via HTTP");
            Ok(Json(serde_json::json!({ "message": "Message deleted" })))
        }
        DeleteOutcome::NotFound => Err(ServerError::NotFound("Message not found".into())),
        DeleteOutcome::NotOwner => Err(ServerError::Forbidden(
            "Only the sender can delete a message".into(),
        )),
    }
}

async fn require_user(state: &AppState, id: UserId, missing: &str) -> Result<(), ServerError> {
    let store = state.store.clone();
    match run_blocking(state.config.store_timeout, move || store.find_user(id)).await? {
        Some(_) => Ok(()),
        None => Err(ServerError::NotFound(missing.to_string())),
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP server");
    serve_on(listener, state).await
}

pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    use crate::auth::DirectoryAuthenticator;
    use campus_store::{Database, GroupMessageDraft};

    fn state_with(store: SqliteStore) -> AppState {
        let config = ServerConfig {
            max_attachment_bytes: 1024,
            ..ServerConfig::default()
        };
        let realtime = Realtime::new(Arc::new(store.clone()), Arc::new(store.clone()), &config);
        AppState {
            realtime: Arc::new(realtime),
            authenticator: Arc::new(DirectoryAuthenticator::new(
                Arc::new(store.clone()),
                config.store_timeout,
            )),
            store,
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
        }
    }

    fn test_state() -> (AppState, UserId, UserId) {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let ada = store.with_db(|db| db.insert_user("Ada", None, None)).unwrap();
        let bob = store.with_db(|db| db.insert_user("Bob", None, None)).unwrap();
        (state_with(store), ada.id, bob.id)
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, caller: UserId, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", caller.to_string())
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn as_user(method: &str, uri: &str, caller: UserId) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", caller.to_string())
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health() {
        let (state, _, _) = test_state();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = call(build_router(state), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn send_then_read_history() {
        let (state, ada, bob) = test_state();
        let app = build_router(state);

        let (status, sent) = call(
            app.clone(),
            post_json(
                "/messages/send",
                ada,
                serde_json::json!({"receiver_id": bob.0, "message": "office hours?"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["message"], "sent");

        let reply = serde_json::json!({
            "receiver_id": ada.0, "message": "at 3", "reply_to_id": sent["id"]
        });
        let (status, _) = call(app.clone(), post_json("/messages/send", bob, reply)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, history) = call(
            app,
            as_user("GET", &format!("/messages/chat/{}", bob.0), ada),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let messages = history["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "office hours?");
        assert!(messages[0]["reply_preview"].is_null());
        assert_eq!(messages[1]["reply_preview"]["text"], "office hours?");
        assert_eq!(messages[1]["reply_preview"]["sender_name"], "Ada");
    }

    #[tokio::test]
    async fn send_validates_receiver_and_size() {
        let (state, ada, _) = test_state();
        let app = build_router(state);

        let (status, body) = call(
            app.clone(),
            post_json(
                "/messages/send",
                ada,
                serde_json::json!({"receiver_id": 999, "message": "hello?"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found: Receiver not found");

        let big = format!("data:image/png;base64,{}", "A".repeat(8192));
        let (status, _) = call(
            app.clone(),
            post_json(
                "/messages/send",
                ada,
                serde_json::json!({"receiver_id": ada.0, "file_data": big}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method("POST")
            .uri("/messages/send")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"receiver_id":1,"message":"x"}"#))
            .unwrap();
        let (status, _) = call(app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn history_for_unknown_friend_is_404() {
        let (state, ada, _) = test_state();
        let (status, _) = call(build_router(state), as_user("GET", "/messages/chat/999", ada)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_checks_owner() {
        let (state, ada, bob) = test_state();
        let app = build_router(state);
        let (_, sent) = call(
            app.clone(),
            post_json(
                "/messages/send",
                ada,
                serde_json::json!({"receiver_id": bob.0, "message": "draft"}),
            ),
        )
        .await;
        let uri = format!("/messages/delete/{}", sent["id"]);

        let (status, _) = call(app.clone(), as_user("DELETE", &uri, bob)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(app.clone(), as_user("DELETE", &uri, ada)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(app, as_user("DELETE", &uri, ada)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn group_history_and_delete() {
        let (state, ada, bob) = test_state();
        let stored = state
            .store
            .with_db(|db| {
                db.insert_group_message(&GroupMessageDraft {
                    group_id: GroupId(5),
                    sender_id: ada,
                    content: Some("lab at 2".into()),
                    attachment: None,
                    voice: None,
                    reply_to_id: None,
                })
            })
            .unwrap();
        let app = build_router(state);

        let (status, history) = call(app.clone(), as_user("GET", "/groups/messages/5", bob)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["messages"][0]["sender_name"], "Ada");

        let uri = format!("/groups/messages/{}", stored.id);
        let (status, _) = call(app.clone(), as_user("DELETE", &uri, bob)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(app, as_user("DELETE", &uri, ada)).await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn next_event(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("socket closed")
                .expect("socket error");
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn websocket_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("campus.db")).unwrap();
        let store = SqliteStore::new(db);
        let three = store.with_db(|db| db.insert_user("Three", None, None)).unwrap();
        let seven = store.with_db(|db| db.insert_user("Seven", None, None)).unwrap();
        let state = state_with(store.clone());
        let realtime = Arc::clone(&state.realtime);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_on(listener, state));

        let refused = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id=999")).await;
        assert!(refused.is_err());

        let (mut ws3, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id={}", three.id))
            .await
            .unwrap();
        let (mut ws7, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id={}", seven.id))
            .await
            .unwrap();

        let room = campus_shared::types::RoomKey::pair(three.id, seven.id);
        let join = serde_json::json!({"event": "join_room", "data": {"room": room}}).to_string();
        ws3.send(WsMessage::Text(join.clone().into())).await.unwrap();
        ws7.send(WsMessage::Text(join.into())).await.unwrap();

        // Joins are processed in order per connection, but the two sockets
        // race each other; wait until both are in the room.
        for _ in 0..100 {
            if realtime.registry.members(&room).await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(realtime.registry.members(&room).await.len(), 2);

        let send = serde_json::json!({"event": "send_message", "data": {
            "sender": three.id, "receiver": seven.id, "room": room, "text": "hi"
        }});
        ws3.send(WsMessage::Text(send.to_string().into())).await.unwrap();

        for ws in [&mut ws3, &mut ws7] {
            let event = next_event(ws).await;
            assert_eq!(event["event"], "new_message");
            assert_eq!(event["data"]["text"], "hi");
            assert_eq!(event["data"]["from"], three.id.0);
        }

        ws7.send(WsMessage::Text("garbage".into())).await.unwrap();
        let event = next_event(&mut ws7).await;
        assert_eq!(event["event"], "error");
        assert_eq!(event["data"]["code"], "malformed");

        ws7.close(None).await.unwrap();
        for _ in 0..100 {
            if realtime.registry.connection_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(realtime.registry.members(&room).await.len(), 1);
    }
}
