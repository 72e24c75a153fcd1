//! Per-connection event handling.
//!
//! A [`ConnectionSession`] binds one live socket to its authenticated user.
//! Frames are handled one at a time in arrival order; any failure is scoped
//! to that frame and answered with an `error` event to this connection only.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use campus_shared::protocol::{peek_event_name, ClientEvent, ServerEvent};
use campus_shared::types::{ConnectionId, RoomKey, UserId};

use crate::broadcaster::{DirectSend, GroupSend, MessageBroadcaster};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rooms::{Frame, RoomRegistry};
use crate::signaling::CallOrchestrator;
use crate::store::{MessageStore, UserDirectory};

/// The real-time core shared by every connection.
pub struct Realtime {
    pub registry: Arc<RoomRegistry>,
    pub broadcaster: MessageBroadcaster,
    pub calls: CallOrchestrator,
    send_queue_capacity: usize,
}

impl Realtime {
    pub fn new(
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        config: &ServerConfig,
    ) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = MessageBroadcaster::new(
            Arc::clone(&registry),
            store,
            users,
            config.store_timeout,
            config.max_attachment_bytes,
        );
        let calls = CallOrchestrator::new(Arc::clone(&registry), config.ring_timeout);

        Self {
            registry,
            broadcaster,
            calls,
            send_queue_capacity: config.send_queue_capacity,
        }
    }

    /// Register a new connection for `user_id`. The receiver yields every
    /// frame addressed to it and must be drained by the socket writer.
    pub async fn connect(self: &Arc<Self>, user_id: UserId) -> (ConnectionSession, mpsc::Receiver<Frame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        self.registry.register(id, user_id, tx).await;

        let session = ConnectionSession {
            id,
            user_id,
            realtime: Arc::clone(self),
        };
        (session, rx)
    }
}

pub struct ConnectionSession {
    id: ConnectionId,
    user_id: UserId,
    realtime: Arc<Realtime>,
}

impl ConnectionSession {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handle one text frame from the client.
    pub async fn handle_text(&self, text: &str) {
        let event = match ClientEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                let name = peek_event_name(text);
                warn!(conn = %self.id.short(), event = ?name, error = %e, "Rejected frame");
                self.report(name.as_deref(), &ServerError::from(e)).await;
                return;
            }
        };

        let name = event.name();
        debug!(conn = %self.id.short(), user = %self.user_id, event = name, "Event");
        if let Err(e) = self.dispatch(event).await {
            warn!(conn = %self.id.short(), event = name, error = %e, "Event failed");
            self.report(Some(name), &e).await;
        }
    }

    async fn dispatch(&self, event: ClientEvent) -> Result<(), ServerError> {
        let rt = &self.realtime;
        match event {
            ClientEvent::JoinRoom(req) => {
                if let Some(owner) = req.room.personal_owner() {
                    if owner != self.user_id {
                        return Err(ServerError::Forbidden(
                            "Cannot join another user's personal channel".into(),
                        ));
                    }
                }
                rt.registry.join(self.id, &req.room).await;
            }
            ClientEvent::LeaveRoom(req) => {
                if req.room == RoomKey::personal(self.user_id) {
                    return Err(ServerError::BadRequest(
                        "Cannot leave your own personal channel".into(),
                    ));
                }
                rt.registry.leave(self.id, &req.room).await;
            }
            ClientEvent::SendMessage(req) => {
                self.ensure_self("sender", req.sender)?;
                rt.broadcaster
                    .send_direct(DirectSend {
                        sender_id: req.sender,
                        receiver_id: req.receiver,
                        room: req.room,
                        text: req.text,
                        media: req.media,
                        reply_to_id: req.reply_to_id,
                    })
                    .await?;
            }
            ClientEvent::SendGroupMessage(req) => {
                self.ensure_self("sender_id", req.sender_id)?;
                rt.broadcaster
                    .send_group(GroupSend {
                        sender_id: req.sender_id,
                        group_id: req.group_id,
                        text: req.message,
                        media: req.media,
                        reply_to_id: req.reply_to_id,
                    })
                    .await?;
            }
            ClientEvent::DeleteMessage(req) => {
                self.ensure_self("user_id", req.user_id)?;
                rt.broadcaster
                    .delete_direct(req.message_id, req.user_id, &req.room)
                    .await?;
            }
            ClientEvent::DeleteGroupMessage(req) => {
                self.ensure_self("user_id", req.user_id)?;
                rt.broadcaster
                    .delete_group(req.message_id, req.user_id, req.group_id)
                    .await?;
            }
            ClientEvent::CallInitiate(req) => {
                self.ensure_self("caller_id", req.caller_id)?;
                rt.calls.initiate(req).await?;
            }
            ClientEvent::CallAccept(req) => {
                self.ensure_self("recipient_id", req.recipient_id)?;
                rt.calls.accept(self.id, req).await?;
            }
            ClientEvent::CallReject(req) => {
                self.ensure_self("recipient_id", req.recipient_id)?;
                rt.calls.reject(req).await;
            }
            ClientEvent::CallEnd(req) => {
                self.ensure_self("user_id", req.user_id)?;
                rt.calls.end(self.id, req).await?;
            }
            ClientEvent::WebrtcOffer(req) => {
                self.ensure_self("caller_id", req.caller_id)?;
                rt.calls.relay_offer(req).await;
            }
            ClientEvent::WebrtcAnswer(req) => {
                self.ensure_self("recipient_id", req.recipient_id)?;
                rt.calls.relay_answer(req).await;
            }
            ClientEvent::WebrtcIceCandidate(req) => {
                self.ensure_self("sender_id", req.sender_id)?;
                rt.calls.relay_ice_candidate(req).await;
            }
        }
        Ok(())
    }

    /// The acting-user field of an event must name this connection's user.
    fn ensure_self(&self, field: &'static str, claimed: UserId) -> Result<(), ServerError> {
        if claimed == self.user_id {
            Ok(())
        } else {
            Err(ServerError::Forbidden(format!(
                "{field} {claimed} does not match the connected user"
            )))
        }
    }

    async fn report(&self, event: Option<&str>, err: &ServerError) {
        let ack = ServerEvent::error(event, err.code(), err.public_message());
        self.realtime.registry.send_to_connection(self.id, &ack).await;
    }

    /// Tear down after the socket closed. Leaves every room; calls are only
    /// discarded once the user has no connection left, and no `call_ended`
    /// is sent.
    pub async fn close(self) {
        let Some(departure) = self.realtime.registry.unregister(self.id).await else {
            return;
        };
        if departure.last_for_user {
            self.realtime.calls.on_user_offline(departure.user_id).await;
        }
        info!(
            conn = %self.id.short(),
            user = %departure.user_id,
            rooms_left = departure.rooms.len(),
            "Session closed"
        );
    }
}
