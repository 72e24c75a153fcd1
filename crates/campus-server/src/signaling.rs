//! Call signaling: the per-pair call state machine and the WebRTC relays.
//!
//! A call between two users is keyed by their pair room `call_{min}_{max}`.
//! The table below holds at most one session per pair:
//!
//! ```text
//! idle --initiate--> ringing --accept--> active
//!                       |                  |
//!                    reject               end
//!                       v                  v
//!                      idle               idle
//! ```
//!
//! Ringing sessions older than the ring timeout are treated as idle the next
//! time anyone looks at them. Offer, answer and ICE payloads are relayed to
//! the addressed peer's personal room without looking at the call state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use campus_shared::protocol::{
    CallAccept, CallEnd, CallInitiate, CallReject, ServerEvent, WebrtcAnswer, WebrtcIceCandidate,
    WebrtcOffer,
};
use campus_shared::types::{CallType, ConnectionId, RoomKey, UserId};

use crate::error::ServerError;
use crate::rooms::RoomRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ringing,
    Active,
}

#[derive(Debug, Clone)]
pub struct CallSession {
    pub caller: UserId,
    pub recipient: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub started_at: Instant,
}

impl CallSession {
    fn is_stale(&self, ring_timeout: Duration) -> bool {
        self.status == CallStatus::Ringing && self.started_at.elapsed() >= ring_timeout
    }

    fn involves(&self, user: UserId) -> bool {
        self.caller == user || self.recipient == user
    }
}

pub struct CallOrchestrator {
    registry: Arc<RoomRegistry>,
    sessions: Mutex<HashMap<RoomKey, CallSession>>,
    ring_timeout: Duration,
}

impl CallOrchestrator {
    pub fn new(registry: Arc<RoomRegistry>, ring_timeout: Duration) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
            ring_timeout,
        }
    }

    /// Start ringing `recipient_id`. Fails with `CallBusy` while the pair
    /// already has a live ringing or active session.
    pub async fn initiate(&self, req: CallInitiate) -> Result<RoomKey, ServerError> {
        if req.caller_id == req.recipient_id {
            return Err(ServerError::BadRequest("Cannot call yourself".into()));
        }
        let call_room = RoomKey::pair(req.caller_id, req.recipient_id);

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(&call_room) {
                if !existing.is_stale(self.ring_timeout) {
                    return Err(ServerError::CallBusy(call_room.to_string()));
                }
                debug!(room = %call_room, "Superseding stale ringing call");
            }
            sessions.insert(
                call_room.clone(),
                CallSession {
                    caller: req.caller_id,
                    recipient: req.recipient_id,
                    call_type: req.call_type,
                    status: CallStatus::Ringing,
                    started_at: Instant::now(),
                },
            );
        }

        let event = ServerEvent::CallRinging {
            caller_id: req.caller_id,
            caller_name: req.caller_name,
            caller_avatar: req.caller_avatar,
            call_room: call_room.clone(),
            call_type: req.call_type,
        };
        let delivered = self.registry.send_to_user(req.recipient_id, &event).await;

        info!(
            room = %call_room,
            caller = %req.caller_id,
            recipient = %req.recipient_id,
            call_type = ?req.call_type,
            delivered,
            "Call ringing"
        );
        Ok(call_room)
    }

    /// Accept a ringing call from the connection `conn`.
    ///
    /// Both the accepting connection and every connection of the caller are
    /// subscribed to the call room before the caller is told.
    pub async fn accept(&self, conn: ConnectionId, req: CallAccept) -> Result<(), ServerError> {
        let call_room = RoomKey::pair(req.caller_id, req.recipient_id);
        if req.call_room != call_room {
            return Err(ServerError::BadRequest(format!(
                "call_room {} does not match {}",
                req.call_room, call_room
            )));
        }

        let call_type = {
            let mut sessions = self.sessions.lock().await;
            let stale = sessions
                .get(&call_room)
                .is_some_and(|s| s.is_stale(self.ring_timeout));
            if stale {
                sessions.remove(&call_room);
            }

            match sessions.get_mut(&call_room) {
                Some(session)
                    if session.status == CallStatus::Ringing
                        && session.caller == req.caller_id
                        && session.recipient == req.recipient_id =>
                {
                    session.status = CallStatus::Active;
                    session.call_type
                }
                _ => return Err(ServerError::NoActiveCall(call_room.to_string())),
            }
        };

        self.registry.join(conn, &call_room).await;
        self.registry.join_user(req.caller_id, &call_room).await;

        let event = ServerEvent::CallAccepted {
            recipient_id: req.recipient_id,
            recipient_name: req.recipient_name,
            recipient_avatar: req.recipient_avatar,
            call_room: call_room.clone(),
        };
        self.registry.send_to_user(req.caller_id, &event).await;

        info!(
            room = %call_room,
            caller = %req.caller_id,
            recipient = %req.recipient_id,
            ?call_type,
            "Call accepted"
        );
        Ok(())
    }

    /// Decline a call. The caller is always told, even if nothing was ringing.
    pub async fn reject(&self, req: CallReject) {
        let call_room = RoomKey::pair(req.caller_id, req.recipient_id);
        {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(&call_room)
                .is_some_and(|s| s.status == CallStatus::Ringing)
            {
                sessions.remove(&call_room);
            }
        }

        let event = ServerEvent::CallRejected {
            recipient_id: req.recipient_id,
        };
        self.registry.send_to_user(req.caller_id, &event).await;

        info!(room = %call_room, recipient = %req.recipient_id, "Call rejected");
    }

    /// Hang up from connection `conn`. `call_ended` goes to the call room and
    /// to the peer's personal room, then `conn` alone leaves the call room.
    /// The user's other connections keep it, since it is also the pair's chat
    /// room.
    pub async fn end(&self, conn: ConnectionId, req: CallEnd) -> Result<(), ServerError> {
        let call_room = RoomKey::pair(req.user_id, req.peer_id);
        if req.call_room != call_room {
            return Err(ServerError::BadRequest(format!(
                "call_room {} does not match {}",
                req.call_room, call_room
            )));
        }

        let had_session = self.sessions.lock().await.remove(&call_room).is_some();

        let event = ServerEvent::CallEnded {
            user_id: req.user_id,
        };
        let in_room = self.registry.broadcast(&call_room, &event).await;
        let to_peer = self.registry.send_to_user(req.peer_id, &event).await;
        self.registry.leave(conn, &call_room).await;

        info!(
            room = %call_room,
            user = %req.user_id,
            peer = %req.peer_id,
            had_session,
            in_room,
            to_peer,
            "Call ended"
        );
        Ok(())
    }

    pub async fn relay_offer(&self, req: WebrtcOffer) -> usize {
        let event = ServerEvent::WebrtcOffer {
            offer: req.offer,
            caller_id: req.caller_id,
        };
        let delivered = self.registry.send_to_user(req.recipient_id, &event).await;
        debug!(from = %req.caller_id, to = %req.recipient_id, delivered, "Relayed offer");
        delivered
    }

    pub async fn relay_answer(&self, req: WebrtcAnswer) -> usize {
        let event = ServerEvent::WebrtcAnswer {
            answer: req.answer,
            recipient_id: req.recipient_id,
        };
        let delivered = self.registry.send_to_user(req.caller_id, &event).await;
        debug!(from = %req.recipient_id, to = %req.caller_id, delivered, "Relayed answer");
        delivered
    }

    pub async fn relay_ice_candidate(&self, req: WebrtcIceCandidate) -> usize {
        let event = ServerEvent::WebrtcIceCandidate {
            candidate: req.candidate,
            sender_id: req.sender_id,
        };
        let delivered = self.registry.send_to_user(req.peer_id, &event).await;
        debug!(from = %req.sender_id, to = %req.peer_id, delivered, "Relayed ICE candidate");
        delivered
    }

    /// Drop every session involving `user_id`. Called when the user's last
    /// connection goes away; no `call_ended` is emitted.
    pub async fn on_user_offline(&self, user_id: UserId) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.involves(user_id));
        let dropped = before - sessions.len();
        if dropped > 0 {
            info!(user = %user_id, dropped, "Discarded calls of offline user");
        }
        dropped
    }

    #[cfg(test)]
    pub async fn session(&self, call_room: &RoomKey) -> Option<CallSession> {
        self.sessions.lock().await.get(call_room).cloned()
    }
}
