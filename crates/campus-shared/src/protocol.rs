//! Real-time wire protocol.
//!
//! Every frame on the socket is a JSON object `{"event": <name>, "data": {..}}`.
//! Client and server events are closed sum types; a frame that does not
//! match one of the variants is rejected as a whole instead of being read
//! field-by-field with defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{CallType, ChatType, GroupId, MessageId, RoomKey, UserId};

/// Events a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(RoomRequest),
    LeaveRoom(RoomRequest),
    SendMessage(SendMessage),
    SendGroupMessage(SendGroupMessage),
    DeleteMessage(DeleteMessage),
    DeleteGroupMessage(DeleteGroupMessage),
    CallInitiate(CallInitiate),
    CallAccept(CallAccept),
    CallReject(CallReject),
    CallEnd(CallEnd),
    WebrtcOffer(WebrtcOffer),
    WebrtcAnswer(WebrtcAnswer),
    WebrtcIceCandidate(WebrtcIceCandidate),
}

/// Names accepted in the `event` field of a client frame.
pub const CLIENT_EVENT_NAMES: &[&str] = &[
    "join_room",
    "leave_room",
    "send_message",
    "send_group_message",
    "delete_message",
    "delete_group_message",
    "call_initiate",
    "call_accept",
    "call_reject",
    "call_end",
    "webrtc_offer",
    "webrtc_answer",
    "webrtc_ice_candidate",
];

impl ClientEvent {
    /// Parse one text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let name = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing event name".into()))?;

        if !CLIENT_EVENT_NAMES.contains(&name) {
            return Err(ProtocolError::UnknownEvent(name.to_string()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::SendGroupMessage(_) => "send_group_message",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::DeleteGroupMessage(_) => "delete_group_message",
            ClientEvent::CallInitiate(_) => "call_initiate",
            ClientEvent::CallAccept(_) => "call_accept",
            ClientEvent::CallReject(_) => "call_reject",
            ClientEvent::CallEnd(_) => "call_end",
            ClientEvent::WebrtcOffer(_) => "webrtc_offer",
            ClientEvent::WebrtcAnswer(_) => "webrtc_answer",
            ClientEvent::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
        }
    }
}

/// Best-effort extraction of the event name from a frame that failed to
/// parse, so the error acknowledgment can say which event it refers to.
pub fn peek_event_name(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("event")?.as_str().map(str::to_string)
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Optional file and voice attachment carried by a chat message.
///
/// The payloads are opaque to the server (usually base64 data URLs) and are
/// stored and relayed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFields {
    pub file_data: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_category: Option<String>,
    pub voice_data: Option<String>,
    pub voice_duration: Option<f64>,
}

impl MediaFields {
    pub fn has_file(&self) -> bool {
        self.file_data.as_deref().is_some_and(|d| !d.is_empty())
    }

    pub fn has_voice(&self) -> bool {
        self.voice_data.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// Reject attachments whose decoded size exceeds `max` bytes.
    pub fn check_size(&self, max: usize) -> Result<(), ProtocolError> {
        for data in [&self.file_data, &self.voice_data].into_iter().flatten() {
            let size = decoded_size(data);
            if size > max {
                return Err(ProtocolError::AttachmentTooLarge { size, max });
            }
        }
        Ok(())
    }
}

/// Approximate decoded size of a base64 payload, with or without a
/// `data:<mime>;base64,` prefix.
fn decoded_size(data: &str) -> usize {
    let payload = match data.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => data,
    };
    base64::decoded_len_estimate(payload.len())
}

/// A message must carry at least one of text, file or voice.
pub fn check_has_content(text: Option<&str>, media: &MediaFields) -> Result<(), ProtocolError> {
    let has_text = text.is_some_and(|t| !t.trim().is_empty());
    if has_text || media.has_file() || media.has_voice() {
        Ok(())
    } else {
        Err(ProtocolError::InvalidField {
            field: "text",
            reason: "message has no text, file or voice content".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequest {
    pub room: RoomKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub sender: UserId,
    pub receiver: UserId,
    pub room: RoomKey,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub media: MediaFields,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGroupMessage {
    pub sender_id: UserId,
    pub group_id: GroupId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub media: MediaFields,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub room: RoomKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteGroupMessage {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInitiate {
    pub caller_id: UserId,
    pub recipient_id: UserId,
    pub caller_name: String,
    #[serde(default)]
    pub caller_avatar: Option<String>,
    #[serde(default)]
    pub call_type: CallType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAccept {
    pub caller_id: UserId,
    pub recipient_id: UserId,
    pub recipient_name: String,
    #[serde(default)]
    pub recipient_avatar: Option<String>,
    pub call_room: RoomKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReject {
    pub caller_id: UserId,
    pub recipient_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnd {
    pub user_id: UserId,
    pub peer_id: UserId,
    pub call_room: RoomKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebrtcOffer {
    pub offer: Value,
    pub caller_id: UserId,
    pub recipient_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebrtcAnswer {
    pub answer: Value,
    pub caller_id: UserId,
    pub recipient_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebrtcIceCandidate {
    pub candidate: Value,
    pub sender_id: UserId,
    pub peer_id: UserId,
}

// ---------------------------------------------------------------------------
// Server events
// ---------------------------------------------------------------------------

/// Events the server emits, either to a room or to a single connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(NewMessage),
    NewGroupMessage(NewGroupMessage),
    MessageDeleted {
        message_id: MessageId,
        chat_type: ChatType,
    },
    CallRinging {
        caller_id: UserId,
        caller_name: String,
        caller_avatar: Option<String>,
        call_room: RoomKey,
        call_type: CallType,
    },
    CallAccepted {
        recipient_id: UserId,
        recipient_name: String,
        recipient_avatar: Option<String>,
        call_room: RoomKey,
    },
    CallRejected {
        recipient_id: UserId,
    },
    CallEnded {
        user_id: UserId,
    },
    WebrtcOffer {
        offer: Value,
        caller_id: UserId,
    },
    WebrtcAnswer {
        answer: Value,
        recipient_id: UserId,
    },
    WebrtcIceCandidate {
        candidate: Value,
        sender_id: UserId,
    },
    Error(ErrorEvent),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::NewGroupMessage(_) => "new_group_message",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::CallRinging { .. } => "call_ringing",
            ServerEvent::CallAccepted { .. } => "call_accepted",
            ServerEvent::CallRejected { .. } => "call_rejected",
            ServerEvent::CallEnded { .. } => "call_ended",
            ServerEvent::WebrtcOffer { .. } => "webrtc_offer",
            ServerEvent::WebrtcAnswer { .. } => "webrtc_answer",
            ServerEvent::WebrtcIceCandidate { .. } => "webrtc_ice_candidate",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn error(event: Option<&str>, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorEvent {
            event: event.map(str::to_string),
            code,
            message: message.into(),
        })
    }
}

/// Broadcast after a direct message is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub id: MessageId,
    pub from: UserId,
    pub to: UserId,
    pub room: RoomKey,
    pub text: Option<String>,
    #[serde(flatten)]
    pub media: MediaFields,
    pub reply_to_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast after a group message is persisted, with the sender denormalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewGroupMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub message: Option<String>,
    #[serde(flatten)]
    pub media: MediaFields,
    pub reply_to_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgment sent only to the connection whose event failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    /// Name of the client event that failed, when it could be determined.
    pub event: Option<String>,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Malformed,
    Invalid,
    NotFound,
    Forbidden,
    StoreFailed,
    CallBusy,
    NoActiveCall,
}

impl From<&ProtocolError> for ErrorCode {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::Malformed(_)
            | ProtocolError::UnknownEvent(_)
            | ProtocolError::Serialization(_) => ErrorCode::Malformed,
            ProtocolError::InvalidField { .. } | ProtocolError::AttachmentTooLarge { .. } => {
                ErrorCode::Invalid
            }
        }
    }
}
