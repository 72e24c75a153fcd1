use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CALL_ROOM_PREFIX, MAX_ROOM_KEY_LEN, PERSONAL_ROOM_PREFIX};
use crate::error::ProtocolError;

// User identity = integer primary key of the users table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row id of a direct or group message. The two tables have separate id
/// spaces, so a `MessageId` only means something next to its chat type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned handle of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a logical broadcast room.
///
/// Rooms have no persisted form; the key is the only thing that names them.
/// Three shapes are produced by the server itself:
/// - `call_{min}_{max}` for the pair of users in a direct chat or call
/// - the decimal group id for a group chat
/// - `user_{id}` for a user's personal channel
///
/// Clients may also send arbitrary keys, which are accepted as long as they
/// are non-empty and bounded in length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ProtocolError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "room",
                reason: "room key must not be empty".into(),
            });
        }
        if key.len() > MAX_ROOM_KEY_LEN {
            return Err(ProtocolError::InvalidField {
                field: "room",
                reason: format!("room key longer than {MAX_ROOM_KEY_LEN} bytes"),
            });
        }
        Ok(Self(key))
    }

    /// Room shared by two users, independent of argument order.
    pub fn pair(a: UserId, b: UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{CALL_ROOM_PREFIX}{lo}_{hi}"))
    }

    pub fn group(group_id: GroupId) -> Self {
        Self(group_id.to_string())
    }

    pub fn personal(user_id: UserId) -> Self {
        Self(format!("{PERSONAL_ROOM_PREFIX}{user_id}"))
    }

    /// Owner of a personal channel key, if this is one.
    pub fn personal_owner(&self) -> Option<UserId> {
        self.0
            .strip_prefix(PERSONAL_ROOM_PREFIX)
            .and_then(|id| id.parse::<i64>().ok())
            .map(UserId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

/// Which message table a deletion refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Dm,
    Group,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = RoomKey::pair(UserId(7), UserId(3));
        let b = RoomKey::pair(UserId(3), UserId(7));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "call_3_7");
    }

    #[test]
    fn group_and_personal_keys() {
        assert_eq!(RoomKey::group(GroupId(12)).as_str(), "12");
        let personal = RoomKey::personal(UserId(9));
        assert_eq!(personal.as_str(), "user_9");
        assert_eq!(personal.personal_owner(), Some(UserId(9)));
        assert_eq!(RoomKey::group(GroupId(9)).personal_owner(), None);
    }

    #[test]
    fn room_key_rejects_empty_and_oversized() {
        assert!(RoomKey::new("   ").is_err());
        assert!(RoomKey::new("x".repeat(MAX_ROOM_KEY_LEN + 1)).is_err());
        assert!(RoomKey::new("study-group").is_ok());
    }

    #[test]
    fn room_key_deserialization_validates() {
        let ok: Result<RoomKey, _> = serde_json::from_str("\"call_1_2\"");
        assert!(ok.is_ok());
        let empty: Result<RoomKey, _> = serde_json::from_str("\"\"");
        assert!(empty.is_err());
    }
}
