/// Application name
pub const APP_NAME: &str = "Campus";

/// Default HTTP / WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Prefix of the room shared by exactly two users (direct chat and calls)
pub const CALL_ROOM_PREFIX: &str = "call_";

/// Prefix of a user's personal channel
pub const PERSONAL_ROOM_PREFIX: &str = "user_";

/// Maximum length of a client-supplied room key
pub const MAX_ROOM_KEY_LEN: usize = 128;

/// Maximum decoded attachment size in bytes (5 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 5 * 1024 * 1024;

/// Maximum size of a single WebSocket event frame (16 MiB)
pub const MAX_EVENT_SIZE: usize = 16 * 1024 * 1024;
