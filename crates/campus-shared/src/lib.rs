//! # campus-shared
//!
//! Types shared by the campus store and server: id newtypes, room keys,
//! the real-time wire protocol and the constants both sides agree on.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
