//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_shared::protocol::MediaFields;
use campus_shared::types::{GroupId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. Only the fields the messaging core reads are modelled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// A file attached to a message. `data` is opaque to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub data: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub category: Option<String>,
}

/// A recorded voice note. `data` is opaque to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceNote {
    pub data: String,
    pub duration: Option<f64>,
}

/// Split the flat wire fields into typed attachments.
pub fn split_media(media: &MediaFields) -> (Option<Attachment>, Option<VoiceNote>) {
    let attachment = media
        .file_data
        .as_ref()
        .filter(|d| !d.is_empty())
        .map(|data| Attachment {
            data: data.clone(),
            name: media.file_name.clone(),
            mime_type: media.file_type.clone(),
            category: media.file_category.clone(),
        });
    let voice = media
        .voice_data
        .as_ref()
        .filter(|d| !d.is_empty())
        .map(|data| VoiceNote {
            data: data.clone(),
            duration: media.voice_duration,
        });
    (attachment, voice)
}

/// Flatten typed attachments back into the wire fields.
pub fn join_media(attachment: Option<&Attachment>, voice: Option<&VoiceNote>) -> MediaFields {
    MediaFields {
        file_data: attachment.map(|a| a.data.clone()),
        file_name: attachment.and_then(|a| a.name.clone()),
        file_type: attachment.and_then(|a| a.mime_type.clone()),
        file_category: attachment.and_then(|a| a.category.clone()),
        voice_data: voice.map(|v| v.data.clone()),
        voice_duration: voice.and_then(|v| v.duration),
    }
}

// ---------------------------------------------------------------------------
// Direct message
// ---------------------------------------------------------------------------

/// A message between two users. Deleted only by its sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub voice: Option<VoiceNote>,
    /// Id of an earlier direct message this one replies to. Not validated on
    /// write; may dangle after the referenced message is deleted.
    pub reply_to_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

impl DirectMessage {
    pub fn media(&self) -> MediaFields {
        join_media(self.attachment.as_ref(), self.voice.as_ref())
    }
}

/// Input for [`Database::insert_direct_message`](crate::Database::insert_direct_message).
#[derive(Debug, Clone, PartialEq)]
pub struct DirectMessageDraft {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub voice: Option<VoiceNote>,
    pub reply_to_id: Option<MessageId>,
}

// ---------------------------------------------------------------------------
// Group message
// ---------------------------------------------------------------------------

/// A message posted to a group. `reply_to_id` refers to the same group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub voice: Option<VoiceNote>,
    pub reply_to_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

impl GroupMessage {
    pub fn media(&self) -> MediaFields {
        join_media(self.attachment.as_ref(), self.voice.as_ref())
    }
}

/// Input for [`Database::insert_group_message`](crate::Database::insert_group_message).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMessageDraft {
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub voice: Option<VoiceNote>,
    pub reply_to_id: Option<MessageId>,
}

// ---------------------------------------------------------------------------
// Deletion / replies
// ---------------------------------------------------------------------------

/// Result of an ownership-checked delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotOwner,
}

/// Compact summary of the message a reply points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyPreview {
    pub id: MessageId,
    pub text: Option<String>,
    pub sender_name: Option<String>,
    pub has_voice: bool,
    pub has_file: bool,
}

/// A direct message as returned by history reads.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DirectHistoryEntry {
    #[serde(flatten)]
    pub message: DirectMessage,
    pub reply_preview: Option<ReplyPreview>,
}

/// A group message as returned by history reads.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupHistoryEntry {
    #[serde(flatten)]
    pub message: GroupMessage,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub reply_preview: Option<ReplyPreview>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_split_and_join() {
        let media = MediaFields {
            file_data: Some("data:application/pdf;base64,AAAA".into()),
            file_name: Some("syllabus.pdf".into()),
            file_type: Some("application/pdf".into()),
            file_category: Some("document".into()),
            voice_data: None,
            voice_duration: Some(3.0),
        };

        let (attachment, voice) = split_media(&media);
        let attachment = attachment.expect("file present");
        assert_eq!(attachment.name.as_deref(), Some("syllabus.pdf"));
        assert!(voice.is_none());

        let joined = join_media(Some(&attachment), None);
        assert_eq!(joined.file_category.as_deref(), Some("document"));
        assert!(joined.voice_duration.is_none());
    }

    #[test]
    fn empty_payloads_are_not_attachments() {
        let media = MediaFields {
            file_data: Some(String::new()),
            voice_data: Some(String::new()),
            ..Default::default()
        };
        let (attachment, voice) = split_media(&media);
        assert!(attachment.is_none());
        assert!(voice.is_none());
    }
}
