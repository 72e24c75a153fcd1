//! Validates, persists and fans out chat events.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use campus_shared::protocol::{
    check_has_content, MediaFields, NewGroupMessage, NewMessage, ServerEvent,
};
use campus_shared::types::{ChatType, GroupId, MessageId, RoomKey, UserId};
use campus_store::{split_media, DeleteOutcome, DirectMessageDraft, GroupMessageDraft};

use crate::error::ServerError;
use crate::rooms::RoomRegistry;
use crate::store::{run_blocking, MessageStore, UserDirectory};

/// A direct message as received from a client.
#[derive(Debug, Clone)]
pub struct DirectSend {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub room: RoomKey,
    pub text: Option<String>,
    pub media: MediaFields,
    pub reply_to_id: Option<MessageId>,
}

/// A group message as received from a client.
#[derive(Debug, Clone)]
pub struct GroupSend {
    pub sender_id: UserId,
    pub group_id: GroupId,
    pub text: Option<String>,
    pub media: MediaFields,
    pub reply_to_id: Option<MessageId>,
}

pub struct MessageBroadcaster {
    registry: Arc<RoomRegistry>,
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    store_timeout: Duration,
    max_attachment_bytes: usize,
}

impl MessageBroadcaster {
    pub fn new(
        registry: Arc<RoomRegistry>,
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        store_timeout: Duration,
        max_attachment_bytes: usize,
    ) -> Self {
        Self {
            registry,
            store,
            users,
            store_timeout,
            max_attachment_bytes,
        }
    }

    /// Persist a direct message, then broadcast `new_message` to its room.
    ///
    /// Nothing is broadcast unless the row was committed. The reply target
    /// is stored as given.
    pub async fn send_direct(&self, msg: DirectSend) -> Result<NewMessage, ServerError> {
        check_has_content(msg.text.as_deref(), &msg.media)?;
        msg.media.check_size(self.max_attachment_bytes)?;

        let (attachment, voice) = split_media(&msg.media);
        let draft = DirectMessageDraft {
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            content: non_empty(msg.text),
            attachment,
            voice,
            reply_to_id: msg.reply_to_id,
        };

        let store = Arc::clone(&self.store);
        let stored = run_blocking(self.store_timeout, move || store.insert_direct(&draft))
            .await
            .inspect_err(|e| {
                warn!(sender = %msg.sender_id, error = %e, "Failed to persist direct message");
            })?;

        let event = NewMessage {
            id: stored.id,
            from: stored.sender_id,
            to: stored.receiver_id,
            room: msg.room.clone(),
            text: stored.content.clone(),
            media: stored.media(),
            reply_to_id: stored.reply_to_id,
            timestamp: stored.timestamp,
        };

        let recipients = self
            .registry
            .broadcast(&msg.room, &ServerEvent::NewMessage(event.clone()))
            .await;
        info!(
            id = %event.id,
            from = %event.from,
            to = %event.to,
            room = %msg.room,
            recipients,
            "Direct message sent"
        );
        Ok(event)
    }

    /// Persist a group message, then broadcast `new_group_message` to the
    /// group's room with the sender's name and avatar attached.
    pub async fn send_group(&self, msg: GroupSend) -> Result<NewGroupMessage, ServerError> {
        check_has_content(msg.text.as_deref(), &msg.media)?;
        msg.media.check_size(self.max_attachment_bytes)?;

        let (attachment, voice) = split_media(&msg.media);
        let draft = GroupMessageDraft {
            group_id: msg.group_id,
            sender_id: msg.sender_id,
            content: non_empty(msg.text),
            attachment,
            voice,
            reply_to_id: msg.reply_to_id,
        };

        let store = Arc::clone(&self.store);
        let stored = run_blocking(self.store_timeout, move || store.insert_group(&draft))
            .await
            .inspect_err(|e| {
                warn!(sender = %msg.sender_id, group = %msg.group_id, error = %e, "Failed to persist group message");
            })?;

        // The row is committed; a failed lookup only costs the denormalized
        // sender fields.
        let users = Arc::clone(&self.users);
        let sender_id = stored.sender_id;
        let sender = match run_blocking(self.store_timeout, move || users.find_user(sender_id)).await {
            Ok(user) => user,
            Err(e) => {
                warn!(sender = %sender_id, error = %e, "Sender lookup failed");
                None
            }
        };

        let event = NewGroupMessage {
            id: stored.id,
            group_id: stored.group_id,
            sender_id: stored.sender_id,
            sender_name: sender.as_ref().map(|u| u.display_name.clone()),
            sender_avatar: sender.and_then(|u| u.avatar_url),
            message: stored.content.clone(),
            media: stored.media(),
            reply_to_id: stored.reply_to_id,
            timestamp: stored.timestamp,
        };

        let room = RoomKey::group(msg.group_id);
        let recipients = self
            .registry
            .broadcast(&room, &ServerEvent::NewGroupMessage(event.clone()))
            .await;
        info!(
            id = %event.id,
            group = %event.group_id,
            sender = %event.sender_id,
            recipients,
            "Group message sent"
        );
        Ok(event)
    }

    /// Delete a direct message owned by `requester` and announce it in `room`.
    pub async fn delete_direct(
        &self,
        message_id: MessageId,
        requester: UserId,
        room: &RoomKey,
    ) -> Result<(), ServerError> {
        let store = Arc::clone(&self.store);
        let outcome = run_blocking(self.store_timeout, move || {
            store.delete_direct(message_id, requester)
        })
        .await?;
        check_outcome(outcome, message_id, requester)?;

        self.announce_delete(room, message_id, ChatType::Dm).await;
        Ok(())
    }

    /// Delete a group message owned by `requester` and announce it to the group.
    pub async fn delete_group(
        &self,
        message_id: MessageId,
        requester: UserId,
        group_id: GroupId,
    ) -> Result<(), ServerError> {
        let store = Arc::clone(&self.store);
        let outcome = run_blocking(self.store_timeout, move || {
            store.delete_group(message_id, requester)
        })
        .await?;
        check_outcome(outcome, message_id, requester)?;

        self.announce_delete(&RoomKey::group(group_id), message_id, ChatType::Group)
            .await;
        Ok(())
    }

    async fn announce_delete(&self, room: &RoomKey, message_id: MessageId, chat_type: ChatType) {
        let event = ServerEvent::MessageDeleted {
            message_id,
            chat_type,
        };
        let recipients = self.registry.broadcast(room, &event).await;
        info!(id = %message_id, ?chat_type, room = %room, recipients, "Message deleted");
    }
}

fn check_outcome(
    outcome: DeleteOutcome,
    message_id: MessageId,
    requester: UserId,
) -> Result<(), ServerError> {
    match outcome {
        DeleteOutcome::Deleted => Ok(()),
        DeleteOutcome::NotFound => Err(ServerError::NotFound(format!("message {message_id}"))),
        DeleteOutcome::NotOwner => {
            warn!(id = %message_id, requester = %requester, "Delete refused, not the sender");
            Err(ServerError::Forbidden(
                "Only the sender can delete a message".into(),
            ))
        }
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}
