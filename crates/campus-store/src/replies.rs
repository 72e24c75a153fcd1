//! History reads with reply-preview resolution.
//!
//! A reply keeps its `reply_to_id` forever; if the referenced message has
//! since been deleted the preview resolves to `None` rather than an error.

use std::collections::HashMap;

use campus_shared::types::{GroupId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    DirectHistoryEntry, GroupHistoryEntry, GroupMessage, ReplyPreview, User,
};

impl Database {
    /// Preview of the direct message `reply_to_id`, or `None` if it is gone
    /// or belongs to a conversation other than `a` and `b`'s.
    fn direct_reply_preview(
        &self,
        a: UserId,
        b: UserId,
        reply_to_id: MessageId,
    ) -> Result<Option<ReplyPreview>> {
        let target = match self.get_direct_message(reply_to_id) {
            Ok(message) if same_pair((message.sender_id, message.receiver_id), (a, b)) => message,
            Ok(_) | Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let sender = self.find_user(target.sender_id)?;

        Ok(Some(ReplyPreview {
            id: target.id,
            text: target.content,
            sender_name: sender.map(|u| u.display_name),
            has_voice: target.voice.is_some(),
            has_file: target.attachment.is_some(),
        }))
    }

    /// Conversation between `a` and `b` with reply previews attached.
    pub fn conversation_with_replies(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<DirectHistoryEntry>> {
        let messages = self.get_conversation(a, b)?;

        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            let reply_preview = match message.reply_to_id {
                Some(id) => self.direct_reply_preview(a, b, id)?,
                None => None,
            };
            entries.push(DirectHistoryEntry {
                message,
                reply_preview,
            });
        }
        Ok(entries)
    }

    /// Group history with sender names and reply previews attached.
    ///
    /// Previews only resolve against this group's own messages. Senders are
    /// looked up once per distinct id.
    pub fn group_history_with_replies(&self, group_id: GroupId) -> Result<Vec<GroupHistoryEntry>> {
        let messages = self.get_group_messages(group_id)?;
        let by_id: HashMap<MessageId, &GroupMessage> =
            messages.iter().map(|m| (m.id, m)).collect();

        let mut senders: HashMap<UserId, Option<User>> = HashMap::new();
        for message in &messages {
            if !senders.contains_key(&message.sender_id) {
                let user = self.find_user(message.sender_id)?;
                senders.insert(message.sender_id, user);
            }
        }

        let mut entries = Vec::with_capacity(messages.len());
        for message in &messages {
            let sender = senders.get(&message.sender_id).and_then(Option::as_ref);
            let reply_preview = message.reply_to_id.and_then(|id| by_id.get(&id)).map(|target| {
                let target_sender = senders.get(&target.sender_id).and_then(Option::as_ref);
                group_preview(target, target_sender)
            });

            entries.push(GroupHistoryEntry {
                message: message.clone(),
                sender_name: sender.map(|u| u.display_name.clone()),
                sender_avatar: sender.and_then(|u| u.avatar_url.clone()),
                reply_preview,
            });
        }
        Ok(entries)
    }
}

fn same_pair(x: (UserId, UserId), y: (UserId, UserId)) -> bool {
    x == y || x == (y.1, y.0)
}

fn group_preview(target: &GroupMessage, sender: Option<&User>) -> ReplyPreview {
    ReplyPreview {
        id: target.id,
        text: target.content.clone(),
        sender_name: sender.map(|u| u.display_name.clone()),
        has_voice: target.voice.is_some(),
        has_file: target.attachment.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Attachment, DeleteOutcome, DirectMessageDraft, GroupMessageDraft, VoiceNote,
    };

    fn direct(sender: UserId, receiver: UserId, text: &str, reply: Option<MessageId>) -> DirectMessageDraft {
        DirectMessageDraft {
            sender_id: sender,
            receiver_id: receiver,
            content: Some(text.to_string()),
            attachment: None,
            voice: None,
            reply_to_id: reply,
        }
    }

    #[test]
    fn reply_preview_resolves_sender_and_flags() {
        let db = Database::open_in_memory().unwrap();
        let ada = db.insert_user("Ada", None, None).unwrap();
        let bob = db.insert_user("Bob", None, None).unwrap();

        let mut original = direct(ada.id, bob.id, "lecture moved", None);
        original.voice = Some(VoiceNote {
            data: "data:audio/webm;base64,AAAA".into(),
            duration: Some(3.0),
        });
        let original = db.insert_direct_message(&original).unwrap();
        db.insert_direct_message(&direct(bob.id, ada.id, "thanks", Some(original.id)))
            .unwrap();

        let history = db.conversation_with_replies(ada.id, bob.id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].reply_preview.is_none());

        let preview = history[1].reply_preview.as_ref().expect("preview");
        assert_eq!(preview.id, original.id);
        assert_eq!(preview.text.as_deref(), Some("lecture moved"));
        assert_eq!(preview.sender_name.as_deref(), Some("Ada"));
        assert!(preview.has_voice);
        assert!(!preview.has_file);
    }

    #[test]
    fn reply_to_deleted_message_resolves_to_none() {
        let db = Database::open_in_memory().unwrap();
        let ada = db.insert_user("Ada", None, None).unwrap();
        let bob = db.insert_user("Bob", None, None).unwrap();

        let original = db
            .insert_direct_message(&direct(ada.id, bob.id, "oops", None))
            .unwrap();
        let reply = db
            .insert_direct_message(&direct(bob.id, ada.id, "what?", Some(original.id)))
            .unwrap();

        assert_eq!(
            db.delete_direct_message(original.id, ada.id).unwrap(),
            DeleteOutcome::Deleted
        );

        let history = db.conversation_with_replies(ada.id, bob.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message.id, reply.id);
        assert_eq!(history[0].message.reply_to_id, Some(original.id));
        assert!(history[0].reply_preview.is_none());
    }

    #[test]
    fn reply_into_another_conversation_has_no_preview() {
        let db = Database::open_in_memory().unwrap();
        let ada = db.insert_user("Ada", None, None).unwrap();
        let bob = db.insert_user("Bob", None, None).unwrap();
        let cy = db.insert_user("Cy", None, None).unwrap();
        let dee = db.insert_user("Dee", None, None).unwrap();

        let private = db
            .insert_direct_message(&direct(cy.id, dee.id, "between us", None))
            .unwrap();
        db.insert_direct_message(&direct(ada.id, bob.id, "look", Some(private.id)))
            .unwrap();

        let history = db.conversation_with_replies(ada.id, bob.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message.reply_to_id, Some(private.id));
        assert!(history[0].reply_preview.is_none());

        // Still resolves inside its own conversation, in either direction.
        db.insert_direct_message(&direct(dee.id, cy.id, "ok", Some(private.id)))
            .unwrap();
        let history = db.conversation_with_replies(dee.id, cy.id).unwrap();
        let preview = history[1].reply_preview.as_ref().expect("same-pair preview");
        assert_eq!(preview.text.as_deref(), Some("between us"));
        assert_eq!(preview.sender_name.as_deref(), Some("Cy"));
    }

    #[test]
    fn group_preview_stays_within_group() {
        let db = Database::open_in_memory().unwrap();
        let ada = db.insert_user("Ada", None, Some("/a.png")).unwrap();

        let other = db
            .insert_group_message(&GroupMessageDraft {
                group_id: GroupId(2),
                sender_id: ada.id,
                content: Some("elsewhere".into()),
                attachment: None,
                voice: None,
                reply_to_id: None,
            })
            .unwrap();
        let target = db
            .insert_group_message(&GroupMessageDraft {
                group_id: GroupId(1),
                sender_id: ada.id,
                content: None,
                attachment: Some(Attachment {
                    data: "data:application/pdf;base64,AAAA".into(),
                    name: Some("hw.pdf".into()),
                    mime_type: Some("application/pdf".into()),
                    category: Some("document".into()),
                }),
                voice: None,
                reply_to_id: None,
            })
            .unwrap();
        for reply_to in [other.id, target.id] {
            db.insert_group_message(&GroupMessageDraft {
                group_id: GroupId(1),
                sender_id: ada.id,
                content: Some("re".into()),
                attachment: None,
                voice: None,
                reply_to_id: Some(reply_to),
            })
            .unwrap();
        }

        let history = db.group_history_with_replies(GroupId(1)).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[1].reply_preview.is_none());

        let preview = history[2].reply_preview.as_ref().expect("same-group preview");
        assert_eq!(preview.id, target.id);
        assert!(preview.has_file);
        assert_eq!(preview.sender_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn group_history_denormalizes_senders() {
        let db = Database::open_in_memory().unwrap();
        let ada = db.insert_user("Ada", None, Some("/a.png")).unwrap();
        let bob = db.insert_user("Bob", None, None).unwrap();

        let first = db
            .insert_group_message(&GroupMessageDraft {
                group_id: GroupId(1),
                sender_id: ada.id,
                content: Some("quiz friday".into()),
                attachment: None,
                voice: None,
                reply_to_id: None,
            })
            .unwrap();
        db.insert_group_message(&GroupMessageDraft {
            group_id: GroupId(1),
            sender_id: bob.id,
            content: Some("which chapters?".into()),
            attachment: None,
            voice: None,
            reply_to_id: Some(first.id),
        })
        .unwrap();

        let history = db.group_history_with_replies(GroupId(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender_name.as_deref(), Some("Ada"));
        assert_eq!(history[0].sender_avatar.as_deref(), Some("/a.png"));
        let preview = history[1].reply_preview.as_ref().unwrap();
        assert_eq!(preview.text.as_deref(), Some("quiz friday"));
        assert_eq!(preview.sender_name.as_deref(), Some("Ada"));
    }
}
