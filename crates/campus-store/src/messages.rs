use chrono::Utc;
use rusqlite::params;

use campus_shared::types::{MessageId, UserId};

use crate::database::{parse_timestamp, Database};
use crate::error::{not_found, Result};
use crate::models::{Attachment, DeleteOutcome, DirectMessage, DirectMessageDraft, VoiceNote};

const SELECT_COLUMNS: &str = "SELECT id, sender_id, receiver_id, content,
        file_data, file_name, file_type, file_category,
        voice_data, voice_duration, reply_to_id, timestamp
     FROM messages";

impl Database {
    /// Persist a direct message and return it with its assigned id and
    /// timestamp.
    pub fn insert_direct_message(&self, draft: &DirectMessageDraft) -> Result<DirectMessage> {
        let timestamp = Utc::now();
        let attachment = draft.attachment.as_ref();
        let voice = draft.voice.as_ref();

        self.conn().execute(
            "INSERT INTO messages (sender_id, receiver_id, content,
                 file_data, file_name, file_type, file_category,
                 voice_data, voice_duration, reply_to_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                draft.sender_id.0,
                draft.receiver_id.0,
                draft.content,
                attachment.map(|a| &a.data),
                attachment.and_then(|a| a.name.as_ref()),
                attachment.and_then(|a| a.mime_type.as_ref()),
                attachment.and_then(|a| a.category.as_ref()),
                voice.map(|v| &v.data),
                voice.and_then(|v| v.duration),
                draft.reply_to_id.map(|id| id.0),
                timestamp.to_rfc3339(),
            ],
        )?;

        Ok(DirectMessage {
            id: MessageId(self.conn().last_insert_rowid()),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content.clone(),
            attachment: draft.attachment.clone(),
            voice: draft.voice.clone(),
            reply_to_id: draft.reply_to_id,
            timestamp,
        })
    }

    pub fn get_direct_message(&self, id: MessageId) -> Result<DirectMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.0],
                row_to_direct_message,
            )
            .map_err(not_found)
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: UserId, b: UserId) -> Result<Vec<DirectMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![a.0, b.0], row_to_direct_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete a direct message if `requester` is its sender.
    ///
    /// The ownership check and the delete run in one transaction.
    pub fn delete_direct_message(
        &self,
        id: MessageId,
        requester: UserId,
    ) -> Result<DeleteOutcome> {
        let tx = self.conn().unchecked_transaction()?;

        let sender: Option<i64> = match tx.query_row(
            "SELECT sender_id FROM messages WHERE id = ?1",
            params![id.0],
            |row| row.get(0),
        ) {
            Ok(sender) => Some(sender),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let outcome = match sender {
            None => DeleteOutcome::NotFound,
            Some(sender) if sender != requester.0 => DeleteOutcome::NotOwner,
            Some(_) => {
                tx.execute("DELETE FROM messages WHERE id = ?1", params![id.0])?;
                DeleteOutcome::Deleted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}

fn row_to_direct_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessage> {
    let file_data: Option<String> = row.get(4)?;
    let voice_data: Option<String> = row.get(8)?;
    let reply_to_id: Option<i64> = row.get(10)?;
    let ts_str: String = row.get(11)?;

    let attachment = match file_data {
        Some(data) => Some(Attachment {
            data,
            name: row.get(5)?,
            mime_type: row.get(6)?,
            category: row.get(7)?,
        }),
        None => None,
    };
    let voice = match voice_data {
        Some(data) => Some(VoiceNote {
            data,
            duration: row.get(9)?,
        }),
        None => None,
    };

    Ok(DirectMessage {
        id: MessageId(row.get(0)?),
        sender_id: UserId(row.get(1)?),
        receiver_id: UserId(row.get(2)?),
        content: row.get(3)?,
        attachment,
        voice,
        reply_to_id: reply_to_id.map(MessageId),
        timestamp: parse_timestamp(11, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn draft(sender: i64, receiver: i64, text: &str) -> DirectMessageDraft {
        DirectMessageDraft {
            sender_id: UserId(sender),
            receiver_id: UserId(receiver),
            content: Some(text.to_string()),
            attachment: None,
            voice: None,
            reply_to_id: None,
        }
    }

    #[test]
    fn insert_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let mut d = draft(3, 7, "hi");
        d.voice = Some(VoiceNote {
            data: "data:audio/webm;base64,AAAA".into(),
            duration: Some(2.5),
        });
        d.reply_to_id = Some(MessageId(99));

        let stored = db.insert_direct_message(&d).unwrap();
        let fetched = db.get_direct_message(stored.id).unwrap();

        assert_eq!(fetched.sender_id, UserId(3));
        assert_eq!(fetched.content.as_deref(), Some("hi"));
        assert_eq!(fetched.voice.unwrap().duration, Some(2.5));
        assert!(fetched.attachment.is_none());
        // Dangling reply ids are stored as-is.
        assert_eq!(fetched.reply_to_id, Some(MessageId(99)));
    }

    #[test]
    fn conversation_covers_both_directions_only() {
        let db = Database::open_in_memory().unwrap();
        db.insert_direct_message(&draft(3, 7, "one")).unwrap();
        db.insert_direct_message(&draft(7, 3, "two")).unwrap();
        db.insert_direct_message(&draft(3, 8, "elsewhere")).unwrap();

        let history = db.get_conversation(UserId(7), UserId(3)).unwrap();
        let texts: Vec<_> = history.iter().filter_map(|m| m.content.as_deref()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn delete_requires_ownership() {
        let db = Database::open_in_memory().unwrap();
        let msg = db.insert_direct_message(&draft(3, 7, "mine")).unwrap();

        assert_eq!(
            db.delete_direct_message(msg.id, UserId(7)).unwrap(),
            DeleteOutcome::NotOwner
        );
        assert!(db.get_direct_message(msg.id).is_ok());

        assert_eq!(
            db.delete_direct_message(msg.id, UserId(3)).unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(matches!(
            db.get_direct_message(msg.id),
            Err(StoreError::NotFound)
        ));

        assert_eq!(
            db.delete_direct_message(msg.id, UserId(3)).unwrap(),
            DeleteOutcome::NotFound
        );
    }
}
