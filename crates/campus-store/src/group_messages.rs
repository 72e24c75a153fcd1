use chrono::Utc;
use rusqlite::params;

use campus_shared::types::{GroupId, MessageId, UserId};

use crate::database::{parse_timestamp, Database};
use crate::error::{not_found, Result};
use crate::models::{Attachment, DeleteOutcome, GroupMessage, GroupMessageDraft, VoiceNote};

const SELECT_COLUMNS: &str = "SELECT id, group_id, sender_id, content,
        file_data, file_name, file_type, file_category,
        voice_data, voice_duration, reply_to_id, timestamp
     FROM group_messages";

impl Database {
    pub fn insert_group_message(&self, draft: &GroupMessageDraft) -> Result<GroupMessage> {
        let timestamp = Utc::now();
        let attachment = draft.attachment.as_ref();
        let voice = draft.voice.as_ref();

        self.conn().execute(
            "INSERT INTO group_messages (group_id, sender_id, content,
                 file_data, file_name, file_type, file_category,
                 voice_data, voice_duration, reply_to_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                draft.group_id.0,
                draft.sender_id.0,
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

        Ok(GroupMessage {
            id: MessageId(self.conn().last_insert_rowid()),
            group_id: draft.group_id,
            sender_id: draft.sender_id,
            content: draft.content.clone(),
            attachment: draft.attachment.clone(),
            voice: draft.voice.clone(),
            reply_to_id: draft.reply_to_id,
            timestamp,
        })
    }

    pub fn get_group_message(&self, id: MessageId) -> Result<GroupMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.0],
                row_to_group_message,
            )
            .map_err(not_found)
    }

    /// All messages of a group, oldest first.
    pub fn get_group_messages(&self, group_id: GroupId) -> Result<Vec<GroupMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE group_id = ?1 ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![group_id.0], row_to_group_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete a group message if `requester` is its sender.
    pub fn delete_group_message(
        &self,
        id: MessageId,
        requester: UserId,
    ) -> Result<DeleteOutcome> {
        let tx = self.conn().unchecked_transaction()?;

        let sender: Option<i64> = match tx.query_row(
            "SELECT sender_id FROM group_messages WHERE id = ?1",
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
                tx.execute("DELETE FROM group_messages WHERE id = ?1", params![id.0])?;
                DeleteOutcome::Deleted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}

fn row_to_group_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessage> {
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

    Ok(GroupMessage {
        id: MessageId(row.get(0)?),
        group_id: GroupId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        content: row.get(3)?,
        attachment,
        voice,
        reply_to_id: reply_to_id.map(MessageId),
        timestamp: parse_timestamp(11, &ts_str)?,
    })
}
