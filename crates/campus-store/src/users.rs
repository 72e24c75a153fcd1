use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use campus_shared::types::UserId;

use crate::database::{parse_timestamp, Database};
use crate::error::{not_found, Result};
use crate::models::User;

impl Database {
    /// Create a user row. Account management lives outside the messaging
    /// core; this exists for provisioning and tests.
    pub fn insert_user(
        &self,
        display_name: &str,
        email: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO users (email, display_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![email, display_name, avatar_url, now.to_rfc3339()],
        )?;

        Ok(User {
            id: UserId(self.conn().last_insert_rowid()),
            email: email.map(str::to_string),
            display_name: display_name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            created_at: now,
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, email, display_name, avatar_url, created_at
                 FROM users WHERE id = ?1",
                params![id.0],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Like [`get_user`](Self::get_user) but maps a missing row to `None`.
    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, email, display_name, avatar_url, created_at
                 FROM users WHERE id = ?1",
                params![id.0],
                row_to_user,
            )
            .optional()?)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let ts_str: String = row.get(4)?;
    Ok(User {
        id: UserId(row.get(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: parse_timestamp(4, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn insert_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .insert_user("Ada", Some("ada@campus.edu"), Some("/avatars/ada.png"))
            .unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert_eq!(fetched.display_name, "Ada");
        assert_eq!(fetched.avatar_url.as_deref(), Some("/avatars/ada.png"));
    }

    #[test]
    fn missing_user() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user(UserId(42)), Err(StoreError::NotFound)));
        assert!(db.find_user(UserId(42)).unwrap().is_none());
    }
}
