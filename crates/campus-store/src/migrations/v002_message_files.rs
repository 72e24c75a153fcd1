use rusqlite::Connection;

const UP_SQL: &str = r#"
-- File attachments on direct messages (opaque payload, usually a data URL)
ALTER TABLE messages ADD COLUMN file_data TEXT;
ALTER TABLE messages ADD COLUMN file_name TEXT;
ALTER TABLE messages ADD COLUMN file_type TEXT;        -- MIME type
ALTER TABLE messages ADD COLUMN file_category TEXT;    -- image / document / ...
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
