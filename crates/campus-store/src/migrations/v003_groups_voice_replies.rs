use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Voice notes and reply threading on direct messages.
-- reply_to_id deliberately has no foreign key: deleting the referenced
-- message must leave the id in place so it resolves to a null preview.
ALTER TABLE messages ADD COLUMN voice_data TEXT;
ALTER TABLE messages ADD COLUMN voice_duration REAL;
ALTER TABLE messages ADD COLUMN reply_to_id INTEGER;

-- Group messages
CREATE TABLE IF NOT EXISTS group_messages (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id       INTEGER NOT NULL,
    sender_id      INTEGER NOT NULL,
    content        TEXT,
    file_data      TEXT,
    file_name      TEXT,
    file_type      TEXT,
    file_category  TEXT,
    voice_data     TEXT,
    voice_duration REAL,
    reply_to_id    INTEGER,
    timestamp      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_messages_group_ts
    ON group_messages(group_id, timestamp);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
