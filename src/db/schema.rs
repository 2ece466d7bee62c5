pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    image_url TEXT,
    is_online INTEGER NOT NULL DEFAULT 0,
    last_seen_at INTEGER
);

CREATE TABLE IF NOT EXISTS room (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT,
    is_group INTEGER NOT NULL DEFAULT 0,
    is_private INTEGER NOT NULL DEFAULT 0,
    image_url TEXT,
    created_by TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    deleted_at INTEGER
);

CREATE TABLE IF NOT EXISTS membership (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    joined_at INTEGER NOT NULL,
    leave_at INTEGER,
    join_approved INTEGER NOT NULL DEFAULT 1,
    added_by TEXT,
    removed_by TEXT,
    FOREIGN KEY (room_id) REFERENCES room(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_membership_active
    ON membership(room_id, user_id) WHERE leave_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_membership_user ON membership(user_id);

CREATE TABLE IF NOT EXISTS message (
    id TEXT PRIMARY KEY NOT NULL,
    room_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    text TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'user',
    reply_to_id TEXT,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (room_id) REFERENCES room(id),
    FOREIGN KEY (reply_to_id) REFERENCES message(id)
);

CREATE INDEX IF NOT EXISTS idx_message_room ON message(room_id, created_at);

CREATE TABLE IF NOT EXISTS read_receipt (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    read_at INTEGER NOT NULL,
    UNIQUE(message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES message(id)
);

CREATE INDEX IF NOT EXISTS idx_read_receipt_user ON read_receipt(user_id);
"#;
