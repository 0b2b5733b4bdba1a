use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Groups and membership

CREATE TABLE groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    visibility INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE participants (
    group_id TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    joined_at TEXT NOT NULL,
    notify INTEGER NOT NULL DEFAULT 1,
    role TEXT NOT NULL DEFAULT 'member',
    PRIMARY KEY (group_id, account_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX idx_participants_account ON participants(account_id);
",
        ),
        M::up(
            "-- Migration 2: Messages (two projections) and notifications

-- Same row written twice: one projection is scanned by group, the other by author.
CREATE TABLE messages_by_group (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    sender_id INTEGER NOT NULL,
    sender_name TEXT NOT NULL,
    group_name TEXT NOT NULL,
    content TEXT NOT NULL,
    type TEXT NOT NULL
);
CREATE INDEX idx_messages_by_group ON messages_by_group(group_id, created_at);

CREATE TABLE messages_by_account (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    group_id TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    group_name TEXT NOT NULL,
    content TEXT NOT NULL,
    type TEXT NOT NULL
);
CREATE INDEX idx_messages_by_account ON messages_by_account(sender_id, created_at);

CREATE TABLE notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    group_id TEXT NOT NULL,
    sender_id INTEGER NOT NULL,
    content TEXT NOT NULL
);
CREATE INDEX idx_notifications_recipient ON notifications(recipient_id, type, created_at);

CREATE TABLE notification_seen (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    group_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    seen_at TEXT NOT NULL
);
CREATE INDEX idx_notification_seen_account ON notification_seen(account_id, type, group_id);
",
        ),
    ])
}
