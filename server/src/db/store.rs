//! Persistence collaborator used by the router and the fan-out engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{
    AccountId, ChatMessage, ContentType, Group, Notification, NotificationSeenMark,
    NotificationType, Participant,
};
use super::DbPool;
use crate::error::StoreError;

/// Storage operations the gateway core depends on.
///
/// Each call either fully happens or fails with nothing committed.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, StoreError>;

    async fn check_participant(
        &self,
        account_id: AccountId,
        group_id: &str,
    ) -> Result<Option<Participant>, StoreError>;

    async fn participant_ids(&self, group_id: &str) -> Result<Vec<AccountId>, StoreError>;

    /// Write the message under both projections (by group, by account).
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    async fn append_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    async fn append_seen_mark(&self, mark: &NotificationSeenMark) -> Result<(), StoreError>;
}

/// SQLite-backed store sharing a single connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut *conn)
        })
        .await?
    }

    pub async fn create_group(&self, id: &str, name: &str) -> Result<Group, StoreError> {
        let group = Group {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            visibility: true,
            created_at: Utc::now(),
        };
        let row = group.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO groups (id, name, description, visibility, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.id, row.name, row.description, row.visibility, row.created_at],
            )?;
            Ok(())
        })
        .await?;
        tracing::debug!(group_id = %group.id, "Group created");
        Ok(group)
    }

    pub async fn add_participant(
        &self,
        group_id: &str,
        account_id: AccountId,
        role: &str,
    ) -> Result<Participant, StoreError> {
        let participant = Participant {
            group_id: group_id.to_string(),
            account_id,
            joined_at: Utc::now(),
            notify: true,
            role: role.to_string(),
        };
        let row = participant.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO participants (group_id, account_id, joined_at, notify, role)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.group_id, row.account_id, row.joined_at, row.notify, row.role],
            )?;
            Ok(())
        })
        .await?;
        Ok(participant)
    }

    /// Notifications addressed to `account_id`, newest first.
    pub async fn notifications_for(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Notification>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT recipient_id, sender_id, group_id, type, content, created_at
                 FROM notifications WHERE recipient_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([account_id], |row| {
                    Ok((
                        row.get::<_, AccountId>(0)?,
                        row.get::<_, AccountId>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, DateTime<Utc>>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(recipient_id, sender_id, group_id, kind, content, created_at)| -> Result<Notification, StoreError> {
                    Ok(Notification {
                        recipient_id,
                        sender_id,
                        group_id,
                        notification_type: kind.parse::<NotificationType>()?,
                        content,
                        created_at,
                    })
                })
                .collect()
        })
        .await
    }

    /// Messages of a group in posting order.
    pub async fn messages_in_group(&self, group_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let group_id = group_id.to_string();
        self.with_conn(move |conn| {
            read_messages(
                conn,
                "SELECT group_id, sender_id, sender_name, group_name, content, type, created_at
                 FROM messages_by_group WHERE group_id = ?1
                 ORDER BY created_at, id",
                &group_id,
            )
        })
        .await
    }

    /// Messages written by an account in posting order.
    pub async fn messages_by_sender(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_conn(move |conn| {
            read_messages(
                conn,
                "SELECT group_id, sender_id, sender_name, group_name, content, type, created_at
                 FROM messages_by_account WHERE sender_id = ?1
                 ORDER BY created_at, id",
                &account_id,
            )
        })
        .await
    }

    pub async fn seen_marks_for(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<NotificationSeenMark>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT account_id, group_id, type, created_at, seen_at
                 FROM notification_seen WHERE account_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([account_id], |row| {
                    Ok((
                        row.get::<_, AccountId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(account_id, group_id, kind, created_at, seen_at)| -> Result<NotificationSeenMark, StoreError> {
                    Ok(NotificationSeenMark {
                        account_id,
                        group_id,
                        notification_type: kind.parse::<NotificationType>()?,
                        created_at,
                        seen_at,
                    })
                })
                .collect()
        })
        .await
    }
}

fn read_messages(
    conn: &Connection,
    sql: &str,
    key: &dyn rusqlite::ToSql,
) -> Result<Vec<ChatMessage>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, AccountId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, DateTime<Utc>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(group_id, sender_id, sender_name, group_name, content, kind, created_at)| -> Result<ChatMessage, StoreError> {
                Ok(ChatMessage {
                    group_id,
                    sender_id,
                    sender_name,
                    group_name,
                    content,
                    content_type: kind.parse::<ContentType>()?,
                    created_at,
                })
            },
        )
        .collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, StoreError> {
        let group_id = group_id.to_string();
        self.with_conn(move |conn| {
            let group = conn
                .query_row(
                    "SELECT id, name, description, visibility, created_at FROM groups WHERE id = ?1",
                    [&group_id],
                    |row| {
                        Ok(Group {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            visibility: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(group)
        })
        .await
    }

    async fn check_participant(
        &self,
        account_id: AccountId,
        group_id: &str,
    ) -> Result<Option<Participant>, StoreError> {
        let group_id = group_id.to_string();
        self.with_conn(move |conn| {
            let participant = conn
                .query_row(
                    "SELECT group_id, account_id, joined_at, notify, role
                     FROM participants WHERE group_id = ?1 AND account_id = ?2",
                    params![group_id, account_id],
                    |row| {
                        Ok(Participant {
                            group_id: row.get(0)?,
                            account_id: row.get(1)?,
                            joined_at: row.get(2)?,
                            notify: row.get(3)?,
                            role: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(participant)
        })
        .await
    }

    async fn participant_ids(&self, group_id: &str) -> Result<Vec<AccountId>, StoreError> {
        let group_id = group_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT account_id FROM participants WHERE group_id = ?1 ORDER BY joined_at",
            )?;
            let ids = stmt
                .query_map([&group_id], |row| row.get::<_, AccountId>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let msg = message.clone();
        self.with_conn(move |conn| {
            // Both projections commit together or not at all.
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages_by_group
                 (group_id, created_at, sender_id, sender_name, group_name, content, type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.group_id,
                    msg.created_at,
                    msg.sender_id,
                    msg.sender_name,
                    msg.group_name,
                    msg.content,
                    msg.content_type.as_str(),
                ],
            )?;
            tx.execute(
                "INSERT INTO messages_by_account
                 (sender_id, created_at, group_id, sender_name, group_name, content, type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.sender_id,
                    msg.created_at,
                    msg.group_id,
                    msg.sender_name,
                    msg.group_name,
                    msg.content,
                    msg.content_type.as_str(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn append_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let n = notification.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO notifications
                 (recipient_id, type, created_at, group_id, sender_id, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    n.recipient_id,
                    n.notification_type.as_str(),
                    n.created_at,
                    n.group_id,
                    n.sender_id,
                    n.content,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_seen_mark(&self, mark: &NotificationSeenMark) -> Result<(), StoreError> {
        let m = mark.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO notification_seen (account_id, type, group_id, created_at, seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    m.account_id,
                    m.notification_type.as_str(),
                    m.group_id,
                    m.created_at,
                    m.seen_at,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
