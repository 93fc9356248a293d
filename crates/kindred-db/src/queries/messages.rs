use crate::Database;
use crate::models::{
    LikeOutcome, LikeTransition, get_enum, get_opt_ts, get_opt_uuid, get_ts, get_uuid, ts,
};
use crate::queries::matches::{touch_last_message, upsert_like};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use kindred_types::ids::PairKey;
use kindred_types::models::{
    DELETED_MESSAGE_MARKER, HistoryCursor, MediaRef, Message, MessageStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, kind, content, media,
    reply_to_id, status, is_pinned, pinned_by, deleted_for_everyone, created_at, delivered_at,
    read_at";

impl Database {
    // -- Messages --

    /// Persist a message and move the pair's `last_message_at` forward.
    pub fn append_message(&self, message: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_message(&tx, message)?;
            touch_pair(&tx, message)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Quick hello: the like rule with the sender as initiator plus the seed
    /// message, committed together. A closed pair gets no message.
    pub fn record_quick_hello(&self, message: &Message) -> Result<LikeOutcome> {
        self.with_conn_mut(|conn| {
            for attempt in 1..=3 {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let Some(outcome) =
                    upsert_like(&tx, message.sender_id, message.receiver_id, message.created_at)?
                else {
                    debug!(attempt, "quick hello match write lost a race, retrying");
                    continue;
                };
                if outcome.transition == LikeTransition::Closed {
                    return Ok(outcome);
                }

                insert_message(&tx, message)?;
                touch_pair(&tx, message)?;
                tx.commit()?;

                let mut outcome = outcome;
                outcome.row.last_message_at = Some(message.created_at);
                return Ok(outcome);
            }
            bail!("quick hello from {} did not settle", message.sender_id)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let Some(message) = conn
                .query_row(&sql, [id.to_string()], message_from_row)
                .optional()?
            else {
                return Ok(None);
            };
            let mut batch = [message];
            load_flags(conn, &mut batch)?;
            let [message] = batch;
            Ok(Some(message))
        })
    }

    /// `sent -> delivered`. Returns false if the message was already further along.
    pub fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'delivered', delivered_at = ?1
                  WHERE id = ?2 AND status = 'sent'",
                params![ts(&at), id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Mark everything `reader` has received in the conversation as read.
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader: Uuid,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages
                    SET status = 'read', read_at = ?1,
                        delivered_at = COALESCE(delivered_at, ?1)
                  WHERE conversation_id = ?2 AND receiver_id = ?3
                    AND status IN ('sent', 'delivered')",
                params![ts(&at), conversation_id, reader.to_string()],
            )?;
            Ok(changed)
        })
    }

    /// Pin or unpin. Pinning clears any other pin in the conversation first;
    /// the previously pinned id is returned.
    pub fn set_pinned(&self, message: &Message, actor: Uuid, pin: bool) -> Result<Option<Uuid>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut previous = None;

            if pin {
                previous = tx
                    .query_row(
                        "SELECT id FROM messages
                          WHERE conversation_id = ?1 AND is_pinned = 1 AND id <> ?2",
                        params![message.conversation_id, message.id.to_string()],
                        |row| get_uuid(row, 0),
                    )
                    .optional()?;
                tx.execute(
                    "UPDATE messages SET is_pinned = 0, pinned_by = NULL
                      WHERE conversation_id = ?1 AND is_pinned = 1 AND id <> ?2",
                    params![message.conversation_id, message.id.to_string()],
                )?;
                tx.execute(
                    "UPDATE messages SET is_pinned = 1, pinned_by = ?1 WHERE id = ?2",
                    params![actor.to_string(), message.id.to_string()],
                )?;
            } else {
                tx.execute(
                    "UPDATE messages SET is_pinned = 0, pinned_by = NULL WHERE id = ?1",
                    [message.id.to_string()],
                )?;
            }

            tx.commit()?;
            Ok(previous)
        })
    }

    /// Add or remove `user_id` from the message's star set. Returns whether
    /// the set changed.
    pub fn set_starred(&self, message_id: Uuid, user_id: Uuid, star: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = if star {
                conn.execute(
                    "INSERT OR IGNORE INTO message_stars (message_id, user_id) VALUES (?1, ?2)",
                    params![message_id.to_string(), user_id.to_string()],
                )?
            } else {
                conn.execute(
                    "DELETE FROM message_stars WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id.to_string(), user_id.to_string()],
                )?
            };
            Ok(changed > 0)
        })
    }

    /// Replace content with the deletion marker. Window and sender checks
    /// belong to the caller.
    pub fn delete_for_everyone(&self, message_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages
                    SET deleted_for_everyone = 1, content = ?1, media = NULL
                  WHERE id = ?2",
                params![DELETED_MESSAGE_MARKER, message_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn hide_for_user(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?1, ?2)",
                params![message_id.to_string(), user_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// One page of the viewer's history, returned oldest first. Messages the
    /// viewer hid are skipped unless they were deleted for everyone.
    ///
    /// Pages are keyed on (`created_at`, `id`) so messages sharing a timestamp
    /// are split across pages without loss.
    pub fn get_history(
        &self,
        conversation_id: &str,
        viewer: Uuid,
        before: Option<HistoryCursor>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                  WHERE m.conversation_id = ?1
                    AND (?2 IS NULL OR m.created_at < ?2
                         OR (m.created_at = ?2 AND m.id < ?5))
                    AND (m.deleted_for_everyone = 1 OR NOT EXISTS (
                        SELECT 1 FROM message_hidden h
                         WHERE h.message_id = m.id AND h.user_id = ?3))
                  ORDER BY m.created_at DESC, m.id DESC
                  LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![
                        conversation_id,
                        before.map(|c| ts(&c.created_at)),
                        viewer.to_string(),
                        limit,
                        before.and_then(|c| c.id).map(|id| id.to_string()),
                    ],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            load_flags(conn, &mut rows)?;
            Ok(rows)
        })
    }

    /// Unread messages addressed to `receiver` in the conversation.
    pub fn unread_count(&self, conversation_id: &str, receiver: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                  WHERE m.conversation_id = ?1 AND m.receiver_id = ?2
                    AND m.status <> 'read' AND m.deleted_for_everyone = 0
                    AND NOT EXISTS (
                        SELECT 1 FROM message_hidden h
                         WHERE h.message_id = m.id AND h.user_id = ?2)",
                params![conversation_id, receiver.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Most recent message visible to `viewer`.
    pub fn last_message(&self, conversation_id: &str, viewer: Uuid) -> Result<Option<Message>> {
        Ok(self.get_history(conversation_id, viewer, None, 1)?.pop())
    }
}

fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    let media = message.media.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, kind, content, media,
            reply_to_id, status, is_pinned, pinned_by, deleted_for_everyone, created_at,
            delivered_at, read_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            message.id.to_string(),
            message.conversation_id,
            message.sender_id.to_string(),
            message.receiver_id.to_string(),
            message.kind.as_str(),
            message.content,
            media,
            message.reply_to_id.map(|id| id.to_string()),
            message.status.as_str(),
            message.is_pinned,
            message.pinned_by.map(|id| id.to_string()),
            message.deleted_for_everyone,
            ts(&message.created_at),
            message.delivered_at.as_ref().map(ts),
            message.read_at.as_ref().map(ts),
        ],
    )?;
    Ok(())
}

fn touch_pair(conn: &Connection, message: &Message) -> Result<()> {
    let key = PairKey::new(message.sender_id, message.receiver_id);
    touch_last_message(conn, &key, message.created_at)
}

/// Batch-fetch star and hide sets for a page of messages.
fn load_flags(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut index: HashMap<Uuid, usize> = HashMap::with_capacity(messages.len());
    for (i, m) in messages.iter().enumerate() {
        index.insert(m.id, i);
    }

    for (table, starred) in [("message_stars", true), ("message_hidden", false)] {
        let sql = format!(
            "SELECT message_id, user_id FROM {table} WHERE message_id IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let pairs = stmt
            .query_map(params.as_slice(), |row| Ok((get_uuid(row, 0)?, get_uuid(row, 1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (message_id, user_id) in pairs {
            if let Some(&i) = index.get(&message_id) {
                if starred {
                    messages[i].starred_by.insert(user_id);
                } else {
                    messages[i].deleted_for.insert(user_id);
                }
            }
        }
    }
    Ok(())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let media: Option<String> = row.get(6)?;
    let media = media
        .map(|raw| serde_json::from_str::<MediaRef>(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let status: MessageStatus = get_enum(row, 8)?;

    Ok(Message {
        id: get_uuid(row, 0)?,
        conversation_id: row.get(1)?,
        sender_id: get_uuid(row, 2)?,
        receiver_id: get_uuid(row, 3)?,
        kind: get_enum(row, 4)?,
        content: row.get(5)?,
        media,
        reply_to_id: get_opt_uuid(row, 7)?,
        status,
        is_pinned: row.get(9)?,
        pinned_by: get_opt_uuid(row, 10)?,
        starred_by: Default::default(),
        deleted_for_everyone: row.get(11)?,
        deleted_for: Default::default(),
        created_at: get_ts(row, 12)?,
        delivered_at: get_opt_ts(row, 13)?,
        read_at: get_opt_ts(row, 14)?,
    })
}
