use crate::Database;
use crate::models::{get_enum, get_ts, get_uuid, ts};
use anyhow::Result;
use chrono::{DateTime, Utc};
use kindred_types::models::{Interaction, SwipeAction};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

impl Database {
    // -- Interactions --

    /// Record a swipe without touching the match store. Used for passes.
    pub fn record_interaction(
        &self,
        actor: Uuid,
        target: Uuid,
        action: SwipeAction,
        now: DateTime<Utc>,
    ) -> Result<Interaction> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let interaction = replace_interaction(&tx, actor, target, action, now)?;
            tx.commit()?;
            Ok(interaction)
        })
    }

    pub fn get_interaction(&self, actor: Uuid, target: Uuid) -> Result<Option<Interaction>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, actor_id, target_id, action, created_at
                       FROM interactions WHERE actor_id = ?1 AND target_id = ?2",
                    params![actor.to_string(), target.to_string()],
                    |row| {
                        Ok(Interaction {
                            id: get_uuid(row, 0)?,
                            actor_id: get_uuid(row, 1)?,
                            target_id: get_uuid(row, 2)?,
                            action: get_enum(row, 3)?,
                            created_at: get_ts(row, 4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

/// Change of heart: any earlier swipe on the same target is deleted first.
/// Only the actor's first like of a target counts toward its popularity.
pub(crate) fn replace_interaction(
    conn: &Connection,
    actor: Uuid,
    target: Uuid,
    action: SwipeAction,
    now: DateTime<Utc>,
) -> Result<Interaction> {
    let interaction = Interaction {
        id: Uuid::new_v4(),
        actor_id: actor,
        target_id: target,
        action,
        created_at: now,
    };

    conn.execute(
        "DELETE FROM interactions WHERE actor_id = ?1 AND target_id = ?2",
        params![actor.to_string(), target.to_string()],
    )?;
    conn.execute(
        "INSERT INTO interactions (id, actor_id, target_id, action, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            interaction.id.to_string(),
            actor.to_string(),
            target.to_string(),
            action.as_str(),
            ts(&now),
        ],
    )?;

    if action.is_like() {
        let first_like = conn.execute(
            "INSERT OR IGNORE INTO popularity_credits (actor_id, target_id) VALUES (?1, ?2)",
            params![actor.to_string(), target.to_string()],
        )? > 0;
        if first_like {
            Database::bump_popularity(conn, target)?;
        }
    }
    Ok(interaction)
}
