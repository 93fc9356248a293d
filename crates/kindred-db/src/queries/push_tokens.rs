use crate::Database;
use crate::models::ts;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

impl Database {
    // -- Push tokens --

    /// A token belongs to one device; re-registering moves it to the new owner.
    pub fn add_push_token(&self, user_id: Uuid, token: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id",
                params![token, user_id.to_string(), ts(&at)],
            )?;
            Ok(())
        })
    }

    /// Tokens for users who still have push turned on.
    pub fn push_tokens_for(&self, user_id: Uuid) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.token FROM push_tokens t
                   JOIN users u ON u.id = t.user_id
                  WHERE t.user_id = ?1 AND u.push_enabled = 1
                  ORDER BY t.created_at",
            )?;
            let tokens = stmt
                .query_map([user_id.to_string()], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(tokens)
        })
    }

    pub fn remove_push_token(&self, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM push_tokens WHERE token = ?1", [token])?;
            Ok(changed > 0)
        })
    }
}
