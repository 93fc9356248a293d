use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                          TEXT PRIMARY KEY,
            display_name                TEXT,
            age                         INTEGER,
            gender                      TEXT,
            gender_preference           TEXT,
            relationship_expectations   TEXT,
            interests                   TEXT NOT NULL DEFAULT '[]',
            photos                      TEXT NOT NULL DEFAULT '[]',
            bio                         TEXT,
            occupation                  TEXT,
            onboarding_completed        INTEGER NOT NULL DEFAULT 0,
            popularity                  REAL NOT NULL DEFAULT 0,
            is_verified                 INTEGER NOT NULL DEFAULT 0,
            is_premium                  INTEGER NOT NULL DEFAULT 0,
            connect_now_enabled         INTEGER NOT NULL DEFAULT 0,
            show_exact_distance         INTEGER NOT NULL DEFAULT 1,
            push_enabled                INTEGER NOT NULL DEFAULT 1,
            last_lat                    REAL,
            last_lon                    REAL,
            location_updated_at         TEXT,
            email                       TEXT,
            phone                       TEXT,
            google_id                   TEXT,
            apple_id                    TEXT,
            created_at                  TEXT NOT NULL
        );

        -- Sparse: users who never shared a location are not indexed
        CREATE INDEX IF NOT EXISTS idx_users_location
            ON users(last_lat, last_lon)
            WHERE last_lat IS NOT NULL AND last_lon IS NOT NULL;

        CREATE TABLE IF NOT EXISTS interactions (
            id          TEXT PRIMARY KEY,
            actor_id    TEXT NOT NULL REFERENCES users(id),
            target_id   TEXT NOT NULL REFERENCES users(id),
            action      TEXT NOT NULL CHECK (action IN ('LIKE', 'PASS', 'SUPERLIKE')),
            created_at  TEXT NOT NULL,
            UNIQUE(actor_id, target_id)
        );

        -- A target's popularity rises once per liker, however often they re-like
        CREATE TABLE IF NOT EXISTS popularity_credits (
            actor_id    TEXT NOT NULL REFERENCES users(id),
            target_id   TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (actor_id, target_id)
        );

        CREATE TABLE IF NOT EXISTS matches (
            id              TEXT PRIMARY KEY,
            user1_id        TEXT NOT NULL REFERENCES users(id),
            user2_id        TEXT NOT NULL REFERENCES users(id),
            status          TEXT NOT NULL CHECK (status IN ('pending', 'active', 'unmatched')),
            initiator_id    TEXT NOT NULL,
            user1_liked     INTEGER NOT NULL DEFAULT 0,
            user2_liked     INTEGER NOT NULL DEFAULT 0,
            last_message_at TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(user1_id, user2_id),
            CHECK (user1_id < user2_id)
        );

        CREATE INDEX IF NOT EXISTS idx_matches_user2
            ON matches(user2_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                      TEXT PRIMARY KEY,
            conversation_id         TEXT NOT NULL,
            sender_id               TEXT NOT NULL REFERENCES users(id),
            receiver_id             TEXT NOT NULL REFERENCES users(id),
            kind                    TEXT NOT NULL,
            content                 TEXT,
            media                   TEXT,
            reply_to_id             TEXT,
            status                  TEXT NOT NULL DEFAULT 'sent',
            is_pinned               INTEGER NOT NULL DEFAULT 0,
            pinned_by               TEXT,
            deleted_for_everyone    INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL,
            delivered_at            TEXT,
            read_at                 TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, status);

        CREATE TABLE IF NOT EXISTS message_stars (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS message_hidden (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS push_tokens (
            token       TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_push_tokens_user
            ON push_tokens(user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

/// Clear half-set or out-of-range coordinates so they read as "no location".
pub fn repair_malformed_locations(conn: &Connection) -> Result<usize> {
    let repaired = conn.execute(
        "UPDATE users
            SET last_lat = NULL, last_lon = NULL, location_updated_at = NULL
          WHERE (last_lat IS NULL) <> (last_lon IS NULL)
             OR (last_lat IS NOT NULL
                 AND (last_lat < -90 OR last_lat > 90 OR last_lon < -180 OR last_lon > 180))",
        [],
    )?;

    if repaired > 0 {
        warn!("Cleared {} malformed user locations", repaired);
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_clears_half_set_locations() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute_batch(
            "
            INSERT INTO users (id, last_lat, last_lon, created_at) VALUES ('a', 10.0, NULL, 'x');
            INSERT INTO users (id, last_lat, last_lon, created_at) VALUES ('b', 95.0, 10.0, 'x');
            INSERT INTO users (id, last_lat, last_lon, created_at) VALUES ('c', 45.0, 10.0, 'x');
            INSERT INTO users (id, created_at) VALUES ('d', 'x');
            ",
        )
        .unwrap();

        assert_eq!(repair_malformed_locations(&conn).unwrap(), 2);

        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE last_lat IS NOT NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kept, 1);
        assert_eq!(repair_malformed_locations(&conn).unwrap(), 0);
    }
}
