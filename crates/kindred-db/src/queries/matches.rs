use crate::Database;
use crate::models::{
    LikeOutcome, LikeTransition, RespondOutcome, get_enum, get_opt_ts, get_ts, get_uuid,
    is_unique_violation, ts,
};
use crate::queries::interactions::replace_interaction;
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use kindred_types::ids::PairKey;
use kindred_types::models::{Match, MatchStatus, SwipeAction};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;
use uuid::Uuid;

/// Bound on insert/compare-and-set retries for one like.
const MAX_UPSERT_ATTEMPTS: usize = 5;

const MATCH_COLUMNS: &str = "id, user1_id, user2_id, status, initiator_id, user1_liked,
    user2_liked, last_message_at, created_at";

impl Database {
    // -- Matches --

    /// Record a like or superlike and apply it to the pair's match.
    ///
    /// The interaction, the target's popularity and the match write share one
    /// transaction. A missing match is created by INSERT; losing that race to
    /// a concurrent writer surfaces as a unique violation and falls through to
    /// the update path, which is itself a compare-and-set on the prior flags.
    pub fn record_like(
        &self,
        actor: Uuid,
        target: Uuid,
        action: SwipeAction,
        now: DateTime<Utc>,
    ) -> Result<LikeOutcome> {
        self.with_conn_mut(|conn| {
            for attempt in 1..=MAX_UPSERT_ATTEMPTS {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                replace_interaction(&tx, actor, target, action, now)?;
                if let Some(outcome) = upsert_like(&tx, actor, target, now)? {
                    tx.commit()?;
                    return Ok(outcome);
                }
                debug!(attempt, %actor, %target, "match write lost a race, retrying");
            }
            bail!("match upsert for {actor} -> {target} did not settle")
        })
    }

    /// Accept or decline a pending match on behalf of `actor`.
    pub fn respond_to_match(
        &self,
        match_id: Uuid,
        actor: Uuid,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<RespondOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(existing) = query_match(&tx, match_id)? else {
                return Ok(RespondOutcome::Missing);
            };
            let Some(other) = existing.other_party(actor) else {
                return Ok(RespondOutcome::NotParty);
            };
            if existing.status != MatchStatus::Pending {
                return Ok(RespondOutcome::NotPending(existing));
            }
            if existing.has_liked(actor) {
                return Ok(RespondOutcome::AlreadyLiked(existing));
            }

            let outcome = if accept {
                replace_interaction(&tx, actor, other, SwipeAction::Like, now)?;
                // The immediate transaction holds the write lock, so the flags
                // read above cannot have moved.
                let Some(like) = apply_like(&tx, existing, actor)? else {
                    bail!("match {match_id} changed under a write lock");
                };
                RespondOutcome::Accepted(like)
            } else {
                tx.execute("DELETE FROM matches WHERE id = ?1", [match_id.to_string()])?;
                replace_interaction(&tx, actor, other, SwipeAction::Pass, now)?;
                RespondOutcome::Declined(existing)
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    pub fn get_match(&self, id: Uuid) -> Result<Option<Match>> {
        self.with_conn(|conn| query_match(conn, id))
    }

    pub fn get_match_by_pair(&self, key: &PairKey) -> Result<Option<Match>> {
        self.with_conn(|conn| query_match_by_pair(conn, key))
    }

    /// Pending and active matches involving `user_id`, most recent activity first.
    pub fn list_matches_for_user(&self, user_id: Uuid) -> Result<Vec<Match>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MATCH_COLUMNS} FROM matches
                  WHERE (user1_id = ?1 OR user2_id = ?1)
                    AND status IN ('pending', 'active')
                  ORDER BY COALESCE(last_message_at, created_at) DESC, created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], match_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Test and maintenance hook; no user flow enters `unmatched`.
    pub fn set_match_status(&self, id: Uuid, status: MatchStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE matches SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }
}

/// One attempt at the like rule. `None` means a concurrent writer won and
/// the caller should retry in a fresh transaction.
pub(crate) fn upsert_like(
    conn: &Connection,
    actor: Uuid,
    target: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<LikeOutcome>> {
    let key = PairKey::new(actor, target);
    let actor_is_user1 = key.is_user1(actor);
    let created = Match {
        id: Uuid::new_v4(),
        user1_id: key.user1,
        user2_id: key.user2,
        status: MatchStatus::Pending,
        initiator_id: actor,
        user1_liked: actor_is_user1,
        user2_liked: !actor_is_user1,
        last_message_at: None,
        created_at: now,
    };

    let inserted = conn.execute(
        "INSERT INTO matches (id, user1_id, user2_id, status, initiator_id, user1_liked,
            user2_liked, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7)",
        params![
            created.id.to_string(),
            created.user1_id.to_string(),
            created.user2_id.to_string(),
            actor.to_string(),
            created.user1_liked,
            created.user2_liked,
            ts(&now),
        ],
    );
    match inserted {
        Ok(_) => {
            return Ok(Some(LikeOutcome {
                row: created,
                transition: LikeTransition::Created,
            }));
        }
        Err(e) if is_unique_violation(&e) => {}
        Err(e) => return Err(e.into()),
    }

    // Declined between our insert and this read: start over.
    let Some(existing) = query_match_by_pair(conn, &key)? else {
        return Ok(None);
    };
    apply_like(conn, existing, actor)
}

fn apply_like(conn: &Connection, existing: Match, actor: Uuid) -> Result<Option<LikeOutcome>> {
    let transition = match existing.status {
        MatchStatus::Active => Some(LikeTransition::AlreadyActive),
        MatchStatus::Unmatched => Some(LikeTransition::Closed),
        MatchStatus::Pending if existing.has_liked(actor) => Some(LikeTransition::Unchanged),
        MatchStatus::Pending => None,
    };
    if let Some(transition) = transition {
        return Ok(Some(LikeOutcome {
            row: existing,
            transition,
        }));
    }

    let mut updated = existing.clone();
    if actor == updated.user1_id {
        updated.user1_liked = true;
    } else {
        updated.user2_liked = true;
    }
    let activated = updated.user1_liked && updated.user2_liked;
    if activated {
        updated.status = MatchStatus::Active;
    }

    let changed = conn.execute(
        "UPDATE matches SET user1_liked = ?1, user2_liked = ?2, status = ?3
          WHERE id = ?4 AND status = 'pending' AND user1_liked = ?5 AND user2_liked = ?6",
        params![
            updated.user1_liked,
            updated.user2_liked,
            updated.status.as_str(),
            existing.id.to_string(),
            existing.user1_liked,
            existing.user2_liked,
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }

    let transition = if activated {
        LikeTransition::Activated
    } else {
        LikeTransition::Unchanged
    };
    Ok(Some(LikeOutcome {
        row: updated,
        transition,
    }))
}

pub(crate) fn touch_last_message(
    conn: &Connection,
    key: &PairKey,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE matches SET last_message_at = ?1 WHERE user1_id = ?2 AND user2_id = ?3",
        params![ts(&at), key.user1.to_string(), key.user2.to_string()],
    )?;
    Ok(())
}

pub(crate) fn query_match(conn: &Connection, id: Uuid) -> Result<Option<Match>> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], match_from_row).optional()?)
}

pub(crate) fn query_match_by_pair(conn: &Connection, key: &PairKey) -> Result<Option<Match>> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE user1_id = ?1 AND user2_id = ?2");
    Ok(conn
        .query_row(
            &sql,
            params![key.user1.to_string(), key.user2.to_string()],
            match_from_row,
        )
        .optional()?)
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    Ok(Match {
        id: get_uuid(row, 0)?,
        user1_id: get_uuid(row, 1)?,
        user2_id: get_uuid(row, 2)?,
        status: get_enum(row, 3)?,
        initiator_id: get_uuid(row, 4)?,
        user1_liked: row.get(5)?,
        user2_liked: row.get(6)?,
        last_message_at: get_opt_ts(row, 7)?,
        created_at: get_ts(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::seeded;
    use std::sync::Arc;

    fn match_count(db: &Database) -> i64 {
        db.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM matches", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_mutual_likes_in_either_order_yield_one_active_match() {
        for reversed in [false, true] {
            let (db, ids) = seeded(2);
            let (first, second) = if reversed { (ids[1], ids[0]) } else { (ids[0], ids[1]) };
            let now = Utc::now();

            let a = db.record_like(first, second, SwipeAction::Like, now).unwrap();
            assert_eq!(a.transition, LikeTransition::Created);
            assert_eq!(a.row.initiator_id, first);
            assert!(!a.is_mutual());

            let b = db.record_like(second, first, SwipeAction::Superlike, now).unwrap();
            assert_eq!(b.transition, LikeTransition::Activated);
            assert_eq!(b.row.id, a.row.id);
            assert!(b.is_mutual());

            assert_eq!(match_count(&db), 1);
            let stored = db.get_match(a.row.id).unwrap().unwrap();
            assert_eq!(stored.status, MatchStatus::Active);
            assert!(stored.user1_liked && stored.user2_liked);
        }
    }

    #[test]
    fn test_repeat_like_and_like_after_active_are_noops() {
        let (db, ids) = seeded(2);
        let now = Utc::now();
        db.record_like(ids[0], ids[1], SwipeAction::Like, now).unwrap();
        let again = db.record_like(ids[0], ids[1], SwipeAction::Like, now).unwrap();
        assert_eq!(again.transition, LikeTransition::Unchanged);

        db.record_like(ids[1], ids[0], SwipeAction::Like, now).unwrap();
        let late = db.record_like(ids[0], ids[1], SwipeAction::Superlike, now).unwrap();
        assert_eq!(late.transition, LikeTransition::AlreadyActive);
        assert_eq!(match_count(&db), 1);
    }

    #[test]
    fn test_unmatched_is_terminal() {
        let (db, ids) = seeded(2);
        let now = Utc::now();
        let created = db.record_like(ids[0], ids[1], SwipeAction::Like, now).unwrap();
        assert!(db.set_match_status(created.row.id, MatchStatus::Unmatched).unwrap());

        let after = db.record_like(ids[1], ids[0], SwipeAction::Like, now).unwrap();
        assert_eq!(after.transition, LikeTransition::Closed);
        assert_eq!(after.row.status, MatchStatus::Unmatched);
    }

    #[test]
    fn test_concurrent_mutual_likes_never_duplicate() {
        for _ in 0..20 {
            let (db, ids) = seeded(2);
            let db = Arc::new(db);
            let handles: Vec<_> = [(ids[0], ids[1]), (ids[1], ids[0])]
                .into_iter()
                .map(|(a, b)| {
                    let db = db.clone();
                    std::thread::spawn(move || {
                        db.record_like(a, b, SwipeAction::Like, Utc::now()).unwrap()
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(match_count(&db), 1);
            let stored = db.get_match_by_pair(&PairKey::new(ids[0], ids[1])).unwrap().unwrap();
            assert_eq!(stored.status, MatchStatus::Active);
        }
    }

    #[test]
    fn test_respond_guards_and_decline() {
        let (db, ids) = seeded(3);
        let now = Utc::now();
        let pending = db.record_like(ids[0], ids[1], SwipeAction::Like, now).unwrap().row;

        assert!(matches!(
            db.respond_to_match(Uuid::new_v4(), ids[1], true, now).unwrap(),
            RespondOutcome::Missing
        ));
        assert!(matches!(
            db.respond_to_match(pending.id, ids[2], true, now).unwrap(),
            RespondOutcome::NotParty
        ));
        assert!(matches!(
            db.respond_to_match(pending.id, ids[0], true, now).unwrap(),
            RespondOutcome::AlreadyLiked(_)
        ));

        match db.respond_to_match(pending.id, ids[1], false, now).unwrap() {
            RespondOutcome::Declined(m) => assert_eq!(m.id, pending.id),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(db.get_match(pending.id).unwrap().is_none());
        let pass = db.get_interaction(ids[1], ids[0]).unwrap().unwrap();
        assert_eq!(pass.action, SwipeAction::Pass);
    }

    #[test]
    fn test_respond_accept_then_double_accept() {
        let (db, ids) = seeded(2);
        let now = Utc::now();
        let pending = db.record_like(ids[0], ids[1], SwipeAction::Like, now).unwrap().row;

        match db.respond_to_match(pending.id, ids[1], true, now).unwrap() {
            RespondOutcome::Accepted(like) => {
                assert_eq!(like.transition, LikeTransition::Activated);
                assert!(like.is_mutual());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(
            db.respond_to_match(pending.id, ids[1], true, now).unwrap(),
            RespondOutcome::NotPending(_)
        ));
    }

    #[test]
    fn test_list_orders_by_last_activity() {
        let (db, ids) = seeded(3);
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let older = db.record_like(ids[0], ids[1], SwipeAction::Like, earlier).unwrap().row;
        let newer = db.record_like(ids[2], ids[0], SwipeAction::Like, Utc::now()).unwrap().row;

        let listed = |db: &Database| -> Vec<Uuid> {
            db.list_matches_for_user(ids[0]).unwrap().iter().map(|m| m.id).collect()
        };
        assert_eq!(listed(&db), vec![newer.id, older.id]);

        let later = Utc::now() + chrono::Duration::seconds(1);
        db.with_conn(|c| touch_last_message(c, &older.pair_key(), later)).unwrap();
        assert_eq!(listed(&db), vec![older.id, newer.id]);
    }
}
