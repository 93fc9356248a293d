use crate::Database;
use crate::models::{ProfileRow, get_opt_ts, get_string_list, get_ts, get_uuid, ts};
use anyhow::Result;
use kindred_types::geo::GeoPoint;
use kindred_types::models::{Gender, GenderPreference};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

const PROFILE_COLUMNS: &str = "id, display_name, age, gender, gender_preference,
    relationship_expectations, interests, photos, bio, occupation, onboarding_completed,
    popularity, is_verified, is_premium, connect_now_enabled, show_exact_distance,
    push_enabled, last_lat, last_lon, location_updated_at, email, phone, google_id,
    apple_id, created_at";

impl Database {
    // -- Profiles --

    /// Profile writes belong to the external onboarding service; this exists
    /// for seeding and tests.
    pub fn upsert_profile(&self, profile: &ProfileRow) -> Result<()> {
        let interests = serde_json::to_string(&profile.interests)?;
        let photos = serde_json::to_string(&profile.photos)?;
        let (lat, lon) = match profile.location {
            Some(p) => (Some(p.latitude), Some(p.longitude)),
            None => (None, None),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, age, gender, gender_preference,
                    relationship_expectations, interests, photos, bio, occupation,
                    onboarding_completed, popularity, is_verified, is_premium,
                    connect_now_enabled, show_exact_distance, push_enabled, last_lat, last_lon,
                    location_updated_at, email, phone, google_id, apple_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    age = excluded.age,
                    gender = excluded.gender,
                    gender_preference = excluded.gender_preference,
                    relationship_expectations = excluded.relationship_expectations,
                    interests = excluded.interests,
                    photos = excluded.photos,
                    bio = excluded.bio,
                    occupation = excluded.occupation,
                    onboarding_completed = excluded.onboarding_completed,
                    popularity = excluded.popularity,
                    is_verified = excluded.is_verified,
                    is_premium = excluded.is_premium,
                    connect_now_enabled = excluded.connect_now_enabled,
                    show_exact_distance = excluded.show_exact_distance,
                    push_enabled = excluded.push_enabled,
                    last_lat = excluded.last_lat,
                    last_lon = excluded.last_lon,
                    location_updated_at = excluded.location_updated_at,
                    email = excluded.email,
                    phone = excluded.phone,
                    google_id = excluded.google_id,
                    apple_id = excluded.apple_id",
                params![
                    profile.id.to_string(),
                    profile.display_name,
                    profile.age,
                    profile.gender.map(|g| g.as_str()),
                    profile.gender_preference,
                    profile.relationship_expectations,
                    interests,
                    photos,
                    profile.bio,
                    profile.occupation,
                    profile.onboarding_completed,
                    profile.popularity,
                    profile.is_verified,
                    profile.is_premium,
                    profile.connect_now_enabled,
                    profile.show_exact_distance,
                    profile.push_enabled,
                    lat,
                    lon,
                    profile.location_updated_at.as_ref().map(ts),
                    profile.email,
                    profile.phone,
                    profile.google_id,
                    profile.apple_id,
                    ts(&profile.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, id))
    }

    /// Onboarded users the viewer has not interacted with and shares no match
    /// with, in any status. One anti-join instead of three lookups.
    pub fn discovery_candidates(
        &self,
        viewer: Uuid,
        preference: GenderPreference,
    ) -> Result<Vec<ProfileRow>> {
        let gender = match preference {
            GenderPreference::Everyone => None,
            GenderPreference::Only(g) => Some(g.as_str()),
        };

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PROFILE_COLUMNS} FROM users u
                  WHERE u.onboarding_completed = 1
                    AND u.id <> ?1
                    AND NOT EXISTS (
                        SELECT 1 FROM interactions i
                         WHERE i.actor_id = ?1 AND i.target_id = u.id)
                    AND NOT EXISTS (
                        SELECT 1 FROM matches m
                         WHERE (m.user1_id = ?1 AND m.user2_id = u.id)
                            OR (m.user2_id = ?1 AND m.user1_id = u.id))
                    AND (?2 IS NULL OR u.gender = ?2)"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![viewer.to_string(), gender], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Raise the target's popularity by one. Callers credit each liker once.
    pub(crate) fn bump_popularity(conn: &Connection, user_id: Uuid) -> Result<()> {
        conn.execute(
            "UPDATE users SET popularity = popularity + 1 WHERE id = ?1",
            [user_id.to_string()],
        )?;
        Ok(())
    }
}

pub(crate) fn query_profile(conn: &Connection, id: Uuid) -> Result<Option<ProfileRow>> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], profile_from_row)
        .optional()?;
    Ok(row)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    let gender: Option<String> = row.get(3)?;
    Ok(ProfileRow {
        id: get_uuid(row, 0)?,
        display_name: row.get(1)?,
        age: row.get(2)?,
        gender: gender.as_deref().and_then(Gender::normalize),
        gender_preference: row.get(4)?,
        relationship_expectations: row.get(5)?,
        interests: get_string_list(row, 6)?,
        photos: get_string_list(row, 7)?,
        bio: row.get(8)?,
        occupation: row.get(9)?,
        onboarding_completed: row.get(10)?,
        popularity: row.get(11)?,
        is_verified: row.get(12)?,
        is_premium: row.get(13)?,
        connect_now_enabled: row.get(14)?,
        show_exact_distance: row.get(15)?,
        push_enabled: row.get(16)?,
        location: GeoPoint::from_columns(row.get(17)?, row.get(18)?),
        location_updated_at: get_opt_ts(row, 19)?,
        email: row.get(20)?,
        phone: row.get(21)?,
        google_id: row.get(22)?,
        apple_id: row.get(23)?,
        created_at: get_ts(row, 24)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::seeded;
    use chrono::Utc;
    use kindred_types::models::SwipeAction;

    #[test]
    fn test_profile_roundtrip_keeps_sensitive_columns_private() {
        let (db, ids) = seeded(1);
        let mut row = db.get_profile(ids[0]).unwrap().unwrap();
        row.email = Some("a@example.com".into());
        row.interests = vec!["hiking".into(), "jazz".into()];
        row.gender = Some(Gender::Female);
        db.upsert_profile(&row).unwrap();

        let loaded = db.get_profile(ids[0]).unwrap().unwrap();
        assert_eq!(loaded.email.as_deref(), Some("a@example.com"));
        assert_eq!(loaded.interests, vec!["hiking", "jazz"]);
        assert_eq!(loaded.gender, Some(Gender::Female));

        let public = serde_json::to_value(loaded.to_public()).unwrap();
        assert!(public.get("email").is_none());
    }

    #[test]
    fn test_candidates_exclude_self_interactions_and_matches() {
        let (db, ids) = seeded(5);
        let (viewer, passed, liked, liked_me, fresh) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
        let now = Utc::now();

        db.record_interaction(viewer, passed, SwipeAction::Pass, now).unwrap();
        db.record_like(viewer, liked, SwipeAction::Like, now).unwrap();
        // A pending match the viewer did not initiate still excludes the other party.
        db.record_like(liked_me, viewer, SwipeAction::Like, now).unwrap();

        let got: Vec<Uuid> = db
            .discovery_candidates(viewer, GenderPreference::Everyone)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(got, vec![fresh]);
    }

    #[test]
    fn test_candidates_filter_gender_and_onboarding() {
        let (db, ids) = seeded(3);
        for (id, gender) in [(ids[1], Gender::Female), (ids[2], Gender::Male)] {
            let mut row = db.get_profile(id).unwrap().unwrap();
            row.gender = Some(gender);
            db.upsert_profile(&row).unwrap();
        }
        let mut hidden = ProfileRow::new(Uuid::new_v4());
        hidden.gender = Some(Gender::Female);
        db.upsert_profile(&hidden).unwrap();

        let got = db
            .discovery_candidates(ids[0], GenderPreference::Only(Gender::Female))
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, ids[1]);
    }
}
