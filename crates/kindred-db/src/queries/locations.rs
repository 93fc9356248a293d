use crate::Database;
use crate::models::{NearbyRow, get_string_list, get_uuid, ts};
use anyhow::Result;
use chrono::{DateTime, Utc};
use kindred_types::geo::{BoundingBox, GeoPoint};
use rusqlite::params;
use uuid::Uuid;

impl Database {
    // -- Locations --

    /// Returns false if the user does not exist.
    pub fn update_location(
        &self,
        user_id: Uuid,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_lat = ?1, last_lon = ?2, location_updated_at = ?3
                  WHERE id = ?4",
                params![point.latitude, point.longitude, ts(&at), user_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_connect_now(&self, user_id: Uuid, enabled: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET connect_now_enabled = ?1 WHERE id = ?2",
                params![enabled, user_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_show_exact_distance(&self, user_id: Uuid, show: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET show_exact_distance = ?1 WHERE id = ?2",
                params![show, user_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Connect-now users (other than `exclude`) whose stored fix falls inside
    /// the box. Served by the partial location index; callers confirm with a
    /// great-circle distance.
    pub fn connect_now_users_in_box(
        &self,
        exclude: Uuid,
        bbox: &BoundingBox,
    ) -> Result<Vec<NearbyRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, photos, last_lat, last_lon, show_exact_distance
                   FROM users
                  WHERE last_lat IS NOT NULL AND last_lon IS NOT NULL
                    AND last_lat BETWEEN ?1 AND ?2
                    AND last_lon BETWEEN ?3 AND ?4
                    AND connect_now_enabled = 1
                    AND id <> ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        bbox.min_lat,
                        bbox.max_lat,
                        bbox.min_lon,
                        bbox.max_lon,
                        exclude.to_string()
                    ],
                    |row| {
                        let Some(location) = GeoPoint::from_columns(row.get(3)?, row.get(4)?) else {
                            return Ok(None);
                        };
                        Ok(Some(NearbyRow {
                            id: get_uuid(row, 0)?,
                            display_name: row.get(1)?,
                            photo: get_string_list(row, 2)?.into_iter().next(),
                            location,
                            show_exact_distance: row.get(5)?,
                        }))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect();
            Ok(rows)
        })
    }
}
