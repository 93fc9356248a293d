//! Database row types and column codecs.
//! Domain types from kindred-types are reused where the row is the model
//! (matches, messages); profile and location rows stay local to this crate.

use chrono::{DateTime, SecondsFormat, Utc};
use kindred_types::geo::GeoPoint;
use kindred_types::models::{Gender, Match, PublicProfile};
use rusqlite::Row;
use rusqlite::types::Type;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// Full profile row, including the sensitive columns that must never leave
/// the server. Convert with [`ProfileRow::to_public`] before responding.
#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub gender_preference: Option<String>,
    pub relationship_expectations: Option<String>,
    pub interests: Vec<String>,
    pub photos: Vec<String>,
    pub bio: Option<String>,
    pub occupation: Option<String>,
    pub onboarding_completed: bool,
    pub popularity: f64,
    pub is_verified: bool,
    pub is_premium: bool,
    pub connect_now_enabled: bool,
    pub show_exact_distance: bool,
    pub push_enabled: bool,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub google_id: Option<String>,
    pub apple_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProfileRow {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            display_name: None,
            age: None,
            gender: None,
            gender_preference: None,
            relationship_expectations: None,
            interests: Vec::new(),
            photos: Vec::new(),
            bio: None,
            occupation: None,
            onboarding_completed: false,
            popularity: 0.0,
            is_verified: false,
            is_premium: false,
            connect_now_enabled: false,
            show_exact_distance: true,
            push_enabled: true,
            location: None,
            location_updated_at: None,
            email: None,
            phone: None,
            google_id: None,
            apple_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn to_public(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            display_name: self.display_name.clone(),
            age: self.age,
            gender: self.gender,
            bio: self.bio.clone(),
            occupation: self.occupation.clone(),
            photos: self.photos.clone(),
            interests: self.interests.clone(),
            relationship_expectations: self.relationship_expectations.clone(),
            is_verified: self.is_verified,
            is_premium: self.is_premium,
        }
    }

    pub fn first_photo(&self) -> Option<String> {
        self.photos.first().cloned()
    }
}

/// A connect-now user returned by the bounding-box pre-filter.
#[derive(Debug, Clone)]
pub struct NearbyRow {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub photo: Option<String>,
    pub location: GeoPoint,
    pub show_exact_distance: bool,
}

/// What a like did to the pair's match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTransition {
    /// No record existed; a pending one was created with the actor as initiator.
    Created,
    /// The other side had already liked; the match is now active.
    Activated,
    /// Pending, and the actor's side had already liked.
    Unchanged,
    AlreadyActive,
    /// The pair is unmatched; likes no longer change it.
    Closed,
}

#[derive(Debug, Clone)]
pub struct LikeOutcome {
    pub row: Match,
    pub transition: LikeTransition,
}

impl LikeOutcome {
    pub fn is_mutual(&self) -> bool {
        self.row.status == kindred_types::models::MatchStatus::Active
    }
}

#[derive(Debug, Clone)]
pub enum RespondOutcome {
    Missing,
    NotParty,
    /// The responder's own side already liked.
    AlreadyLiked(Match),
    NotPending(Match),
    Accepted(LikeOutcome),
    Declined(Match),
}

// -- Column codecs --

/// RFC 3339 UTC with fixed microsecond precision, so text order is time order.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

pub(crate) fn get_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

/// JSON string arrays (interests, photos). Bad data reads as empty.
pub(crate) fn get_string_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(list) => Ok(list),
        Err(e) => {
            warn!("Ignoring malformed list column {}: {}", idx, e);
            Ok(Vec::new())
        }
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
