use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use kindred_db::{Database, ProfileRow};
use kindred_types::api::Candidate;
use kindred_types::models::GenderPreference;

use crate::blocking;
use crate::error::{KindredError, Result};

/// Named weighting policies over the same candidate pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Feed,
    TopPicks,
}

#[derive(Debug, Clone, Copy)]
struct Weights {
    shared_interest: f64,
    relationship: f64,
    popularity: f64,
}

impl Policy {
    fn weights(&self) -> Weights {
        match self {
            Self::Feed => Weights {
                shared_interest: 1.0,
                relationship: 2.0,
                popularity: 2.0,
            },
            Self::TopPicks => Weights {
                shared_interest: 20.0,
                relationship: 30.0,
                popularity: 0.1,
            },
        }
    }

    pub fn limit(&self) -> usize {
        match self {
            Self::Feed => 20,
            Self::TopPicks => 10,
        }
    }
}

/// Read-only ranking. Every call reads the exclusion set fresh.
pub struct DiscoveryService {
    db: Arc<Database>,
}

impl DiscoveryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn rank(&self, viewer_id: Uuid, policy: Policy) -> Result<Vec<Candidate>> {
        let loaded = blocking(&self.db, move |db| {
            let Some(viewer) = db.get_profile(viewer_id)? else {
                return Ok(None);
            };
            let preference = GenderPreference::from_profile(viewer.gender_preference.as_deref());
            let pool = db.discovery_candidates(viewer_id, preference)?;
            Ok(Some((viewer, pool)))
        })
        .await?;
        let (viewer, pool) = loaded.ok_or(KindredError::NotFound("user"))?;
        debug!(%viewer_id, ?policy, pool = pool.len(), "Ranking candidates");

        Ok(rank_candidates(&viewer, pool, policy))
    }
}

fn normalized(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn relationship_match(viewer: &ProfileRow, candidate: &ProfileRow) -> bool {
    match (&viewer.relationship_expectations, &candidate.relationship_expectations) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Score, order and truncate. Ties fall back to id order so pages are stable.
pub fn rank_candidates(
    viewer: &ProfileRow,
    pool: Vec<ProfileRow>,
    policy: Policy,
) -> Vec<Candidate> {
    let weights = policy.weights();
    let mine = normalized(&viewer.interests);

    let mut scored: Vec<Candidate> = pool
        .into_iter()
        .map(|candidate| {
            let shared = normalized(&candidate.interests).intersection(&mine).count();
            let relationship = if relationship_match(viewer, &candidate) { 1.0 } else { 0.0 };
            let score = shared as f64 * weights.shared_interest
                + relationship * weights.relationship
                + candidate.popularity * weights.popularity;
            Candidate {
                profile: candidate.to_public(),
                score,
                shared_interests: shared,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.profile.id.to_string().cmp(&b.profile.id.to_string()))
    });
    scored.truncate(policy.limit());
    scored
}
