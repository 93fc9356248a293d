use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::NearbyUser;
use crate::models::{
    HistoryCursor, MatchStatus, MessageKind, MessageView, PublicProfile, SwipeAction,
};

// -- JWT Claims --

/// JWT claims shared across kindred-api (REST middleware) and kindred-gateway
/// (WebSocket authentication). Tokens are issued by the external auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Matches --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionRequest {
    pub target_id: Uuid,
    pub action: SwipeAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub id: Uuid,
    pub status: MatchStatus,
    pub is_mutual: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub action: SwipeAction,
    /// Absent for passes, which never touch the match store.
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_summary: Option<MatchSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RespondRequest {
    pub accept: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RespondStatus {
    Active,
    Declined,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RespondResponse {
    pub match_id: Uuid,
    pub status: RespondStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub preview: String,
    pub kind: MessageKind,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchListing {
    pub match_id: Uuid,
    pub conversation_id: String,
    pub status: MatchStatus,
    pub is_initiator: bool,
    pub user: PublicProfile,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub last_activity_at: DateTime<Utc>,
}

// -- Discovery --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub profile: PublicProfile,
    pub score: f64,
    pub shared_interests: usize,
}

// -- Chat --

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<DateTime<Utc>>,
    /// Id of the message at `before`; ties on the timestamp page by id.
    pub before_id: Option<Uuid>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn cursor(&self) -> Option<HistoryCursor> {
        self.before.map(|created_at| HistoryCursor {
            created_at,
            id: self.before_id,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

// -- Location --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocationResponse {
    pub nearby: Vec<NearbyUser>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectNowRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectNowResponse {
    pub connect_now_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyRequest {
    pub show_exact_distance: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct NearbyQuery {
    pub radius: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuickHelloRequest {
    pub user_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuickHelloResponse {
    pub match_id: Uuid,
    pub match_status: MatchStatus,
    pub message: MessageView,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterTokenRequest {
    pub token: String,
}
