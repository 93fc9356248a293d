use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::ids::PairKey;

/// Content shown in place of a message deleted for everyone.
pub const DELETED_MESSAGE_MARKER: &str = "This message was deleted";

// -- Interactions --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwipeAction {
    Like,
    Pass,
    Superlike,
}

impl SwipeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "LIKE",
            Self::Pass => "PASS",
            Self::Superlike => "SUPERLIKE",
        }
    }

    pub fn is_like(&self) -> bool {
        matches!(self, Self::Like | Self::Superlike)
    }
}

impl FromStr for SwipeAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIKE" => Ok(Self::Like),
            "PASS" => Ok(Self::Pass),
            "SUPERLIKE" => Ok(Self::Superlike),
            other => Err(UnknownVariant::new("swipe action", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub target_id: Uuid,
    pub action: SwipeAction,
    pub created_at: DateTime<Utc>,
}

// -- Matches --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Active,
    /// Terminal. Reserved for an explicit unmatch; no current flow enters it.
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Unmatched => "unmatched",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "unmatched" => Ok(Self::Unmatched),
            other => Err(UnknownVariant::new("match status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub status: MatchStatus,
    pub initiator_id: Uuid,
    pub user1_liked: bool,
    pub user2_liked: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn pair_key(&self) -> PairKey {
        PairKey {
            user1: self.user1_id,
            user2: self.user2_id,
        }
    }

    pub fn conversation_id(&self) -> String {
        self.pair_key().conversation_id()
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.pair_key().contains(user_id)
    }

    pub fn other_party(&self, user_id: Uuid) -> Option<Uuid> {
        self.pair_key().other(user_id)
    }

    /// Whether `user_id`'s side of the match has liked. False for non-parties.
    pub fn has_liked(&self, user_id: Uuid) -> bool {
        if user_id == self.user1_id {
            self.user1_liked
        } else if user_id == self.user2_id {
            self.user2_liked
        } else {
            false
        }
    }
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Audio,
    Image,
    File,
    Sticker,
    Call,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::File => "file",
            Self::Sticker => "sticker",
            Self::Call => "call",
        }
    }

    /// Short preview used in notification bodies and match listings.
    pub fn preview_label(&self) -> &'static str {
        match self {
            Self::Text => "Message",
            Self::Audio => "🎤 Audio Message",
            Self::Image => "📷 Photo",
            Self::File => "📎 File",
            Self::Sticker => "Sticker",
            Self::Call => "📞 Call",
        }
    }
}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "sticker" => Ok(Self::Sticker),
            "call" => Ok(Self::Call),
            other => Err(UnknownVariant::new("message kind", other)),
        }
    }
}

/// Per-message delivery state. Advances `sent -> delivered -> read` and never
/// regresses. `failed` only exists on the client for rejected optimistic sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Failed => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    /// The later of `self` and `next`.
    pub fn advance(self, next: MessageStatus) -> MessageStatus {
        if next.rank() > self.rank() { next } else { self }
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("message status", other)),
        }
    }
}

/// Reference to media that was uploaded out of band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<String>,
}

/// A stored message with all per-user flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to_id: Option<Uuid>,
    pub status: MessageStatus,
    pub is_pinned: bool,
    pub pinned_by: Option<Uuid>,
    pub starred_by: BTreeSet<Uuid>,
    pub deleted_for_everyone: bool,
    pub deleted_for: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// What `viewer` is allowed to see. Deleted-for-everyone wins over a
    /// per-user hide: the tombstone is still rendered.
    pub fn view_for(&self, viewer: Uuid) -> Option<MessageView> {
        if !self.deleted_for_everyone && self.deleted_for.contains(&viewer) {
            return None;
        }

        let (content, media) = if self.deleted_for_everyone {
            (Some(DELETED_MESSAGE_MARKER.to_string()), None)
        } else {
            (self.content.clone(), self.media.clone())
        };

        Some(MessageView {
            id: self.id,
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            kind: self.kind,
            content,
            media,
            reply_to_id: self.reply_to_id,
            status: self.status,
            is_pinned: self.is_pinned,
            pinned_by: self.pinned_by,
            starred_by_me: self.starred_by.contains(&viewer),
            deleted_for_everyone: self.deleted_for_everyone,
            created_at: self.created_at,
            read_at: self.read_at,
        })
    }

    pub fn preview(&self) -> String {
        match (&self.kind, &self.content) {
            (MessageKind::Text, Some(text)) => text.chars().take(120).collect(),
            (kind, _) => kind.preview_label().to_string(),
        }
    }
}

/// Page position in a conversation: everything strictly older than the
/// message at (`created_at`, `id`). Without an id, every message stored at
/// `created_at` is skipped too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub id: Option<Uuid>,
}

impl HistoryCursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self {
            created_at,
            id: Some(id),
        }
    }
}

/// A message as rendered for one viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to_id: Option<Uuid>,
    pub status: MessageStatus,
    pub is_pinned: bool,
    pub pinned_by: Option<Uuid>,
    pub starred_by_me: bool,
    pub deleted_for_everyone: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

// -- Profiles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    #[serde(rename = "Non-binary")]
    NonBinary,
    #[serde(rename = "Prefer not to say")]
    PreferNotToSay,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::NonBinary => "Non-binary",
            Self::PreferNotToSay => "Prefer not to say",
        }
    }

    /// Normalise free-form profile text ("male", "Men", "Woman", ...).
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "man" | "men" => Some(Self::Male),
            "female" | "woman" | "women" => Some(Self::Female),
            "non-binary" | "nonbinary" | "non binary" => Some(Self::NonBinary),
            "prefer not to say" => Some(Self::PreferNotToSay),
            _ => None,
        }
    }
}

/// Who a viewer wants to see in discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderPreference {
    Everyone,
    Only(Gender),
}

impl GenderPreference {
    /// `None`, empty and "Everyone" mean no filter. Unrecognised values also
    /// fall back to no filter rather than hiding every candidate.
    pub fn from_profile(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Everyone;
        };
        if raw.eq_ignore_ascii_case("everyone") {
            return Self::Everyone;
        }
        match Gender::normalize(raw) {
            Some(gender) => Self::Only(gender),
            None => {
                warn!("Unrecognised gender preference '{}', not filtering", raw);
                Self::Everyone
            }
        }
    }
}

/// Public part of a profile. Credentials, device tokens and third-party
/// account ids have no representation here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub bio: Option<String>,
    pub occupation: Option<String>,
    pub photos: Vec<String>,
    pub interests: Vec<String>,
    pub relationship_expectations: Option<String>,
    pub is_verified: bool,
    pub is_premium: bool,
}

// -- Errors --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(sender: Uuid, receiver: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: PairKey::new(sender, receiver).conversation_id(),
            sender_id: sender,
            receiver_id: receiver,
            kind: MessageKind::Image,
            content: Some("look".into()),
            media: Some(MediaRef {
                url: Some("https://cdn.example/p.jpg".into()),
                ..Default::default()
            }),
            reply_to_id: None,
            status: MessageStatus::Sent,
            is_pinned: false,
            pinned_by: None,
            starred_by: BTreeSet::new(),
            deleted_for_everyone: false,
            deleted_for: BTreeSet::new(),
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn test_status_never_regresses() {
        assert_eq!(MessageStatus::Sent.advance(MessageStatus::Delivered), MessageStatus::Delivered);
        assert_eq!(MessageStatus::Read.advance(MessageStatus::Delivered), MessageStatus::Read);
        assert_eq!(MessageStatus::Delivered.advance(MessageStatus::Sent), MessageStatus::Delivered);
    }

    #[test]
    fn test_view_hides_deleted_for_me() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut msg = sample_message(a, b);
        msg.deleted_for.insert(b);
        assert!(msg.view_for(b).is_none());
        assert!(msg.view_for(a).is_some());
    }

    #[test]
    fn test_view_tombstone_wins_over_hide() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut msg = sample_message(a, b);
        msg.deleted_for.insert(b);
        msg.deleted_for_everyone = true;

        for viewer in [a, b] {
            let view = msg.view_for(viewer).unwrap();
            assert_eq!(view.content.as_deref(), Some(DELETED_MESSAGE_MARKER));
            assert!(view.media.is_none());
        }
    }

    #[test]
    fn test_starred_by_me_is_per_viewer() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut msg = sample_message(a, b);
        msg.starred_by.insert(a);
        assert!(msg.view_for(a).unwrap().starred_by_me);
        assert!(!msg.view_for(b).unwrap().starred_by_me);
    }

    #[test]
    fn test_gender_preference() {
        assert_eq!(GenderPreference::from_profile(None), GenderPreference::Everyone);
        assert_eq!(GenderPreference::from_profile(Some("Everyone")), GenderPreference::Everyone);
        assert_eq!(
            GenderPreference::from_profile(Some("Women")),
            GenderPreference::Only(Gender::Female)
        );
        assert_eq!(GenderPreference::from_profile(Some("aliens")), GenderPreference::Everyone);
    }

    #[test]
    fn test_swipe_action_wire_format() {
        let json = serde_json::to_string(&SwipeAction::Superlike).unwrap();
        assert_eq!(json, "\"SUPERLIKE\"");
        assert_eq!("PASS".parse::<SwipeAction>().unwrap(), SwipeAction::Pass);
        assert!("MAYBE".parse::<SwipeAction>().is_err());
    }
}
