use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MatchStatus, MediaRef, MessageKind, MessageView};

/// Machine-readable failure class carried by error events and REST bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Forbidden,
    StateConflict,
    Upstream,
    Internal,
}

/// A connect-now user close to the recipient of the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyUser {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub photo: Option<String>,
    /// Metres, rounded. Coarsened to 100 m bands when the user hides exact distance.
    pub distance_m: u32,
    pub show_exact_distance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_status: Option<MatchStatus>,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// Authoritative echo of the sender's own message
    MessageSent {
        temp_id: String,
        message: MessageView,
    },

    /// A message arrived for this user
    NewMessage { message: MessageView },

    MessageDelivered {
        message_id: Uuid,
        conversation_id: String,
    },

    /// The other party has seen every message sent to them in the conversation
    MessagesRead {
        conversation_id: String,
        read_by: Uuid,
        read_at: DateTime<Utc>,
    },

    MessagePinned {
        message_id: Uuid,
        conversation_id: String,
        is_pinned: bool,
        pinned_by: Option<Uuid>,
        /// Previously pinned message that lost its pin, if any
        unpinned_message_id: Option<Uuid>,
    },

    MessageStarred {
        message_id: Uuid,
        conversation_id: String,
        actor_id: Uuid,
        is_starred: bool,
        /// True only on the acting user's own connections
        by_me: bool,
    },

    MessageDeleted {
        message_id: Uuid,
        conversation_id: String,
        for_everyone: bool,
    },

    UserTyping { user_id: Uuid, is_typing: bool },

    UserRecording { user_id: Uuid, is_recording: bool },

    UserJoinedChat { user_id: Uuid },

    UserLeftChat { user_id: Uuid },

    ChatPresenceAck { user_id: Uuid },

    /// A watched user came online or went offline
    UserStatusChange { user_id: Uuid, online: bool },

    NearbyUserEntered { user: NearbyUser },

    LocationUpdated { nearby_count: usize },

    ConnectNowToggled { enabled: bool },

    /// Someone liked this user and is waiting for a response
    MatchRequest {
        match_id: Uuid,
        from_user_id: Uuid,
        is_super: bool,
    },

    /// Both sides liked each other
    MatchCreated {
        match_id: Uuid,
        user_id: Uuid,
        conversation_id: String,
    },

    /// A command from this connection failed. Carries the identifiers the
    /// client needs to roll back optimistic state.
    CommandError {
        command: String,
        code: ErrorCode,
        reason: String,
        temp_id: Option<String>,
        message_id: Option<Uuid>,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    SendMessage {
        receiver_id: Uuid,
        temp_id: String,
        #[serde(default = "default_kind")]
        kind: MessageKind,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        media: Option<MediaRef>,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
    },

    AckDelivered { message_id: Uuid },

    MarkRead { conversation_id: String },

    PinMessage { message_id: Uuid, pin: bool },

    StarMessage { message_id: Uuid, star: bool },

    DeleteMessage {
        message_id: Uuid,
        #[serde(default)]
        for_everyone: bool,
    },

    Typing { receiver_id: Uuid, is_typing: bool },

    Recording { receiver_id: Uuid, is_recording: bool },

    JoinChat { receiver_id: Uuid },

    LeaveChat { receiver_id: Uuid },

    ChatPresenceAck { receiver_id: Uuid },

    UpdateLocation { latitude: f64, longitude: f64 },

    ToggleConnectNow { enabled: bool },

    SubscribePresence { user_id: Uuid },

    UnsubscribePresence { user_id: Uuid },
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

impl GatewayCommand {
    /// Wire name of the command, used in error events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "Identify",
            Self::SendMessage { .. } => "SendMessage",
            Self::AckDelivered { .. } => "AckDelivered",
            Self::MarkRead { .. } => "MarkRead",
            Self::PinMessage { .. } => "PinMessage",
            Self::StarMessage { .. } => "StarMessage",
            Self::DeleteMessage { .. } => "DeleteMessage",
            Self::Typing { .. } => "Typing",
            Self::Recording { .. } => "Recording",
            Self::JoinChat { .. } => "JoinChat",
            Self::LeaveChat { .. } => "LeaveChat",
            Self::ChatPresenceAck { .. } => "ChatPresenceAck",
            Self::UpdateLocation { .. } => "UpdateLocation",
            Self::ToggleConnectNow { .. } => "ToggleConnectNow",
            Self::SubscribePresence { .. } => "SubscribePresence",
            Self::UnsubscribePresence { .. } => "UnsubscribePresence",
        }
    }

    /// Client-side identifiers to echo back if the command fails.
    pub fn correlation(&self) -> (Option<String>, Option<Uuid>) {
        match self {
            Self::SendMessage { temp_id, .. } => (Some(temp_id.clone()), None),
            Self::AckDelivered { message_id }
            | Self::PinMessage { message_id, .. }
            | Self::StarMessage { message_id, .. }
            | Self::DeleteMessage { message_id, .. } => (None, Some(*message_id)),
            _ => (None, None),
        }
    }
}
