//! Client-side conversation state.
//!
//! A client renders its own messages before the server confirms them. The
//! server's echo carries both the real id and the client's `temp_id`, while the
//! same message may also reach the client through the receive path. [`reduce`]
//! merges these into one list so a message is never shown twice.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::GatewayEvent;
use crate::models::{DELETED_MESSAGE_MARKER, MediaRef, MessageKind, MessageStatus, MessageView};

/// A message the client has sent but the server has not yet confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub temp_id: String,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Optimistic { draft: Draft, status: MessageStatus },
    Confirmed {
        temp_id: Option<String>,
        message: MessageView,
    },
}

impl Entry {
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            Self::Optimistic { draft, .. } => Some(&draft.temp_id),
            Self::Confirmed { temp_id, .. } => temp_id.as_deref(),
        }
    }

    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            Self::Optimistic { .. } => None,
            Self::Confirmed { message, .. } => Some(message.id),
        }
    }

    pub fn status(&self) -> MessageStatus {
        match self {
            Self::Optimistic { status, .. } => *status,
            Self::Confirmed { message, .. } => message.status,
        }
    }

    fn confirmed_mut(&mut self, id: Uuid) -> Option<&mut MessageView> {
        match self {
            Self::Confirmed { message, .. } if message.id == id => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub viewer: Uuid,
    pub conversation_id: String,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
pub enum TimelineEvent {
    /// The local user queued a message for sending.
    Queued(Draft),
    /// Anything received over the gateway.
    Remote(GatewayEvent),
}

impl Timeline {
    pub fn new(viewer: Uuid, conversation_id: impl Into<String>) -> Self {
        Self {
            viewer,
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
        }
    }

    /// Seed from history fetched on (re)connect.
    pub fn with_history(mut self, history: Vec<MessageView>) -> Self {
        for message in history {
            self.entries.push(Entry::Confirmed {
                temp_id: None,
                message,
            });
        }
        self
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pinned(&self) -> Option<&MessageView> {
        self.entries.iter().find_map(|entry| match entry {
            Entry::Confirmed { message, .. } if message.is_pinned => Some(message),
            _ => None,
        })
    }

    fn position_by_temp(&self, temp_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.temp_id() == Some(temp_id))
    }

    fn position_by_id(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.message_id() == Some(id))
    }

    fn for_message(&mut self, id: Uuid, f: impl FnOnce(&mut MessageView)) {
        if let Some(message) = self.entries.iter_mut().find_map(|e| e.confirmed_mut(id)) {
            f(message);
        }
    }
}

/// `(state, event) -> state`. Events for other conversations leave the state untouched.
pub fn reduce(mut state: Timeline, event: &TimelineEvent) -> Timeline {
    match event {
        TimelineEvent::Queued(draft) => {
            if state.position_by_temp(&draft.temp_id).is_none() {
                state.entries.push(Entry::Optimistic {
                    draft: draft.clone(),
                    status: MessageStatus::Sent,
                });
            }
        }
        TimelineEvent::Remote(remote) => apply_remote(&mut state, remote),
    }
    state
}

fn apply_remote(state: &mut Timeline, event: &GatewayEvent) {
    match event {
        GatewayEvent::MessageSent { temp_id, message } => {
            if message.conversation_id != state.conversation_id {
                return;
            }
            let optimistic = state.position_by_temp(temp_id);
            match (state.position_by_id(message.id), optimistic) {
                // Receive path won the race: keep the real entry, drop the optimistic copy.
                (Some(real), Some(stale)) if real != stale => {
                    if let Entry::Confirmed { temp_id: slot, .. } = &mut state.entries[real] {
                        *slot = Some(temp_id.clone());
                    }
                    state.entries.remove(stale);
                }
                (Some(_), _) => {}
                (None, Some(stale)) => {
                    state.entries[stale] = Entry::Confirmed {
                        temp_id: Some(temp_id.clone()),
                        message: message.clone(),
                    };
                }
                // Sent from another of the viewer's devices.
                (None, None) => state.entries.push(Entry::Confirmed {
                    temp_id: Some(temp_id.clone()),
                    message: message.clone(),
                }),
            }
        }

        GatewayEvent::NewMessage { message } => {
            if message.conversation_id != state.conversation_id {
                return;
            }
            match state.position_by_id(message.id) {
                Some(pos) => {
                    if let Entry::Confirmed { message: existing, .. } = &mut state.entries[pos] {
                        let status = existing.status.advance(message.status);
                        *existing = message.clone();
                        existing.status = status;
                    }
                }
                None => state.entries.push(Entry::Confirmed {
                    temp_id: None,
                    message: message.clone(),
                }),
            }
        }

        GatewayEvent::MessageDelivered {
            message_id,
            conversation_id,
        } if *conversation_id == state.conversation_id => {
            state.for_message(*message_id, |m| {
                m.status = m.status.advance(MessageStatus::Delivered);
            });
        }

        GatewayEvent::MessagesRead {
            conversation_id,
            read_by,
            read_at,
        } if *conversation_id == state.conversation_id && *read_by != state.viewer => {
            let viewer = state.viewer;
            for entry in &mut state.entries {
                if let Entry::Confirmed { message, .. } = entry {
                    if message.sender_id == viewer {
                        message.status = message.status.advance(MessageStatus::Read);
                        message.read_at.get_or_insert(*read_at);
                    }
                }
            }
        }

        GatewayEvent::MessagePinned {
            message_id,
            conversation_id,
            is_pinned,
            pinned_by,
            ..
        } if *conversation_id == state.conversation_id => {
            if *is_pinned {
                for entry in &mut state.entries {
                    if let Entry::Confirmed { message, .. } = entry {
                        message.is_pinned = false;
                        message.pinned_by = None;
                    }
                }
            }
            state.for_message(*message_id, |m| {
                m.is_pinned = *is_pinned;
                m.pinned_by = if *is_pinned { *pinned_by } else { None };
            });
        }

        GatewayEvent::MessageStarred {
            message_id,
            conversation_id,
            is_starred,
            by_me,
            ..
        } if *conversation_id == state.conversation_id && *by_me => {
            state.for_message(*message_id, |m| m.starred_by_me = *is_starred);
        }

        GatewayEvent::MessageDeleted {
            message_id,
            conversation_id,
            for_everyone,
        } if *conversation_id == state.conversation_id => {
            if *for_everyone {
                state.for_message(*message_id, |m| {
                    m.deleted_for_everyone = true;
                    m.content = Some(DELETED_MESSAGE_MARKER.to_string());
                    m.media = None;
                });
            } else if let Some(pos) = state.position_by_id(*message_id) {
                state.entries.remove(pos);
            }
        }

        GatewayEvent::CommandError {
            temp_id: Some(temp_id),
            ..
        } => {
            if let Some(pos) = state.position_by_temp(temp_id) {
                if let Entry::Optimistic { status, .. } = &mut state.entries[pos] {
                    *status = MessageStatus::Failed;
                }
            }
        }

        _ => {}
    }
}
