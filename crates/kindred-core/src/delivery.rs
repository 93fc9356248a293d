use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, trace};
use uuid::Uuid;

use kindred_db::Database;
use kindred_types::events::GatewayEvent;
use kindred_types::ids::PairKey;
use kindred_types::models::{
    HistoryCursor, MatchStatus, MediaRef, Message, MessageKind, MessageStatus, MessageView,
};

use crate::error::{KindredError, Result};
use crate::notify::{Notification, NotificationDispatcher, dispatch_best_effort};
use crate::presence::{ConnId, PresenceRegistry};
use crate::{blocking, display_name};

pub const MAX_TEXT_LEN: usize = 5000;
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// A message as submitted by its sender, before it has an id.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub receiver_id: Uuid,
    pub temp_id: String,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to_id: Option<Uuid>,
}

impl OutgoingMessage {
    pub fn text(receiver_id: Uuid, temp_id: &str, content: &str) -> Self {
        Self {
            receiver_id,
            temp_id: temp_id.to_string(),
            kind: MessageKind::Text,
            content: Some(content.to_string()),
            media: None,
            reply_to_id: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.temp_id.trim().is_empty() {
            return Err(KindredError::validation("temp_id is required"));
        }
        let has_text = self.content.as_deref().is_some_and(|c| !c.trim().is_empty());
        let media_url = self.media.as_ref().and_then(|m| m.url.as_deref());
        let sticker = self.media.as_ref().and_then(|m| m.sticker_id.as_ref());

        match self.kind {
            MessageKind::Text if !has_text => {
                Err(KindredError::validation("text message needs content"))
            }
            MessageKind::Audio | MessageKind::Image | MessageKind::File
                if media_url.is_none_or(str::is_empty) =>
            {
                Err(KindredError::validation(format!(
                    "{} message needs a media url",
                    self.kind.as_str()
                )))
            }
            MessageKind::Sticker if sticker.is_none() && !has_text => {
                Err(KindredError::validation("sticker message needs a sticker id"))
            }
            _ if self.content.as_deref().is_some_and(|c| c.chars().count() > MAX_TEXT_LEN) => Err(
                KindredError::validation(format!("content longer than {MAX_TEXT_LEN} characters")),
            ),
            _ => Ok(()),
        }
    }
}

/// Owns message state changes and their fan-out over presence.
pub struct DeliveryCoordinator {
    db: Arc<Database>,
    presence: PresenceRegistry,
    notifier: Arc<dyn NotificationDispatcher>,
    delete_window: Duration,
}

impl DeliveryCoordinator {
    pub fn new(
        db: Arc<Database>,
        presence: PresenceRegistry,
        notifier: Arc<dyn NotificationDispatcher>,
        delete_window: Duration,
    ) -> Self {
        Self {
            db,
            presence,
            notifier,
            delete_window,
        }
    }

    /// Persist and fan out a message. Requires an active match.
    ///
    /// The sender's connections get `MessageSent` carrying the `temp_id`; the
    /// receiver's get `NewMessage`. An offline receiver gets a push instead and
    /// the message stays `sent` until they ack it.
    pub async fn send(&self, sender: Uuid, outgoing: OutgoingMessage) -> Result<Message> {
        if outgoing.receiver_id == sender {
            return Err(KindredError::validation("cannot message yourself"));
        }
        outgoing.validate()?;

        let key = PairKey::new(sender, outgoing.receiver_id);
        self.require_active(key).await?;
        let conversation_id = key.conversation_id();

        if let Some(reply_to) = outgoing.reply_to_id {
            let conversation = conversation_id.clone();
            let in_conversation = blocking(&self.db, move |db| {
                Ok(db
                    .get_message(reply_to)?
                    .is_some_and(|m| m.conversation_id == conversation))
            })
            .await?;
            if !in_conversation {
                return Err(KindredError::validation("reply target is not in this conversation"));
            }
        }

        let now = Utc::now();
        let online = self.presence.is_online(outgoing.receiver_id).await;
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: sender,
            receiver_id: outgoing.receiver_id,
            kind: outgoing.kind,
            content: outgoing.content,
            media: outgoing.media,
            reply_to_id: outgoing.reply_to_id,
            status: if online { MessageStatus::Delivered } else { MessageStatus::Sent },
            is_pinned: false,
            pinned_by: None,
            starred_by: BTreeSet::new(),
            deleted_for_everyone: false,
            deleted_for: BTreeSet::new(),
            created_at: now,
            delivered_at: online.then_some(now),
            read_at: None,
        };
        let message = blocking(&self.db, move |db| {
            db.append_message(&message)?;
            Ok(message)
        })
        .await?;
        debug!(
            message_id = %message.id,
            %sender,
            receiver = %message.receiver_id,
            online,
            "Message stored"
        );

        if let Some(view) = message.view_for(sender) {
            self.presence
                .send_to_user(
                    sender,
                    GatewayEvent::MessageSent {
                        temp_id: outgoing.temp_id,
                        message: view,
                    },
                )
                .await;
        }
        self.push_new_message(&message, online).await;
        Ok(message)
    }

    /// Deliver an already-stored message to its receiver: live if connected,
    /// by push otherwise.
    pub(crate) async fn push_new_message(&self, message: &Message, online: bool) {
        if let Some(view) = message.view_for(message.receiver_id) {
            self.presence
                .send_to_user(message.receiver_id, GatewayEvent::NewMessage { message: view })
                .await;
        }
        if online {
            return;
        }
        let sender_name = display_name(&self.db, message.sender_id).await;
        dispatch_best_effort(
            self.notifier.as_ref(),
            message.receiver_id,
            Notification::message(
                sender_name.as_deref(),
                &message.preview(),
                &message.conversation_id,
                message.sender_id,
            ),
        )
        .await;
    }

    /// Receiver confirms receipt. Only moves `sent -> delivered`.
    pub async fn ack_delivered(&self, actor: Uuid, message_id: Uuid) -> Result<()> {
        let message = self.load(message_id).await?;
        if message.receiver_id != actor {
            return Err(KindredError::forbidden("only the receiver can acknowledge a message"));
        }
        let at = Utc::now();
        let changed = blocking(&self.db, move |db| db.mark_delivered(message_id, at)).await?;
        if changed {
            self.presence
                .send_to_user(
                    message.sender_id,
                    GatewayEvent::MessageDelivered {
                        message_id,
                        conversation_id: message.conversation_id,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Bulk read receipt for everything `actor` received in the conversation.
    pub async fn mark_read(&self, actor: Uuid, conversation_id: &str) -> Result<usize> {
        let key = PairKey::from_conversation_id(conversation_id)
            .ok_or_else(|| KindredError::validation("malformed conversation id"))?;
        let Some(other) = key.other(actor) else {
            return Err(KindredError::forbidden("not a party to this conversation"));
        };

        let read_at = Utc::now();
        let conversation = conversation_id.to_string();
        let updated = blocking(&self.db, move |db| {
            db.mark_conversation_read(&conversation, actor, read_at)
        })
        .await?;
        if updated > 0 {
            debug!(%actor, conversation_id, updated, "Conversation read");
            self.presence
                .send_to_user(
                    other,
                    GatewayEvent::MessagesRead {
                        conversation_id: conversation_id.to_string(),
                        read_by: actor,
                        read_at,
                    },
                )
                .await;
        }
        Ok(updated)
    }

    /// Either party may pin or unpin. At most one message per conversation is pinned.
    pub async fn set_pinned(&self, actor: Uuid, message_id: Uuid, pin: bool) -> Result<()> {
        let message = self.load_for_party(actor, message_id).await?;
        if pin && message.deleted_for_everyone {
            return Err(KindredError::conflict("cannot pin a deleted message"));
        }

        let stored = message.clone();
        let unpinned = blocking(&self.db, move |db| db.set_pinned(&stored, actor, pin)).await?;
        let event = GatewayEvent::MessagePinned {
            message_id,
            conversation_id: message.conversation_id.clone(),
            is_pinned: pin,
            pinned_by: pin.then_some(actor),
            unpinned_message_id: unpinned,
        };
        self.broadcast_pair(&message, event).await;
        Ok(())
    }

    /// Per-user star toggle. Both parties hear about it; only the actor's
    /// connections see `by_me`.
    pub async fn set_starred(&self, actor: Uuid, message_id: Uuid, star: bool) -> Result<()> {
        let message = self.load_for_party(actor, message_id).await?;
        blocking(&self.db, move |db| db.set_starred(message_id, actor, star)).await?;

        for to in [message.sender_id, message.receiver_id] {
            self.presence
                .send_to_user(
                    to,
                    GatewayEvent::MessageStarred {
                        message_id,
                        conversation_id: message.conversation_id.clone(),
                        actor_id: actor,
                        is_starred: star,
                        by_me: to == actor,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Delete for everyone (sender only, inside the window) or for the actor alone.
    pub async fn delete(&self, actor: Uuid, message_id: Uuid, for_everyone: bool) -> Result<()> {
        let message = self.load_for_party(actor, message_id).await?;

        if !for_everyone {
            blocking(&self.db, move |db| db.hide_for_user(message_id, actor)).await?;
            self.presence
                .send_to_user(
                    actor,
                    GatewayEvent::MessageDeleted {
                        message_id,
                        conversation_id: message.conversation_id,
                        for_everyone: false,
                    },
                )
                .await;
            return Ok(());
        }

        if message.sender_id != actor {
            return Err(KindredError::forbidden("only the sender can delete for everyone"));
        }
        if !self.within_delete_window(message.created_at, Utc::now()) {
            return Err(KindredError::conflict("delete window has passed"));
        }
        if !message.deleted_for_everyone {
            blocking(&self.db, move |db| db.delete_for_everyone(message_id)).await?;
            info!(%message_id, %actor, "Message deleted for everyone");
        }

        let event = GatewayEvent::MessageDeleted {
            message_id,
            conversation_id: message.conversation_id.clone(),
            for_everyone: true,
        };
        self.broadcast_pair(&message, event).await;
        Ok(())
    }

    /// One page of `viewer`'s conversation with `other`, oldest first. Pass
    /// the oldest message of the previous page as `before`.
    pub async fn history(
        &self,
        viewer: Uuid,
        other: Uuid,
        before: Option<HistoryCursor>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageView>> {
        if viewer == other {
            return Err(KindredError::validation("no conversation with yourself"));
        }
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        let conversation_id = PairKey::new(viewer, other).conversation_id();

        let page = blocking(&self.db, move |db| {
            db.get_history(&conversation_id, viewer, before, limit)
        })
        .await?;
        Ok(page.iter().filter_map(|m| m.view_for(viewer)).collect())
    }

    // -- Ephemeral relays --

    pub async fn typing(&self, actor: Uuid, receiver: Uuid, is_typing: bool) -> Result<()> {
        self.relay(actor, receiver, GatewayEvent::UserTyping { user_id: actor, is_typing })
            .await
    }

    pub async fn recording(&self, actor: Uuid, receiver: Uuid, is_recording: bool) -> Result<()> {
        let event = GatewayEvent::UserRecording {
            user_id: actor,
            is_recording,
        };
        self.relay(actor, receiver, event).await
    }

    pub async fn join_chat(&self, actor: Uuid, receiver: Uuid) -> Result<()> {
        self.require_active(PairKey::new(actor, receiver)).await?;
        self.presence.set_in_chat_with(actor, Some(receiver)).await;
        self.presence
            .send_to_user(receiver, GatewayEvent::UserJoinedChat { user_id: actor })
            .await;
        Ok(())
    }

    pub async fn leave_chat(&self, actor: Uuid, receiver: Uuid) -> Result<()> {
        if self.presence.in_chat_with(actor).await == Some(receiver) {
            self.presence.set_in_chat_with(actor, None).await;
        }
        self.presence
            .send_to_user(receiver, GatewayEvent::UserLeftChat { user_id: actor })
            .await;
        Ok(())
    }

    pub async fn presence_ack(&self, actor: Uuid, receiver: Uuid) -> Result<()> {
        self.relay(actor, receiver, GatewayEvent::ChatPresenceAck { user_id: actor })
            .await
    }

    /// Online/offline updates about `target`, delivered to one connection.
    /// Only users with an active match may watch each other.
    pub async fn subscribe_presence(
        &self,
        actor: Uuid,
        conn_id: ConnId,
        target: Uuid,
    ) -> Result<()> {
        self.require_active(PairKey::new(actor, target)).await?;
        self.presence.subscribe(actor, conn_id, target).await;
        Ok(())
    }

    async fn relay(&self, actor: Uuid, receiver: Uuid, event: GatewayEvent) -> Result<()> {
        self.require_active(PairKey::new(actor, receiver)).await?;
        let reached = self.presence.send_to_user(receiver, event).await;
        trace!(%actor, %receiver, reached, "Relayed ephemeral event");
        Ok(())
    }

    // -- Helpers --

    fn within_delete_window(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created_at <= self.delete_window
    }

    async fn require_active(&self, key: PairKey) -> Result<()> {
        match blocking(&self.db, move |db| db.get_match_by_pair(&key)).await? {
            Some(m) if m.status == MatchStatus::Active => Ok(()),
            Some(_) => Err(KindredError::conflict("match not active")),
            None => Err(KindredError::conflict("no match between these users")),
        }
    }

    async fn load(&self, message_id: Uuid) -> Result<Message> {
        blocking(&self.db, move |db| db.get_message(message_id))
            .await?
            .ok_or(KindredError::NotFound("message"))
    }

    async fn load_for_party(&self, actor: Uuid, message_id: Uuid) -> Result<Message> {
        let message = self.load(message_id).await?;
        if !message.is_party(actor) {
            return Err(KindredError::forbidden("not a party to this conversation"));
        }
        Ok(message)
    }

    async fn broadcast_pair(&self, message: &Message, event: GatewayEvent) {
        self.presence.send_to_user(message.sender_id, event.clone()).await;
        self.presence.send_to_user(message.receiver_id, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;
    use crate::testing::{Harness, drain};
    use kindred_types::models::{DELETED_MESSAGE_MARKER, SwipeAction};

    fn text(receiver: Uuid, temp_id: &str, body: &str) -> OutgoingMessage {
        OutgoingMessage::text(receiver, temp_id, body)
    }

    async fn message_pushes(h: &Harness, to: Uuid) -> Vec<Notification> {
        h.notifier
            .sent_to(to)
            .await
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Message)
            .collect()
    }

    #[tokio::test]
    async fn test_pending_match_rejects_send() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.matches.swipe(a, b, SwipeAction::Like).await.unwrap();

        let err = h.delivery.send(a, text(b, "t1", "hi")).await.unwrap_err();
        match err {
            KindredError::StateConflict(reason) => assert_eq!(reason, "match not active"),
            other => panic!("unexpected error {other:?}"),
        }

        let err = h.delivery.send(a, text(a, "t1", "hi")).await.unwrap_err();
        assert!(matches!(err, KindredError::Validation(_)));
    }

    #[tokio::test]
    async fn test_send_online_receiver_is_delivered_and_echoed() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let (_ac, mut a_rx) = h.presence.register(a).await;
        let (_bc, mut b_rx) = h.presence.register(b).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        let stored = h.delivery.send(a, text(b, "t1", "hello")).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);

        match drain(&mut a_rx).as_slice() {
            [GatewayEvent::MessageSent { temp_id, message }] => {
                assert_eq!(temp_id, "t1");
                assert_eq!(message.id, stored.id);
            }
            other => panic!("unexpected sender events {other:?}"),
        }
        assert!(matches!(
            drain(&mut b_rx).as_slice(),
            [GatewayEvent::NewMessage { message }] if message.id == stored.id
        ));
        assert!(message_pushes(&h, b).await.is_empty());

        let m = h.db.get_match_by_pair(&PairKey::new(a, b)).unwrap().unwrap();
        assert!(m.last_message_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_receiver_gets_push_and_ack_later() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let (_ac, mut a_rx) = h.presence.register(a).await;

        let stored = h.delivery.send(a, text(b, "t1", "you there?")).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        let pushes = message_pushes(&h, b).await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].body, "you there?");
        drain(&mut a_rx);

        assert!(matches!(
            h.delivery.ack_delivered(a, stored.id).await,
            Err(KindredError::Forbidden(_))
        ));
        h.delivery.ack_delivered(b, stored.id).await.unwrap();
        assert!(matches!(
            drain(&mut a_rx).as_slice(),
            [GatewayEvent::MessageDelivered { message_id, .. }] if *message_id == stored.id
        ));

        // Second ack is a no-op.
        h.delivery.ack_delivered(b, stored.id).await.unwrap();
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_authorises_from_conversation_id() {
        let h = Harness::new(3);
        let (a, b, c) = (h.users[0], h.users[1], h.users[2]);
        h.activate(a, b).await;
        let (_ac, mut a_rx) = h.presence.register(a).await;
        let stored = h.delivery.send(a, text(b, "t1", "hi")).await.unwrap();
        drain(&mut a_rx);

        let conv = stored.conversation_id.clone();
        assert!(matches!(h.delivery.mark_read(c, &conv).await, Err(KindredError::Forbidden(_))));
        assert!(matches!(
            h.delivery.mark_read(b, "garbage").await,
            Err(KindredError::Validation(_))
        ));

        assert_eq!(h.delivery.mark_read(b, &conv).await.unwrap(), 1);
        assert!(matches!(
            drain(&mut a_rx).as_slice(),
            [GatewayEvent::MessagesRead { read_by, .. }] if *read_by == b
        ));
        assert_eq!(h.db.get_message(stored.id).unwrap().unwrap().status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn test_pin_exclusive_and_either_party_unpins() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let m1 = h.delivery.send(a, text(b, "t1", "one")).await.unwrap();
        let m2 = h.delivery.send(b, text(a, "t2", "two")).await.unwrap();

        h.delivery.set_pinned(a, m1.id, true).await.unwrap();
        h.delivery.set_pinned(b, m2.id, true).await.unwrap();
        let history = h.delivery.history(a, b, None, None).await.unwrap();
        let pinned: Vec<Uuid> = history.iter().filter(|m| m.is_pinned).map(|m| m.id).collect();
        assert_eq!(pinned, vec![m2.id]);

        h.delivery.set_pinned(a, m2.id, false).await.unwrap();
        let history = h.delivery.history(a, b, None, None).await.unwrap();
        assert!(history.iter().all(|m| !m.is_pinned));
    }

    #[tokio::test]
    async fn test_star_flags_only_the_actor() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let msg = h.delivery.send(a, text(b, "t1", "star me")).await.unwrap();
        let (_ac, mut a_rx) = h.presence.register(a).await;
        let (_bc, mut b_rx) = h.presence.register(b).await;

        h.delivery.set_starred(b, msg.id, true).await.unwrap();
        assert!(matches!(
            drain(&mut b_rx).as_slice(),
            [GatewayEvent::MessageStarred { by_me: true, .. }]
        ));
        assert!(matches!(
            drain(&mut a_rx).as_slice(),
            [GatewayEvent::MessageStarred { by_me: false, .. }]
        ));

        assert!(h.delivery.history(b, a, None, None).await.unwrap()[0].starred_by_me);
        assert!(!h.delivery.history(a, b, None, None).await.unwrap()[0].starred_by_me);
    }

    #[tokio::test]
    async fn test_delete_for_everyone_shows_marker_to_both() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let msg = h.delivery.send(a, text(b, "t1", "regret")).await.unwrap();

        assert!(matches!(
            h.delivery.delete(b, msg.id, true).await,
            Err(KindredError::Forbidden(_))
        ));
        h.delivery.delete(a, msg.id, true).await.unwrap();

        for (viewer, other) in [(a, b), (b, a)] {
            let history = h.delivery.history(viewer, other, None, None).await.unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].content.as_deref(), Some(DELETED_MESSAGE_MARKER));
            assert!(history[0].deleted_for_everyone);
        }
    }

    #[tokio::test]
    async fn test_delete_outside_window_is_conflict() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let mut old = h.delivery.send(a, text(b, "t1", "ancient")).await.unwrap();
        old.id = Uuid::new_v4();
        old.created_at = Utc::now() - Duration::minutes(61);
        h.db.append_message(&old).unwrap();

        assert!(matches!(
            h.delivery.delete(a, old.id, true).await,
            Err(KindredError::StateConflict(_))
        ));
        // Deleting for oneself has no window.
        h.delivery.delete(a, old.id, false).await.unwrap();
        let mine = h.delivery.history(a, b, None, None).await.unwrap();
        assert!(mine.iter().all(|m| m.id != old.id));
        assert_eq!(h.delivery.history(b, a, None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_cursor_walks_back_through_pages() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        let mut sent = Vec::new();
        for i in 0..5 {
            let body = format!("m{i}");
            sent.push(h.delivery.send(a, text(b, "t", &body)).await.unwrap().id);
        }

        let mut seen = Vec::new();
        let mut before = None;
        loop {
            let page = h.delivery.history(b, a, before, Some(2)).await.unwrap();
            let Some(oldest) = page.first() else {
                break;
            };
            before = Some(HistoryCursor::new(oldest.created_at, oldest.id));
            seen.extend(page.iter().map(|m| m.id));
        }
        assert_eq!(seen.len(), 5);
        seen.sort();
        seen.dedup();
        sent.sort();
        assert_eq!(seen, sent);
    }

    #[tokio::test]
    async fn test_reply_must_stay_in_conversation() {
        let h = Harness::new(3);
        let (a, b, c) = (h.users[0], h.users[1], h.users[2]);
        h.activate(a, b).await;
        h.activate(a, c).await;
        let elsewhere = h.delivery.send(a, text(c, "t1", "hi c")).await.unwrap();
        let here = h.delivery.send(a, text(b, "t2", "hi b")).await.unwrap();

        let mut reply = text(b, "t3", "re");
        reply.reply_to_id = Some(elsewhere.id);
        assert!(matches!(
            h.delivery.send(a, reply.clone()).await,
            Err(KindredError::Validation(_))
        ));

        reply.reply_to_id = Some(here.id);
        assert_eq!(h.delivery.send(a, reply).await.unwrap().reply_to_id, Some(here.id));
    }

    #[tokio::test]
    async fn test_media_kinds_need_media() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;

        let mut image = text(b, "t1", "");
        image.kind = MessageKind::Image;
        image.content = None;
        assert!(matches!(
            h.delivery.send(a, image.clone()).await,
            Err(KindredError::Validation(_))
        ));

        image.media = Some(MediaRef {
            url: Some("https://cdn.example/p.jpg".into()),
            ..Default::default()
        });
        assert_eq!(h.delivery.send(a, image).await.unwrap().kind, MessageKind::Image);
    }

    #[tokio::test]
    async fn test_typing_needs_active_match() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        assert!(matches!(
            h.delivery.typing(a, b, true).await,
            Err(KindredError::StateConflict(_))
        ));

        h.activate(a, b).await;
        let (_bc, mut b_rx) = h.presence.register(b).await;
        drain(&mut b_rx);
        h.delivery.typing(a, b, true).await.unwrap();
        assert!(matches!(
            drain(&mut b_rx).as_slice(),
            [GatewayEvent::UserTyping { is_typing: true, .. }]
        ));
    }

    #[tokio::test]
    async fn test_presence_subscription_needs_active_match() {
        let h = Harness::new(3);
        let (a, b, stranger) = (h.users[0], h.users[1], h.users[2]);
        h.activate(a, b).await;
        let (conn, mut rx) = h.presence.register(a).await;
        drain(&mut rx);

        assert!(matches!(
            h.delivery.subscribe_presence(a, conn, stranger).await,
            Err(KindredError::StateConflict(_))
        ));
        assert!(drain(&mut rx).is_empty());

        h.delivery.subscribe_presence(a, conn, b).await.unwrap();
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [GatewayEvent::UserStatusChange { user_id, online: false }] if *user_id == b
        ));
    }
}
