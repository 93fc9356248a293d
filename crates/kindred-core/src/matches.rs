use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use kindred_db::{Database, LikeOutcome, LikeTransition, RespondOutcome};
use kindred_types::api::{
    InteractionResponse, LastMessage, MatchListing, MatchSummary, RespondResponse, RespondStatus,
};
use kindred_types::events::GatewayEvent;
use kindred_types::models::{Match, MatchStatus, SwipeAction};

use crate::error::{KindredError, Result};
use crate::notify::{Notification, NotificationDispatcher, dispatch_best_effort};
use crate::presence::PresenceRegistry;
use crate::{blocking, display_name};

/// Swipes, responses and the match list.
pub struct MatchService {
    db: Arc<Database>,
    presence: PresenceRegistry,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl MatchService {
    pub fn new(
        db: Arc<Database>,
        presence: PresenceRegistry,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            db,
            presence,
            notifier,
        }
    }

    /// Record a swipe. Likes run the match rule; passes only touch the
    /// interaction log.
    pub async fn swipe(
        &self,
        actor: Uuid,
        target: Uuid,
        action: SwipeAction,
    ) -> Result<InteractionResponse> {
        if actor == target {
            return Err(KindredError::validation("cannot swipe on yourself"));
        }
        let exists = blocking(&self.db, move |db| Ok(db.get_profile(target)?.is_some())).await?;
        if !exists {
            return Err(KindredError::NotFound("user"));
        }

        let now = Utc::now();
        if !action.is_like() {
            blocking(&self.db, move |db| {
                db.record_interaction(actor, target, action, now)
            })
            .await?;
            return Ok(InteractionResponse {
                action,
                match_summary: None,
            });
        }

        let outcome =
            blocking(&self.db, move |db| db.record_like(actor, target, action, now)).await?;
        self.announce(&outcome, actor, action == SwipeAction::Superlike)
            .await;

        Ok(InteractionResponse {
            action,
            match_summary: Some(summary(&outcome)),
        })
    }

    /// Accept or decline a pending like addressed to `actor`.
    pub async fn respond(
        &self,
        match_id: Uuid,
        actor: Uuid,
        accept: bool,
    ) -> Result<RespondResponse> {
        let now = Utc::now();
        let outcome = blocking(&self.db, move |db| {
            db.respond_to_match(match_id, actor, accept, now)
        })
        .await?;

        match outcome {
            RespondOutcome::Missing => Err(KindredError::NotFound("match")),
            RespondOutcome::NotParty => Err(KindredError::forbidden("not a party to this match")),
            RespondOutcome::AlreadyLiked(_) => {
                Err(KindredError::forbidden("cannot respond to your own like"))
            }
            RespondOutcome::NotPending(m) => Err(KindredError::conflict(format!(
                "match is already {}",
                m.status.as_str()
            ))),
            RespondOutcome::Declined(m) => {
                info!(match_id = %m.id, %actor, "Match declined");
                Ok(RespondResponse {
                    match_id,
                    status: RespondStatus::Declined,
                })
            }
            RespondOutcome::Accepted(outcome) => {
                self.announce(&outcome, actor, false).await;
                Ok(RespondResponse {
                    match_id,
                    status: RespondStatus::Active,
                })
            }
        }
    }

    /// Pending and active matches with the other user's public profile.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MatchListing>> {
        blocking(&self.db, move |db| listings(db, user_id)).await
    }

    /// Live events and pushes for a like that changed the match store.
    async fn announce(&self, outcome: &LikeOutcome, actor: Uuid, is_super: bool) {
        let m = &outcome.row;
        let Some(other) = m.other_party(actor) else {
            return;
        };

        match outcome.transition {
            LikeTransition::Created => {
                info!(match_id = %m.id, %actor, %other, "Like pending");
                self.presence
                    .send_to_user(
                        other,
                        GatewayEvent::MatchRequest {
                            match_id: m.id,
                            from_user_id: actor,
                            is_super,
                        },
                    )
                    .await;
                let name = display_name(&self.db, actor).await;
                dispatch_best_effort(
                    self.notifier.as_ref(),
                    other,
                    Notification::like_request(name.as_deref(), m.id, actor, is_super),
                )
                .await;
            }
            LikeTransition::Activated => {
                info!(match_id = %m.id, %actor, %other, "Match active");
                announce_match_created(&self.presence, m).await;
                // The side that liked first learns about it by push.
                let name = display_name(&self.db, actor).await;
                dispatch_best_effort(
                    self.notifier.as_ref(),
                    other,
                    Notification::matched(name.as_deref(), m.id, actor, None),
                )
                .await;
            }
            LikeTransition::Unchanged | LikeTransition::AlreadyActive | LikeTransition::Closed => {}
        }
    }
}

fn listings(db: &Database, user_id: Uuid) -> anyhow::Result<Vec<MatchListing>> {
    let mut listings = Vec::new();
    for m in db.list_matches_for_user(user_id)? {
        let Some(other) = m.other_party(user_id) else {
            continue;
        };
        let Some(profile) = db.get_profile(other)? else {
            warn!(match_id = %m.id, %other, "Match references a missing user");
            continue;
        };

        let conversation_id = m.conversation_id();
        let (last_message, unread_count) = if m.status == MatchStatus::Active {
            let last = db.last_message(&conversation_id, user_id)?.and_then(|msg| {
                let view = msg.view_for(user_id)?;
                Some(LastMessage {
                    preview: if view.deleted_for_everyone {
                        view.content.unwrap_or_default()
                    } else {
                        msg.preview()
                    },
                    kind: view.kind,
                    sender_id: view.sender_id,
                    created_at: view.created_at,
                })
            });
            (last, db.unread_count(&conversation_id, user_id)?)
        } else {
            (None, 0)
        };

        listings.push(MatchListing {
            match_id: m.id,
            conversation_id,
            status: m.status,
            is_initiator: m.initiator_id == user_id,
            user: profile.to_public(),
            last_message,
            unread_count,
            last_activity_at: m.last_message_at.unwrap_or(m.created_at),
        });
    }
    Ok(listings)
}

pub(crate) async fn announce_match_created(presence: &PresenceRegistry, m: &Match) {
    let conversation_id = m.conversation_id();
    for (to, with) in [(m.user1_id, m.user2_id), (m.user2_id, m.user1_id)] {
        presence
            .send_to_user(
                to,
                GatewayEvent::MatchCreated {
                    match_id: m.id,
                    user_id: with,
                    conversation_id: conversation_id.clone(),
                },
            )
            .await;
    }
}

fn summary(outcome: &LikeOutcome) -> MatchSummary {
    MatchSummary {
        id: outcome.row.id,
        status: outcome.row.status,
        is_mutual: outcome.is_mutual(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Policy;
    use crate::notify::{NotificationKind, RecordingDispatcher};
    use crate::testing::Harness;

    async fn like(h: &Harness, actor: Uuid, target: Uuid) -> MatchSummary {
        h.matches
            .swipe(actor, target, SwipeAction::Like)
            .await
            .unwrap()
            .match_summary
            .unwrap()
    }

    #[tokio::test]
    async fn test_like_then_like_back_activates_and_notifies() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        let (_conn, mut b_rx) = h.presence.register(b).await;

        let pending = like(&h, a, b).await;
        assert_eq!(pending.status, MatchStatus::Pending);
        assert!(!pending.is_mutual);
        assert!(matches!(
            b_rx.try_recv(),
            Ok(GatewayEvent::MatchRequest { from_user_id, .. }) if from_user_id == a
        ));

        let second = h.matches.swipe(b, a, SwipeAction::Superlike).await.unwrap();
        let active = second.match_summary.unwrap();
        assert_eq!(active.id, pending.id);
        assert!(active.is_mutual);
        assert!(matches!(
            b_rx.try_recv(),
            Ok(GatewayEvent::MatchCreated { user_id, .. }) if user_id == a
        ));

        let to_a = h.notifier.sent_to(a).await;
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].kind, NotificationKind::Match);
        assert_eq!(h.notifier.sent_to(b).await[0].kind, NotificationKind::LikeRequest);
    }

    #[tokio::test]
    async fn test_push_failure_does_not_undo_match() {
        let h = Harness::with_notifier(2, Arc::new(RecordingDispatcher::failing()));
        let (a, b) = (h.users[0], h.users[1]);

        like(&h, a, b).await;
        assert!(like(&h, b, a).await.is_mutual);
    }

    #[tokio::test]
    async fn test_pass_and_validation() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);

        let res = h.matches.swipe(a, b, SwipeAction::Pass).await.unwrap();
        assert!(res.match_summary.is_none());
        assert!(h.matches.list_for_user(a).await.unwrap().is_empty());

        assert!(matches!(
            h.matches.swipe(a, a, SwipeAction::Like).await,
            Err(KindredError::Validation(_))
        ));
        assert!(matches!(
            h.matches.swipe(a, Uuid::new_v4(), SwipeAction::Like).await,
            Err(KindredError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn test_respond_error_mapping() {
        let h = Harness::new(3);
        let (a, b, c) = (h.users[0], h.users[1], h.users[2]);
        let id = like(&h, a, b).await.id;

        assert!(matches!(
            h.matches.respond(Uuid::new_v4(), b, true).await,
            Err(KindredError::NotFound(_))
        ));
        assert!(matches!(h.matches.respond(id, c, true).await, Err(KindredError::Forbidden(_))));
        assert!(matches!(h.matches.respond(id, a, true).await, Err(KindredError::Forbidden(_))));

        let accepted = h.matches.respond(id, b, true).await.unwrap();
        assert_eq!(accepted.status, RespondStatus::Active);
        assert!(matches!(
            h.matches.respond(id, b, true).await,
            Err(KindredError::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_decline_removes_match_and_keeps_pair_out_of_discovery() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        let id = like(&h, a, b).await.id;

        let res = h.matches.respond(id, b, false).await.unwrap();
        assert_eq!(res.status, RespondStatus::Declined);
        assert!(h.db.get_match(id).unwrap().is_none());
        assert!(h.matches.list_for_user(a).await.unwrap().is_empty());

        // a liked b and b passed on a, so neither sees the other again.
        for (viewer, other) in [(a, b), (b, a)] {
            let ranked = h.discovery.rank(viewer, Policy::Feed).await.unwrap();
            assert!(ranked.iter().all(|c| c.profile.id != other));
        }
    }

    #[tokio::test]
    async fn test_listing_shows_public_profile_and_unread() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);
        h.activate(a, b).await;
        h.delivery
            .send(a, crate::delivery::OutgoingMessage::text(b, "t1", "hello there"))
            .await
            .unwrap();

        let listed = h.matches.list_for_user(b).await.unwrap();
        assert_eq!(listed.len(), 1);
        let entry = &listed[0];
        assert_eq!(entry.user.id, a);
        assert!(!entry.is_initiator);
        assert_eq!(entry.unread_count, 1);
        assert_eq!(entry.last_message.as_ref().unwrap().preview, "hello there");

        let json = serde_json::to_value(entry).unwrap();
        assert!(json["user"].get("email").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_swipes_from_many_tasks_settle_on_one_match() {
        let h = Harness::new(2);
        let (a, b) = (h.users[0], h.users[1]);

        let mut tasks = Vec::new();
        for (actor, target) in [(a, b), (b, a), (a, b), (b, a)] {
            let matches = h.matches.clone();
            tasks.push(tokio::spawn(async move {
                matches.swipe(actor, target, SwipeAction::Like).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let listed = h.matches.list_for_user(a).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, MatchStatus::Active);
    }
}
