use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use kindred_db::{Database, LikeTransition, NearbyRow};
use kindred_types::api::QuickHelloResponse;
use kindred_types::events::{GatewayEvent, NearbyUser};
use kindred_types::geo::{BoundingBox, GeoPoint};
use kindred_types::ids::PairKey;
use kindred_types::models::{MatchStatus, Message, MessageKind, MessageStatus};

use crate::error::{KindredError, Result};
use crate::matches::announce_match_created;
use crate::notify::{Notification, NotificationDispatcher, dispatch_best_effort};
use crate::presence::PresenceRegistry;
use crate::{blocking, display_name};

pub const MAX_NEARBY_RADIUS_M: f64 = 5000.0;
pub const MAX_QUICK_HELLO_LEN: usize = 500;

/// Distance shown to others. Users hiding their exact distance are reported
/// in 100 m bands, rounded up.
pub fn display_distance(distance_m: f64, exact: bool) -> u32 {
    if exact {
        distance_m.round() as u32
    } else {
        ((distance_m / 100.0).ceil().max(1.0) * 100.0) as u32
    }
}

/// Location fixes, the connect-now encounter fan-out and quick hello.
pub struct ProximityNotifier {
    db: Arc<Database>,
    presence: PresenceRegistry,
    notifier: Arc<dyn NotificationDispatcher>,
    radius_m: f64,
    cooldown: Duration,
    /// Last notified encounter per unordered pair.
    encounters: Mutex<HashMap<PairKey, Instant>>,
}

impl ProximityNotifier {
    pub fn new(
        db: Arc<Database>,
        presence: PresenceRegistry,
        notifier: Arc<dyn NotificationDispatcher>,
        radius_m: f64,
        cooldown: Duration,
    ) -> Self {
        Self {
            db,
            presence,
            notifier,
            radius_m,
            cooldown,
            encounters: Mutex::new(HashMap::new()),
        }
    }

    /// Store a fix. Connect-now users also run an encounter check; the
    /// returned list is everyone currently in range, notified or not.
    pub async fn on_location_update(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<NearbyUser>> {
        let point = GeoPoint::new(latitude, longitude)
            .ok_or_else(|| KindredError::validation("coordinates out of range"))?;
        let now = Utc::now();
        let profile = blocking(&self.db, move |db| {
            if !db.update_location(user_id, point, now)? {
                return Ok(None);
            }
            db.get_profile(user_id)
        })
        .await?
        .ok_or(KindredError::NotFound("user"))?;

        let nearby = if profile.connect_now_enabled {
            self.detect(user_id, point).await?
        } else {
            Vec::new()
        };

        self.presence
            .send_to_user(
                user_id,
                GatewayEvent::LocationUpdated {
                    nearby_count: nearby.len(),
                },
            )
            .await;
        Ok(nearby)
    }

    /// Announce every confirmed pair to both sides, subject to the encounter
    /// cooldown.
    async fn detect(&self, user_id: Uuid, point: GeoPoint) -> Result<Vec<NearbyUser>> {
        let me = blocking(&self.db, move |db| db.get_profile(user_id))
            .await?
            .ok_or(KindredError::NotFound("user"))?;
        let hits = self.within(user_id, point, self.radius_m).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let now = Instant::now();
        let mut nearby = Vec::with_capacity(hits.len());
        for (row, distance) in hits {
            let shown_to_me = nearby_user(&row, distance, None);
            nearby.push(shown_to_me.clone());

            if !self.start_encounter(PairKey::new(user_id, row.id), now).await {
                debug!(%user_id, other = %row.id, "Encounter still cooling down");
                continue;
            }
            info!(%user_id, other = %row.id, distance_m = distance.round(), "Users nearby");

            let shown_to_them = NearbyUser {
                user_id,
                display_name: me.display_name.clone(),
                photo: me.first_photo(),
                distance_m: display_distance(distance, me.show_exact_distance),
                show_exact_distance: me.show_exact_distance,
                match_status: None,
            };

            let (my_name, their_name) = (me.display_name.clone(), row.display_name.clone());
            self.announce(user_id, shown_to_me, their_name).await;
            self.announce(row.id, shown_to_them, my_name).await;
        }
        Ok(nearby)
    }

    async fn announce(&self, to: Uuid, user: NearbyUser, name: Option<String>) {
        let (about, distance_m) = (user.user_id, user.distance_m);
        let reached = self
            .presence
            .send_to_user(to, GatewayEvent::NearbyUserEntered { user })
            .await;
        if reached == 0 {
            dispatch_best_effort(
                self.notifier.as_ref(),
                to,
                Notification::nearby_user(name.as_deref(), about, distance_m),
            )
            .await;
        }
    }

    /// False while the pair is inside its cooldown. A zero cooldown never suppresses.
    async fn start_encounter(&self, key: PairKey, now: Instant) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }
        let mut encounters = self.encounters.lock().await;
        encounters.retain(|_, seen| now.duration_since(*seen) < self.cooldown);
        if encounters.contains_key(&key) {
            return false;
        }
        encounters.insert(key, now);
        true
    }

    /// Connect-now users within `radius_m`, closest first, confirmed by
    /// great-circle distance.
    async fn within(
        &self,
        user_id: Uuid,
        point: GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<(NearbyRow, f64)>> {
        let bbox = BoundingBox::around(&point, radius_m);
        let rows = blocking(&self.db, move |db| db.connect_now_users_in_box(user_id, &bbox)).await?;
        let mut hits: Vec<(NearbyRow, f64)> = rows
            .into_iter()
            .map(|row| {
                let d = point.distance_m(&row.location);
                (row, d)
            })
            .filter(|(_, d)| *d <= radius_m)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hits)
    }

    pub async fn set_connect_now(&self, user_id: Uuid, enabled: bool) -> Result<bool> {
        let location = blocking(&self.db, move |db| {
            if !db.set_connect_now(user_id, enabled)? {
                return Ok(None);
            }
            Ok(Some(db.get_profile(user_id)?.and_then(|p| p.location)))
        })
        .await?
        .ok_or(KindredError::NotFound("user"))?;
        info!(%user_id, enabled, "Connect now toggled");
        self.presence
            .send_to_user(user_id, GatewayEvent::ConnectNowToggled { enabled })
            .await;

        if let (true, Some(point)) = (enabled, location) {
            self.detect(user_id, point).await?;
        }
        Ok(enabled)
    }

    pub async fn set_show_exact_distance(&self, user_id: Uuid, show: bool) -> Result<bool> {
        let found = blocking(&self.db, move |db| db.set_show_exact_distance(user_id, show)).await?;
        if !found {
            return Err(KindredError::NotFound("user"));
        }
        Ok(show)
    }

    /// Connect-now users near the caller's stored fix, with the match status
    /// each one has toward the caller.
    pub async fn nearby(&self, user_id: Uuid, radius_m: Option<f64>) -> Result<Vec<NearbyUser>> {
        let radius = radius_m.unwrap_or(self.radius_m);
        if !radius.is_finite() || radius <= 0.0 {
            return Err(KindredError::validation("radius must be positive"));
        }
        let radius = radius.min(MAX_NEARBY_RADIUS_M);

        let profile = blocking(&self.db, move |db| db.get_profile(user_id))
            .await?
            .ok_or(KindredError::NotFound("user"))?;
        let Some(point) = profile.location else {
            return Err(KindredError::validation("location not set"));
        };

        let hits = self.within(user_id, point, radius).await?;
        blocking(&self.db, move |db| {
            hits.into_iter()
                .map(|(row, distance)| {
                    let status = db
                        .get_match_by_pair(&PairKey::new(user_id, row.id))?
                        .map(|m| m.status);
                    Ok(nearby_user(&row, distance, status))
                })
                .collect()
        })
        .await
    }

    /// First message to a nearby stranger. Creates or advances the match by
    /// the like rule and stores the seed message with it.
    pub async fn quick_hello(
        &self,
        sender: Uuid,
        recipient: Uuid,
        text: &str,
    ) -> Result<QuickHelloResponse> {
        if sender == recipient {
            return Err(KindredError::validation("cannot say hello to yourself"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(KindredError::validation("message is required"));
        }
        if text.chars().count() > MAX_QUICK_HELLO_LEN {
            return Err(KindredError::validation(format!(
                "message longer than {MAX_QUICK_HELLO_LEN} characters"
            )));
        }
        let exists =
            blocking(&self.db, move |db| Ok(db.get_profile(recipient)?.is_some())).await?;
        if !exists {
            return Err(KindredError::NotFound("user"));
        }

        let now = Utc::now();
        let online = self.presence.is_online(recipient).await;
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: PairKey::new(sender, recipient).conversation_id(),
            sender_id: sender,
            receiver_id: recipient,
            kind: MessageKind::Text,
            content: Some(text.to_string()),
            media: None,
            reply_to_id: None,
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

        let (outcome, message) = blocking(&self.db, move |db| {
            let outcome = db.record_quick_hello(&message)?;
            Ok((outcome, message))
        })
        .await?;
        if outcome.transition == LikeTransition::Closed {
            return Err(KindredError::conflict("match is closed"));
        }
        info!(%sender, %recipient, match_id = %outcome.row.id, "Quick hello");

        if online {
            if let Some(view) = message.view_for(recipient) {
                self.presence
                    .send_to_user(recipient, GatewayEvent::NewMessage { message: view })
                    .await;
            }
        } else {
            let name = display_name(&self.db, sender).await;
            dispatch_best_effort(
                self.notifier.as_ref(),
                recipient,
                Notification::matched(name.as_deref(), outcome.row.id, sender, Some(text)),
            )
            .await;
        }
        if outcome.transition == LikeTransition::Activated {
            announce_match_created(&self.presence, &outcome.row).await;
        }

        let view = message.view_for(sender).ok_or_else(|| {
            KindredError::Internal(anyhow::anyhow!("fresh message hidden from its sender"))
        })?;
        Ok(QuickHelloResponse {
            match_id: outcome.row.id,
            match_status: outcome.row.status,
            message: view,
        })
    }
}

fn nearby_user(row: &NearbyRow, distance_m: f64, match_status: Option<MatchStatus>) -> NearbyUser {
    NearbyUser {
        user_id: row.id,
        display_name: row.display_name.clone(),
        photo: row.photo.clone(),
        distance_m: display_distance(distance_m, row.show_exact_distance),
        show_exact_distance: row.show_exact_distance,
        match_status,
    }
}
