use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use kindred_types::events::GatewayEvent;

/// Identifies one live connection. A user may hold several.
pub type ConnId = Uuid;

#[derive(Default)]
struct UserPresence {
    connections: HashMap<ConnId, mpsc::UnboundedSender<GatewayEvent>>,
    in_chat_with: Option<Uuid>,
}

#[derive(Default)]
struct PresenceState {
    users: HashMap<Uuid, UserPresence>,
    /// watched user -> connections subscribed to their status, with the owning user
    watchers: HashMap<Uuid, HashMap<ConnId, Uuid>>,
    /// connection -> users it watches, for cleanup on disconnect
    subscriptions: HashMap<ConnId, HashSet<Uuid>>,
}

impl PresenceState {
    fn send_to_user(&self, user_id: Uuid, event: &GatewayEvent) -> usize {
        let Some(presence) = self.users.get(&user_id) else {
            return 0;
        };
        presence
            .connections
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    fn send_to_connection(&self, user_id: Uuid, conn_id: ConnId, event: GatewayEvent) -> bool {
        self.users
            .get(&user_id)
            .and_then(|p| p.connections.get(&conn_id))
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    fn notify_watchers(&self, user_id: Uuid, online: bool) {
        let Some(watchers) = self.watchers.get(&user_id) else {
            return;
        };
        for (&conn_id, &watcher) in watchers {
            let event = GatewayEvent::UserStatusChange { user_id, online };
            self.send_to_connection(watcher, conn_id, event);
        }
    }
}

/// Process-wide map of users to their live connections.
///
/// All state sits behind one lock so a fan-out never observes a half-applied
/// connect or disconnect. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<PresenceState>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns its id and the receiver the
    /// connection's send task drains.
    pub async fn register(&self, user_id: Uuid) -> (ConnId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.write().await;
        let presence = state.users.entry(user_id).or_default();
        let came_online = presence.connections.is_empty();
        presence.connections.insert(conn_id, tx);

        if came_online {
            info!(%user_id, "User online");
            state.notify_watchers(user_id, true);
        }
        debug!(%user_id, %conn_id, "Connection registered");
        (conn_id, rx)
    }

    /// Drop one connection. When it was the user's last, watchers hear the
    /// user went offline and any open chat peer hears the user left.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnId) {
        let mut state = self.inner.write().await;

        if let Some(watched) = state.subscriptions.remove(&conn_id) {
            for target in watched {
                if let Some(set) = state.watchers.get_mut(&target) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        state.watchers.remove(&target);
                    }
                }
            }
        }

        let Some(presence) = state.users.get_mut(&user_id) else {
            return;
        };
        if presence.connections.remove(&conn_id).is_none() {
            return;
        }
        debug!(%user_id, %conn_id, "Connection unregistered");
        if !presence.connections.is_empty() {
            return;
        }

        let left_chat_with = presence.in_chat_with.take();
        state.users.remove(&user_id);
        info!(%user_id, "User offline");

        if let Some(peer) = left_chat_with {
            state.send_to_user(peer, &GatewayEvent::UserLeftChat { user_id });
        }
        state.notify_watchers(user_id, false);
    }

    /// Fan out to every connection of `user_id`. Returns how many were reached.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        self.inner.read().await.send_to_user(user_id, &event)
    }

    pub async fn send_to_connection(
        &self,
        user_id: Uuid,
        conn_id: ConnId,
        event: GatewayEvent,
    ) -> bool {
        self.inner.read().await.send_to_connection(user_id, conn_id, event)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.users.contains_key(&user_id)
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .map_or(0, |p| p.connections.len())
    }

    /// Returns false if the user has no live connection.
    pub async fn set_in_chat_with(&self, user_id: Uuid, peer: Option<Uuid>) -> bool {
        let mut state = self.inner.write().await;
        match state.users.get_mut(&user_id) {
            Some(presence) => {
                presence.in_chat_with = peer;
                true
            }
            None => false,
        }
    }

    pub async fn in_chat_with(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner.read().await.users.get(&user_id).and_then(|p| p.in_chat_with)
    }

    /// Watch `target` from one connection. The current status is sent at once.
    /// Callers decide who may watch whom.
    pub async fn subscribe(&self, watcher: Uuid, conn_id: ConnId, target: Uuid) {
        let mut state = self.inner.write().await;
        state.watchers.entry(target).or_default().insert(conn_id, watcher);
        state.subscriptions.entry(conn_id).or_default().insert(target);

        let online = state.users.contains_key(&target);
        let event = GatewayEvent::UserStatusChange {
            user_id: target,
            online,
        };
        state.send_to_connection(watcher, conn_id, event);
    }

    pub async fn unsubscribe(&self, conn_id: ConnId, target: Uuid) {
        let mut state = self.inner.write().await;
        if let Some(set) = state.watchers.get_mut(&target) {
            set.remove(&conn_id);
            if set.is_empty() {
                state.watchers.remove(&target);
            }
        }
        if let Some(set) = state.subscriptions.get_mut(&conn_id) {
            set.remove(&target);
            if set.is_empty() {
                state.subscriptions.remove(&conn_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_connection() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (_c1, mut rx1) = registry.register(user).await;
        let (_c2, mut rx2) = registry.register(user).await;

        let reached = registry.send_to_user(user, GatewayEvent::Ready { user_id: user }).await;
        assert_eq!(reached, 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
        let stranger = Uuid::new_v4();
        let event = GatewayEvent::Ready { user_id: user };
        assert_eq!(registry.send_to_user(stranger, event).await, 0);
    }

    #[tokio::test]
    async fn test_offline_only_after_last_connection() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (c1, _rx1) = registry.register(user).await;
        let (c2, _rx2) = registry.register(user).await;

        registry.unregister(user, c1).await;
        assert!(registry.is_online(user).await);
        // Unknown or repeated ids are ignored.
        registry.unregister(user, c1).await;
        assert_eq!(registry.connection_count(user).await, 1);

        registry.unregister(user, c2).await;
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn test_subscribers_see_status_changes() {
        let registry = PresenceRegistry::new();
        let (watcher, target) = (Uuid::new_v4(), Uuid::new_v4());
        let (wc, mut wrx) = registry.register(watcher).await;

        registry.subscribe(watcher, wc, target).await;
        let (tc, _trx) = registry.register(target).await;
        registry.unregister(target, tc).await;

        let seen: Vec<bool> = drain(&mut wrx)
            .into_iter()
            .filter_map(|e| match e {
                GatewayEvent::UserStatusChange { user_id, online } if user_id == target => {
                    Some(online)
                }
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec![false, true, false]);

        registry.unsubscribe(wc, target).await;
        let (_tc, _trx) = registry.register(target).await;
        assert!(drain(&mut wrx).is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_empty_entries() {
        let registry = PresenceRegistry::new();
        let watcher = Uuid::new_v4();
        let targets = [Uuid::new_v4(), Uuid::new_v4()];
        let (wc, _wrx) = registry.register(watcher).await;

        for target in targets {
            registry.subscribe(watcher, wc, target).await;
        }
        registry.unsubscribe(wc, targets[0]).await;
        {
            let state = registry.inner.read().await;
            assert_eq!(state.subscriptions[&wc].len(), 1);
            assert!(!state.watchers.contains_key(&targets[0]));
        }

        registry.unsubscribe(wc, targets[1]).await;
        let state = registry.inner.read().await;
        assert!(state.subscriptions.is_empty());
        assert!(state.watchers.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_tells_chat_peer() {
        let registry = PresenceRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (ac, _arx) = registry.register(a).await;
        let (_bc, mut brx) = registry.register(b).await;

        assert!(registry.set_in_chat_with(a, Some(b)).await);
        registry.unregister(a, ac).await;

        let events = drain(&mut brx);
        assert!(matches!(
            events.as_slice(),
            [GatewayEvent::UserLeftChat { user_id }] if *user_id == a
        ));
    }
}
