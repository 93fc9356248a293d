pub mod delivery;
pub mod discovery;
pub mod error;
pub mod matches;
pub mod notify;
pub mod presence;
pub mod proximity;

use std::sync::Arc;
use std::time::Duration;

use kindred_db::Database;
use tracing::warn;
use uuid::Uuid;

use crate::delivery::DeliveryCoordinator;
use crate::discovery::DiscoveryService;
use crate::matches::MatchService;
use crate::notify::NotificationDispatcher;
use crate::presence::PresenceRegistry;
use crate::proximity::ProximityNotifier;

pub use error::{KindredError, Result};

/// Run synchronous store work on the blocking pool so socket and heartbeat
/// tasks keep their runtime workers.
pub(crate) async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| KindredError::Internal(anyhow::anyhow!("spawn_blocking join error: {e}")))?
        .map_err(KindredError::from)
}

/// Sender name for a push. A failed lookup only costs the name.
pub(crate) async fn display_name(db: &Arc<Database>, user_id: Uuid) -> Option<String> {
    match blocking(db, move |db| db.get_profile(user_id)).await {
        Ok(profile) => profile.and_then(|p| p.display_name),
        Err(e) => {
            warn!(%user_id, "Profile lookup for notification failed: {}", e);
            None
        }
    }
}

/// Tunables the binary reads from its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub proximity_radius_m: f64,
    /// Repeat detections of the same pair inside this window are dropped. Zero disables.
    pub encounter_cooldown: Duration,
    /// How long a sender may still delete a message for everyone.
    pub delete_window: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proximity_radius_m: 1000.0,
            encounter_cooldown: Duration::from_secs(15 * 60),
            delete_window: Duration::from_secs(60 * 60),
        }
    }
}

/// Every domain service, wired over one database and one presence registry.
/// Cheap to clone; handlers and gateway connections each hold a copy.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub presence: PresenceRegistry,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub matches: Arc<MatchService>,
    pub discovery: Arc<DiscoveryService>,
    pub delivery: Arc<DeliveryCoordinator>,
    pub proximity: Arc<ProximityNotifier>,
}

impl Services {
    pub fn new(
        db: Arc<Database>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: Settings,
    ) -> Self {
        let presence = PresenceRegistry::new();
        let delete_window = chrono::Duration::from_std(settings.delete_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        Self {
            matches: Arc::new(MatchService::new(db.clone(), presence.clone(), notifier.clone())),
            discovery: Arc::new(DiscoveryService::new(db.clone())),
            delivery: Arc::new(DeliveryCoordinator::new(
                db.clone(),
                presence.clone(),
                notifier.clone(),
                delete_window,
            )),
            proximity: Arc::new(ProximityNotifier::new(
                db.clone(),
                presence.clone(),
                notifier.clone(),
                settings.proximity_radius_m,
                settings.encounter_cooldown,
            )),
            db,
            presence,
            notifier,
        }
    }
}
