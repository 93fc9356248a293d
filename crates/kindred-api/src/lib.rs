pub mod chat;
pub mod discovery;
pub mod error;
pub mod location;
pub mod matches;
pub mod middleware;
pub mod notifications;
pub mod router;

use std::sync::Arc;

use kindred_core::Services;

pub struct AppStateInner {
    pub services: Services,
    pub jwt_secret: Arc<str>,
}

pub type AppState = Arc<AppStateInner>;

pub use router::build_router;
