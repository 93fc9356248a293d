pub mod api;
pub mod events;
pub mod geo;
pub mod ids;
pub mod models;
pub mod timeline;
