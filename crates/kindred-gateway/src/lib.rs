//! Real-time transport. Each WebSocket identifies once, then exchanges
//! `GatewayCommand`/`GatewayEvent` frames with the domain services.

pub mod commands;
pub mod connection;

pub use connection::handle_connection;
