//! Device hub: keeps one WebSocket per device, records what each device last
//! reported, and pushes commands back down those connections.

pub mod app;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod models;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;
