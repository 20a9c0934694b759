//! Taskline realtime gateway.
//!
//! A persistent-connection service that authenticates clients, tracks which
//! users are online, and fans task-related events out to per-user and
//! per-task rooms. The CRUD layer persists notifications elsewhere and calls
//! the [`dispatch::Dispatcher`] to trigger pushes; clients that miss a push
//! reconcile through the REST fallback endpoints in [`handlers`].

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod websocket;
