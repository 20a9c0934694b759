//! Client-side session manager for the Taskline realtime gateway.
//!
//! Owns a single gateway connection and hides its lifecycle from the
//! application: reconnection with bounded backoff, re-joining subscribed
//! task rooms after every reconnect, heartbeats, duplicate-push suppression,
//! and an unread counter hydrated over the REST fallback.

pub mod backoff;
pub mod dedup;
pub mod manager;
pub mod rest;

pub use backoff::{Backoff, ReconnectPolicy};
pub use dedup::RecentlySeen;
pub use manager::{
    ClientConfig, ClientError, ClientEvent, ConnectivityState, RoomSubscription, SessionManager,
};
pub use rest::RestClient;
