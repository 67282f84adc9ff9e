//! # courier-auth
//!
//! Answers the auth queues: JWT decoding for each consuming service, batch
//! user details and session verification, all backed by the shared SQLite
//! store.

pub mod config;
pub mod responders;

pub use config::AuthConfig;
pub use responders::spawn_all;
