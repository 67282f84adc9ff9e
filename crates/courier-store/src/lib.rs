//! # courier-store
//!
//! SQLite persistence for Courier: contact requests, contact edges, messages,
//! and the users/sessions owned by the auth service.
//!
//! [`Database`] is a synchronous handle with typed CRUD helpers; the async
//! repository traits in [`repository`] wrap it for use from tokio tasks.

pub mod contact_requests;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod repository;
pub mod users;

mod error;

pub use contact_requests::Resolution;
pub use contacts::Removal;
pub use database::Database;
pub use error::{Result, StoreError};
pub use repository::{ContactRepository, MessageRepository, SqliteStore, UserDirectory};
