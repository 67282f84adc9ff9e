//! # courier-shared
//!
//! Identifiers, domain records, WebSocket frames and broker contracts shared
//! by every Courier service.

pub mod auth;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod types;

pub use error::{CourierError, FrameError, TokenError};
pub use types::*;
