//! JSON bodies carried over the broker request/response queues.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

// ---------------------------------------------------------------------------
// JWT decode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodeJwtRequest {
    pub session_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodeJwtResponse {
    pub valid: bool,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecodeJwtResponse {
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Batch user details
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchDetailsRequest {
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDetails {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
}

/// Details keyed by the user id's string form. Unknown ids are simply absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchDetailsResponse {
    #[serde(default)]
    pub user_details: HashMap<String, UserDetails>,
}

// ---------------------------------------------------------------------------
// Session verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionVerificationRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionVerificationResponse {
    pub valid: bool,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

// ---------------------------------------------------------------------------
// Offline fallback
// ---------------------------------------------------------------------------

/// Envelope published to the fallback queue when a user has no live
/// connection. `payload` is the frame that could not be delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: UserId,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}
