//! Token extraction and decoding for HTTP and WebSocket requests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use courier_broker::RpcClient;
use courier_shared::auth::JwtCodec;
use courier_shared::constants::AUTH_JWT_DECODE;
use courier_shared::rpc::{DecodeJwtRequest, DecodeJwtResponse};
use courier_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

#[async_trait]
pub trait TokenDecoder: Send + Sync {
    async fn decode(&self, token: &str) -> Result<AuthUser, ServerError>;
}

/// Asks the auth service over the broker.
pub struct RpcTokenDecoder {
    rpc: Arc<RpcClient>,
    queue: &'static str,
}

impl RpcTokenDecoder {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            queue: AUTH_JWT_DECODE,
        }
    }
}

#[async_trait]
impl TokenDecoder for RpcTokenDecoder {
    async fn decode(&self, token: &str) -> Result<AuthUser, ServerError> {
        let request = DecodeJwtRequest {
            session_token: token.to_string(),
        };
        let response: DecodeJwtResponse = self.rpc.call(self.queue, &request).await?;

        match (response.valid, response.user_id) {
            (true, Some(id)) => Ok(AuthUser {
                id,
                username: response.username,
                email: response.email,
            }),
            _ => Err(ServerError::Unauthorized(
                response.error.unwrap_or_else(|| "invalid token".to_string()),
            )),
        }
    }
}

/// Verifies tokens in-process with the shared secret.
pub struct JwtTokenDecoder {
    codec: JwtCodec,
}

impl JwtTokenDecoder {
    pub fn new(codec: JwtCodec) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl TokenDecoder for JwtTokenDecoder {
    async fn decode(&self, token: &str) -> Result<AuthUser, ServerError> {
        let claims = self
            .codec
            .decode(token)
            .map_err(|e| ServerError::Unauthorized(e.to_string()))?;
        Ok(AuthUser {
            id: claims.id,
            username: claims.username,
            email: claims.email,
        })
    }
}

/// Token from the `token` query parameter, an `Authorization: Bearer` header
/// or the `session_token` cookie, in that order.
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = query.get("token").filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }

    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == "session_token" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The caller, resolved from their token. Rejects with 401.
pub struct Authenticated(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|q| q.0)
            .unwrap_or_default();

        let token = extract_token(&parts.headers, &query)
            .ok_or_else(|| ServerError::Unauthorized("missing token".to_string()))?;

        match state.tokens.decode(&token).await {
            Ok(user) => Ok(Authenticated(user)),
            Err(e) => {
                tracing::debug!(error = %e, "token rejected");
                Err(e)
            }
        }
    }
}
