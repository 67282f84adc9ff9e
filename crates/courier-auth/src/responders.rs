//! Queue responders answering token, user-detail and session lookups.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use courier_broker::{responder, Broker, BrokerError};
use courier_shared::auth::JwtCodec;
use courier_shared::constants::{
    AUTH_BATCH_DETAILS_REQUEST, AUTH_BATCH_DETAILS_RESPONSE, AUTH_SESSION_RESPONSE,
    AUTH_SESSION_VERIFICATION, JWT_DECODE_QUEUES,
};
use courier_shared::rpc::{
    BatchDetailsRequest, BatchDetailsResponse, DecodeJwtRequest, DecodeJwtResponse,
    SessionVerificationRequest, SessionVerificationResponse, UserDetails,
};
use courier_store::{StoreError, UserDirectory};

pub fn decode_jwt(codec: &JwtCodec, request: DecodeJwtRequest) -> DecodeJwtResponse {
    match codec.decode(&request.session_token) {
        Ok(claims) => DecodeJwtResponse {
            valid: true,
            user_id: Some(claims.id),
            username: claims.username,
            email: claims.email,
            error: None,
        },
        Err(e) => {
            tracing::debug!(error = %e, "token rejected");
            DecodeJwtResponse::invalid(e.to_string())
        }
    }
}

/// Unknown ids are left out of the map; a store failure yields an empty map.
pub async fn batch_details(
    directory: &dyn UserDirectory,
    request: BatchDetailsRequest,
) -> BatchDetailsResponse {
    let requested = request.user_ids.len();
    let users = match directory.users_by_ids(request.user_ids).await {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(error = %e, requested, "batch details lookup failed");
            Vec::new()
        }
    };

    let user_details: HashMap<String, UserDetails> = users
        .into_iter()
        .map(|u| {
            let details = UserDetails {
                user_id: u.id,
                username: u.username,
                email: u.email,
            };
            (u.id.to_string(), details)
        })
        .collect();

    tracing::debug!(requested, found = user_details.len(), "batch details answered");
    BatchDetailsResponse { user_details }
}

pub async fn verify_session(
    directory: &dyn UserDirectory,
    request: SessionVerificationRequest,
) -> SessionVerificationResponse {
    let Ok(id) = Uuid::parse_str(request.session_id.trim()) else {
        return SessionVerificationResponse::default();
    };

    match directory.session(id).await {
        Ok(session) => SessionVerificationResponse {
            valid: true,
            user_id: Some(session.user_id),
        },
        Err(StoreError::NotFound) => SessionVerificationResponse::default(),
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "session lookup failed");
            SessionVerificationResponse::default()
        }
    }
}

/// Start one responder per request queue. Each handle finishes when its
/// queue closes or the broker fails.
pub fn spawn_all(
    broker: Arc<dyn Broker>,
    directory: Arc<dyn UserDirectory>,
    codec: JwtCodec,
) -> Vec<JoinHandle<Result<(), BrokerError>>> {
    let mut handles = Vec::new();

    for (request_queue, reply_queue) in JWT_DECODE_QUEUES {
        let broker = broker.clone();
        let codec = codec.clone();
        handles.push(tokio::spawn(async move {
            responder::serve(broker, request_queue, reply_queue, move |req: DecodeJwtRequest| {
                let response = decode_jwt(&codec, req);
                async move { response }
            })
            .await
        }));
    }

    {
        let broker = broker.clone();
        let directory = directory.clone();
        handles.push(tokio::spawn(async move {
            responder::serve(
                broker,
                AUTH_BATCH_DETAILS_REQUEST,
                AUTH_BATCH_DETAILS_RESPONSE,
                move |req: BatchDetailsRequest| {
                    let directory = directory.clone();
                    async move { batch_details(directory.as_ref(), req).await }
                },
            )
            .await
        }));
    }

    handles.push(tokio::spawn(async move {
        responder::serve(
            broker,
            AUTH_SESSION_VERIFICATION,
            AUTH_SESSION_RESPONSE,
            move |req: SessionVerificationRequest| {
                let directory = directory.clone();
                async move { verify_session(directory.as_ref(), req).await }
            },
        )
        .await
    }));

    handles
}
