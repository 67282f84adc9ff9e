use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use courier_broker::BatchDetailFetcher;
use courier_shared::rpc::UserDetails;
use courier_shared::{Message, MessageType, RequestStatus, UserId};

use crate::auth::{Authenticated, TokenDecoder};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers::Handlers;
use crate::registry::ConnectionRegistry;
use crate::ws::ws_handler;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub handlers: Arc<Handlers>,
    pub tokens: Arc<dyn TokenDecoder>,
    pub details: Arc<BatchDetailFetcher>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/contacts", get(list_contacts))
        .route("/requests", get(list_requests))
        .route("/messages/:contact_id", get(list_messages))
        .route("/files/:message_id", get(download_file))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContactView {
    id: Uuid,
    contact_id: UserId,
    username: Option<String>,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RequestView {
    id: Uuid,
    sender_id: UserId,
    receiver_id: UserId,
    status: RequestStatus,
    sender: Option<UserDetails>,
    receiver: Option<UserDetails>,
    created_at: DateTime<Utc>,
    created_at_formatted: String,
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<u32>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.len(),
    })
}

async fn list_contacts(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
) -> Result<Json<Vec<ContactView>>, ServerError> {
    let contacts = state.handlers.contacts().contacts_for(user.id).await?;
    let details = state
        .details
        .fetch_details(contacts.iter().map(|c| c.contact_id))
        .await?;

    let views = contacts
        .into_iter()
        .map(|c| {
            let d = details.get(&c.contact_id);
            ContactView {
                id: c.id,
                contact_id: c.contact_id,
                username: d.map(|d| d.username.clone()),
                email: d.map(|d| d.email.clone()),
                created_at: c.created_at,
            }
        })
        .collect();

    Ok(Json(views))
}

async fn list_requests(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
) -> Result<Json<Vec<RequestView>>, ServerError> {
    let requests = state.handlers.contacts().pending_requests_for(user.id).await?;
    let details = state
        .details
        .fetch_details(requests.iter().flat_map(|r| [r.sender_id, r.receiver_id]))
        .await?;

    let views = requests
        .into_iter()
        .map(|r| RequestView {
            id: r.id,
            sender_id: r.sender_id,
            receiver_id: r.receiver_id,
            status: r.status,
            sender: details.get(&r.sender_id).cloned(),
            receiver: details.get(&r.receiver_id).cloned(),
            created_at_formatted: format_date(&r.created_at),
            created_at: r.created_at,
        })
        .collect();

    Ok(Json(views))
}

async fn list_messages(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(contact_id): Path<UserId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let messages = state
        .handlers
        .messages()
        .conversation(user.id, contact_id, limit)
        .await?;
    Ok(Json(messages))
}

async fn download_file(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(message_id): Path<Uuid>,
) -> Result<Response, ServerError> {
    let message = state.handlers.messages().message(message_id).await?;

    // Same answer for "no such file" and "not yours".
    if message.message_type != MessageType::File || !message.involves(user.id) {
        return Err(ServerError::NotFound(format!("file {message_id}")));
    }
    let Some(storage_name) = message.file_path.as_deref() else {
        return Err(ServerError::NotFound(format!("file {message_id}")));
    };

    let data = state.handlers.files().read(storage_name).await?;
    let mime = message
        .file_mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    let file_name = message.file_name.as_deref().unwrap_or("download");

    info!(message = %message_id, user = %user.id, size = data.len(), "File downloaded");

    let content_type = HeaderValue::from_str(mime)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        header_safe(file_name)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

/// "2 Jan, 2006"
fn format_date(ts: &DateTime<Utc>) -> String {
    ts.format("%-d %b, %Y").to_string()
}

fn header_safe(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .filter(|c| *c != '"' && *c != '\\')
        .collect()
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::TimeZone;
    use tower::ServiceExt;

    use courier_broker::{responder, Broker, RpcClient};
    use courier_shared::auth::JwtCodec;
    use courier_shared::constants::{AUTH_BATCH_DETAILS_REQUEST, AUTH_BATCH_DETAILS_RESPONSE};
    use courier_shared::rpc::{BatchDetailsRequest, BatchDetailsResponse};
    use courier_shared::Decision;

    use crate::auth::JwtTokenDecoder;
    use crate::handlers::harness::Harness;

    const SECRET: &[u8] = b"api-test-secret";

    async fn app(h: &Harness) -> Router {
        let broker: Arc<dyn Broker> = h.broker.clone();

        let responder_broker = broker.clone();
        tokio::spawn(async move {
            responder::serve(
                responder_broker,
                AUTH_BATCH_DETAILS_REQUEST,
                AUTH_BATCH_DETAILS_RESPONSE,
                |req: BatchDetailsRequest| async move {
                    let user_details: HashMap<String, UserDetails> = req
                        .user_ids
                        .into_iter()
                        .map(|id| {
                            let details = UserDetails {
                                user_id: id,
                                username: format!("user-{}", id.short()),
                                email: format!("{}@example.com", id.short()),
                            };
                            (id.to_string(), details)
                        })
                        .collect();
                    BatchDetailsResponse { user_details }
                },
            )
            .await
        });

        let rpc = RpcClient::start(broker, "api-test-replies", Duration::from_secs(2))
            .await
            .unwrap();

        build_router(AppState {
            registry: h.registry.clone(),
            handlers: h.handlers.clone(),
            tokens: Arc::new(JwtTokenDecoder::new(JwtCodec::new(SECRET))),
            details: Arc::new(BatchDetailFetcher::new(Arc::new(rpc))),
            config: Arc::new(ServerConfig::default()),
        })
    }

    fn token(user: UserId) -> String {
        JwtCodec::new(SECRET)
            .issue(user, "tester", "tester@example.com", chrono::Duration::hours(1))
            .unwrap()
    }

    fn get(uri: &str, user: UserId) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {}", token(user)))
            .body(Body::empty())
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let h = Harness::new().await;
        let response = app(&h)
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_401() {
        let h = Harness::new().await;
        let router = app(&h).await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/contacts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/contacts?token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn contacts_and_requests_are_enriched() {
        let h = Harness::new().await;
        let router = app(&h).await;
        let (alice, bob, carol) = (UserId::new(), UserId::new(), UserId::new());

        let request = h.handlers.send_contact_request(alice, bob).await.unwrap();
        h.handlers
            .resolve_contact_request(request.id, Decision::Accept, bob, None)
            .await
            .unwrap();
        h.handlers.send_contact_request(carol, alice).await.unwrap();

        let response = router.clone().oneshot(get("/contacts", alice)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let contacts: Vec<ContactView> = json(response).await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].contact_id, bob);
        assert_eq!(contacts[0].username, Some(format!("user-{}", bob.short())));

        let response = router.oneshot(get("/requests", alice)).await.unwrap();
        let requests: Vec<RequestView> = json(response).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].sender_id, carol);
        assert_eq!(requests[0].sender.as_ref().map(|d| d.user_id), Some(carol));
        assert!(!requests[0].created_at_formatted.is_empty());
    }

    #[tokio::test]
    async fn messages_are_returned_oldest_first() {
        let h = Harness::new().await;
        let router = app(&h).await;
        let (alice, bob) = (UserId::new(), UserId::new());

        h.handlers.send_message(alice, bob, "one".into()).await.unwrap();
        h.handlers.send_message(bob, alice, "two".into()).await.unwrap();

        let response = router
            .oneshot(get(&format!("/messages/{bob}"), alice))
            .await
            .unwrap();
        let messages: Vec<Message> = json(response).await;
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn files_are_served_only_to_participants() {
        let h = Harness::new().await;
        let router = app(&h).await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let chunk = courier_shared::protocol::FileChunk {
            receiver_id: bob,
            file_id: "doc".into(),
            file_name: "notes.md".into(),
            chunk_index: 0,
            total_chunks: 1,
            chunk_data: courier_shared::protocol::ChunkData::Bytes(b"# hello".to_vec()),
        };
        let message = h.handlers.ingest_chunk(alice, chunk).await.unwrap().unwrap();

        let response = router
            .clone()
            .oneshot(get(&format!("/files/{}", message.id), bob))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"notes.md\""
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"# hello");

        let response = router
            .oneshot(get(&format!("/files/{}", message.id), UserId::new()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn date_format_matches_display_style() {
        let ts = Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(format_date(&ts), "2 Jan, 2006");
    }
}
