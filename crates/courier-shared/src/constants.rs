/// Application name
pub const APP_NAME: &str = "Courier";

/// Maximum text message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Maximum reassembled file size in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Upper bound on `total_chunks` announced by a client
pub const MAX_TOTAL_CHUNKS: u32 = 65_536;

/// Maximum length of a client-chosen file transfer id
pub const MAX_FILE_ID_LEN: usize = 128;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default bounded wait for a broker RPC reply, in milliseconds
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Broker queues
// ---------------------------------------------------------------------------

/// Durable fallback queue for users without a live connection.
pub const NOTIFICATION_QUEUE: &str = "notification-service";

pub const AUTH_SESSION_VERIFICATION: &str = "auth-session-verification";
pub const AUTH_SESSION_RESPONSE: &str = "auth-session-response";

pub const AUTH_JWT_DECODE: &str = "auth-jwt-decode";
pub const AUTH_JWT_DECODE_RESPONSE: &str = "auth-jwt-decode-response";

pub const AUTH_JWT_DECODE_CONTACTS: &str = "auth-jwt-decode-contacts";
pub const AUTH_JWT_DECODE_RESPONSE_CONTACTS: &str = "auth-jwt-decode-response-contacts";

pub const AUTH_JWT_DECODE_MESSAGING: &str = "auth-jwt-decode-messaging";
pub const AUTH_JWT_DECODE_RESPONSE_MESSAGING: &str = "auth-jwt-decode-response-messaging";

pub const AUTH_BATCH_DETAILS_REQUEST: &str = "auth-batch-details-request";
pub const AUTH_BATCH_DETAILS_RESPONSE: &str = "auth-batch-details-response";

/// Request queue → default reply queue for every JWT decode pair.
pub const JWT_DECODE_QUEUES: [(&str, &str); 3] = [
    (AUTH_JWT_DECODE, AUTH_JWT_DECODE_RESPONSE),
    (AUTH_JWT_DECODE_CONTACTS, AUTH_JWT_DECODE_RESPONSE_CONTACTS),
    (AUTH_JWT_DECODE_MESSAGING, AUTH_JWT_DECODE_RESPONSE_MESSAGING),
];
