//! WebSocket frames exchanged between clients and the server.
//!
//! Every frame is a JSON object discriminated by its `type` field. Inbound
//! types are snake_case (`send_message`), outbound types are
//! SCREAMING_SNAKE_CASE (`MESSAGE_SENT_ACK`).

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FrameError;
use crate::types::{ContactRequest, Decision, Message, RequestStatus, UserId};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Frames sent by a connected client.
///
/// The acting user is always the authenticated owner of the connection;
/// any `user_id` / `sender_id` a client adds to the frame is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendContactRequest {
        target_user_id: UserId,
    },
    AcceptContactRequest {
        request_id: Uuid,
        /// The user who originally sent the request.
        #[serde(default)]
        target_user_id: Option<UserId>,
    },
    RejectContactRequest {
        request_id: Uuid,
        #[serde(default)]
        target_user_id: Option<UserId>,
    },
    RemoveContact {
        /// Id of the caller's contact edge.
        contact_id: Uuid,
        #[serde(default)]
        target_user_id: Option<UserId>,
    },
    SendMessage {
        receiver_id: UserId,
        content: String,
    },
    SendFileChunk(FileChunk),
}

impl ClientFrame {
    pub const TYPES: [&'static str; 6] = [
        "send_contact_request",
        "accept_contact_request",
        "reject_contact_request",
        "remove_contact",
        "send_message",
        "send_file_chunk",
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SendContactRequest { .. } => "send_contact_request",
            Self::AcceptContactRequest { .. } => "accept_contact_request",
            Self::RejectContactRequest { .. } => "reject_contact_request",
            Self::RemoveContact { .. } => "remove_contact",
            Self::SendMessage { .. } => "send_message",
            Self::SendFileChunk(_) => "send_file_chunk",
        }
    }

    /// Decode a text frame.
    ///
    /// Invalid JSON and known types with a bad shape are `Malformed`; a valid
    /// object whose `type` is not recognised is `UnknownType`, which callers
    /// may answer without dropping the connection.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| FrameError::Malformed("missing \"type\" field".to_string()))?;

        if !Self::TYPES.contains(&kind) {
            return Err(FrameError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// One piece of a chunked file transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileChunk {
    pub receiver_id: UserId,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_data: ChunkData,
}

/// Chunk payload: a base64 string, or a plain array of byte values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChunkData {
    Base64(String),
    Bytes(Vec<u8>),
}

impl ChunkData {
    pub fn into_bytes(self) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Base64(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| FrameError::Malformed(format!("chunk_data is not base64: {e}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Status change of a contact request, as seen by either party.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestUpdate {
    pub id: Uuid,
    pub action: Decision,
    pub status: RequestStatus,
}

/// Machine-readable reason carried by an `ERROR` frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Malformed,
    UnknownType,
    NotFound,
    InvalidState,
    TooLarge,
    Unreachable,
    Timeout,
    Internal,
}

/// Frames pushed to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    ContactRequestSentAck { request: ContactRequest },
    NewContactRequestReceived(ContactRequest),
    /// Sent to the user who accepted or rejected.
    UpdateSentOnContactRequest(RequestUpdate),
    /// Sent to the user whose request was accepted or rejected.
    UpdateReceivedOnContactRequest(RequestUpdate),
    ContactRemovedAck { contact_id: Uuid, user_id: UserId },
    ContactRemoved { contact_id: Uuid, user_id: UserId },
    MessageSentAck { message: Message },
    NewMessageReceived { message: Message },
    FileUploadProgress { file_id: String, progress: f64 },
    FileSentAck { message: Message },
    NewFileReceived { message: Message },
    /// Negative acknowledgment for the inbound event named in `event`.
    Error {
        event: String,
        code: ErrorCode,
        message: String,
    },
}

impl ServerFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::ContactRequestSentAck { .. } => "CONTACT_REQUEST_SENT_ACK",
            Self::NewContactRequestReceived(_) => "NEW_CONTACT_REQUEST_RECEIVED",
            Self::UpdateSentOnContactRequest(_) => "UPDATE_SENT_ON_CONTACT_REQUEST",
            Self::UpdateReceivedOnContactRequest(_) => "UPDATE_RECEIVED_ON_CONTACT_REQUEST",
            Self::ContactRemovedAck { .. } => "CONTACT_REMOVED_ACK",
            Self::ContactRemoved { .. } => "CONTACT_REMOVED",
            Self::MessageSentAck { .. } => "MESSAGE_SENT_ACK",
            Self::NewMessageReceived { .. } => "NEW_MESSAGE_RECEIVED",
            Self::FileUploadProgress { .. } => "FILE_UPLOAD_PROGRESS",
            Self::FileSentAck { .. } => "FILE_SENT_ACK",
            Self::NewFileReceived { .. } => "NEW_FILE_RECEIVED",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Frames that only make sense on the connection that produced them:
    /// upload progress and negative acknowledgments. Never queued offline.
    pub fn is_connection_bound(&self) -> bool {
        matches!(self, Self::FileUploadProgress { .. } | Self::Error { .. })
    }

    pub fn error(event: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            event: event.into(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_progress_and_errors_are_connection_bound() {
        let progress = ServerFrame::FileUploadProgress {
            file_id: "f".into(),
            progress: 1.0,
        };
        assert!(progress.is_connection_bound());
        assert!(ServerFrame::error("send_message", ErrorCode::Malformed, "bad").is_connection_bound());
        assert!(!ServerFrame::ContactRemoved {
            contact_id: Uuid::new_v4(),
            user_id: UserId::new(),
        }
        .is_connection_bound());
    }

    #[test]
    fn test_parse_send_message() {
        let receiver = UserId::new();
        let text = format!(
            r#"{{"type":"send_message","receiver_id":"{receiver}","content":"hello","sender_id":"ignored"}}"#
        );
        let frame = ClientFrame::parse(&text).unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                receiver_id: receiver,
                content: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_parse_accept_without_target() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"type":"accept_contact_request","request_id":"{id}","action":"accept"}}"#);
        match ClientFrame::parse(&text).unwrap() {
            ClientFrame::AcceptContactRequest {
                request_id,
                target_user_id,
            } => {
                assert_eq!(request_id, id);
                assert!(target_user_id.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_distinguished() {
        let err = ClientFrame::parse(r#"{"type":"typing","user_id":"x"}"#).unwrap_err();
        assert!(matches!(err, FrameError::UnknownType(t) if t == "typing"));
    }

    #[test]
    fn test_bad_shape_is_malformed() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"send_message"}"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ClientFrame::parse("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ClientFrame::parse(r#"{"content":"no type"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_chunk_data_accepts_base64_and_byte_arrays() {
        let receiver = UserId::new();
        let b64 = format!(
            r#"{{"type":"send_file_chunk","receiver_id":"{receiver}","file_id":"f1","file_name":"a.txt","chunk_index":0,"total_chunks":1,"chunk_data":"aGVsbG8="}}"#
        );
        let raw = format!(
            r#"{{"type":"send_file_chunk","receiver_id":"{receiver}","file_id":"f1","file_name":"a.txt","chunk_index":0,"total_chunks":1,"chunk_data":[104,101,108,108,111]}}"#
        );

        for text in [b64, raw] {
            let ClientFrame::SendFileChunk(chunk) = ClientFrame::parse(&text).unwrap() else {
                panic!("expected a file chunk");
            };
            assert_eq!(chunk.chunk_data.into_bytes().unwrap(), b"hello");
        }
    }

    #[test]
    fn test_invalid_base64_is_malformed() {
        let data = ChunkData::Base64("***".to_string());
        assert!(matches!(data.into_bytes(), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_server_frame_tags() {
        let frame = ServerFrame::FileUploadProgress {
            file_id: "f1".to_string(),
            progress: 50.0,
        };
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "FILE_UPLOAD_PROGRESS");
        assert_eq!(json["type"], frame.frame_type());
        assert_eq!(json["progress"], 50.0);

        let request = ContactRequest::new(UserId::new(), UserId::new());
        let frame = ServerFrame::NewContactRequestReceived(request.clone());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "NEW_CONTACT_REQUEST_RECEIVED");
        assert_eq!(json["id"], request.id.to_string());
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_error_frame_mirrors_event() {
        let frame = ServerFrame::error("accept_contact_request", ErrorCode::InvalidState, "already rejected");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ERROR");
        assert_eq!(json["event"], "accept_contact_request");
        assert_eq!(json["code"], "invalid_state");
    }
}
