//! Event handlers behind the WebSocket reader loop.
//!
//! Each inbound frame is handled to completion before the next one is read, so
//! per-connection ordering holds. The acting user always comes from the
//! authenticated connection, never from the frame.

mod contacts;
mod messaging;

use std::sync::Arc;

use courier_shared::protocol::ClientFrame;
use courier_shared::{Decision, UserId};
use courier_store::{ContactRepository, MessageRepository};

use crate::assembly::AssemblyEngine;
use crate::error::EventError;
use crate::file_store::FileStore;
use crate::notifier::Notifier;
use crate::worker::NotificationQueue;

pub struct Handlers {
    contacts: Arc<dyn ContactRepository>,
    messages: Arc<dyn MessageRepository>,
    notifier: Notifier,
    progress: NotificationQueue,
    assembly: Arc<AssemblyEngine>,
    files: Arc<FileStore>,
}

impl Handlers {
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        messages: Arc<dyn MessageRepository>,
        notifier: Notifier,
        progress: NotificationQueue,
        assembly: Arc<AssemblyEngine>,
        files: Arc<FileStore>,
    ) -> Self {
        Self {
            contacts,
            messages,
            notifier,
            progress,
            assembly,
            files,
        }
    }

    pub fn contacts(&self) -> &Arc<dyn ContactRepository> {
        &self.contacts
    }

    pub fn messages(&self) -> &Arc<dyn MessageRepository> {
        &self.messages
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn dispatch(&self, actor: UserId, frame: ClientFrame) -> Result<(), EventError> {
        match frame {
            ClientFrame::SendContactRequest { target_user_id } => {
                self.send_contact_request(actor, target_user_id).await?;
            }
            ClientFrame::AcceptContactRequest {
                request_id,
                target_user_id,
            } => {
                self.resolve_contact_request(request_id, Decision::Accept, actor, target_user_id)
                    .await?;
            }
            ClientFrame::RejectContactRequest {
                request_id,
                target_user_id,
            } => {
                self.resolve_contact_request(request_id, Decision::Reject, actor, target_user_id)
                    .await?;
            }
            ClientFrame::RemoveContact {
                contact_id,
                target_user_id,
            } => {
                self.remove_contact(contact_id, actor, target_user_id).await?;
            }
            ClientFrame::SendMessage {
                receiver_id,
                content,
            } => {
                self.send_message(actor, receiver_id, content).await?;
            }
            ClientFrame::SendFileChunk(chunk) => {
                self.ingest_chunk(actor, chunk).await?;
            }
        }
        Ok(())
    }
}
