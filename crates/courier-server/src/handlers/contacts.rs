use uuid::Uuid;

use courier_shared::protocol::{RequestUpdate, ServerFrame};
use courier_shared::{ContactRequest, Decision, UserId};
use courier_store::{Removal, Resolution};

use super::Handlers;
use crate::error::EventError;

impl Handlers {
    pub async fn send_contact_request(
        &self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<ContactRequest, EventError> {
        let request = self.contacts.create_request(sender, receiver).await?;

        tracing::info!(request = %request.id, sender = %sender, receiver = %receiver, "contact request created");

        self.notifier
            .notify(
                sender,
                ServerFrame::ContactRequestSentAck {
                    request: request.clone(),
                },
            )
            .await;
        self.notifier
            .notify(receiver, ServerFrame::NewContactRequestReceived(request.clone()))
            .await;

        Ok(request)
    }

    /// Accept or reject a pending request addressed to `actor`.
    ///
    /// Repeating the decision already taken is answered to the actor again
    /// without touching the store or the original sender.
    pub async fn resolve_contact_request(
        &self,
        request_id: Uuid,
        decision: Decision,
        actor: UserId,
        counterpart: Option<UserId>,
    ) -> Result<Resolution, EventError> {
        let resolution = self
            .contacts
            .resolve_request(request_id, actor, counterpart, decision)
            .await?;

        let update = RequestUpdate {
            id: resolution.request.id,
            action: decision,
            status: resolution.request.status,
        };

        if resolution.replayed {
            tracing::debug!(request = %request_id, decision = decision.as_str(), "contact request decision replayed");
        } else {
            tracing::info!(
                request = %request_id,
                decision = decision.as_str(),
                edges = resolution.created_edges.len(),
                "contact request resolved"
            );
            self.notifier
                .notify(
                    resolution.request.sender_id,
                    ServerFrame::UpdateReceivedOnContactRequest(update.clone()),
                )
                .await;
        }

        self.notifier
            .notify(actor, ServerFrame::UpdateSentOnContactRequest(update))
            .await;

        Ok(resolution)
    }

    pub async fn remove_contact(
        &self,
        edge_id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
    ) -> Result<Removal, EventError> {
        let removal = self.contacts.remove_contact(edge_id, actor, counterpart).await?;
        let other = removal.edge.contact_id;

        tracing::info!(edge = %edge_id, user = %actor, contact = %other, "contact removed");

        self.notifier
            .notify(
                actor,
                ServerFrame::ContactRemovedAck {
                    contact_id: removal.edge.id,
                    user_id: other,
                },
            )
            .await;
        self.notifier
            .notify(
                other,
                ServerFrame::ContactRemoved {
                    contact_id: removal.mirror.as_ref().map_or(removal.edge.id, |m| m.id),
                    user_id: actor,
                },
            )
            .await;

        Ok(removal)
    }
}
