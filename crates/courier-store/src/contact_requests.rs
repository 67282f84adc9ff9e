use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use courier_shared::{Contact, ContactRequest, Decision, RequestStatus, UserId};

use crate::contacts::{contact_exists, insert_contact_edge};
use crate::database::{enum_from_sql, ts_from_sql, ts_to_sql, user_from_sql, uuid_from_sql, Database};
use crate::error::{not_found, Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, sender_id, receiver_id, status, created_at FROM contact_requests";

/// Outcome of accepting or rejecting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub request: ContactRequest,
    /// Edges inserted by this call; empty for rejections and replays.
    pub created_edges: Vec<Contact>,
    /// The request was already in the decided state; nothing changed.
    pub replayed: bool,
}

impl Database {
    pub fn insert_contact_request(&self, request: &ContactRequest) -> Result<()> {
        insert_request(self.conn(), request)
    }

    pub fn get_contact_request(&self, id: Uuid) -> Result<ContactRequest> {
        fetch_request(self.conn(), id)
    }

    /// Pending requests addressed to `receiver`, oldest first.
    pub fn pending_requests_for(&self, receiver: UserId) -> Result<Vec<ContactRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE receiver_id = ?1 AND status = 'pending' ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![receiver.to_string()], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Create a pending request from `sender` to `receiver`.
    ///
    /// Refuses self-requests, a second pending request between the same pair
    /// (in either direction) and requests between existing contacts.
    pub fn create_contact_request(
        &mut self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<ContactRequest> {
        if sender == receiver {
            return Err(StoreError::InvalidState(
                "cannot send a contact request to yourself".into(),
            ));
        }

        let tx = self.conn_mut().transaction()?;

        if contact_exists(&tx, sender, receiver)? {
            return Err(StoreError::InvalidState("users are already contacts".into()));
        }
        if pending_between(&tx, sender, receiver)?.is_some() {
            return Err(StoreError::InvalidState(
                "a pending request already exists between these users".into(),
            ));
        }

        let request = ContactRequest::new(sender, receiver);
        insert_request(&tx, &request)?;
        tx.commit()?;

        tracing::debug!(request_id = %request.id, sender = %sender, receiver = %receiver, "contact request stored");
        Ok(request)
    }

    /// Apply `decision` to request `id` on behalf of `actor`.
    ///
    /// The status transition and, for acceptance, both contact edges are
    /// written in one transaction.
    pub fn resolve_contact_request(
        &mut self,
        id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
        decision: Decision,
    ) -> Result<Resolution> {
        let tx = self.conn_mut().transaction()?;
        let mut request = fetch_request(&tx, id)?;

        if request.receiver_id != actor {
            return Err(StoreError::InvalidState(
                "only the receiver can resolve a contact request".into(),
            ));
        }
        if let Some(other) = counterpart {
            if other != request.sender_id {
                return Err(StoreError::InvalidState(
                    "target user is not the sender of this request".into(),
                ));
            }
        }

        let target = decision.target_status();
        match request.status {
            RequestStatus::Pending => {}
            status if status == target => {
                return Ok(Resolution {
                    request,
                    created_edges: Vec::new(),
                    replayed: true,
                });
            }
            status => {
                return Err(StoreError::InvalidState(format!(
                    "cannot {} a request that is already {status}",
                    decision.as_str()
                )));
            }
        }

        tx.execute(
            "UPDATE contact_requests SET status = ?1 WHERE id = ?2 AND status = 'pending'",
            params![target.as_str(), id.to_string()],
        )?;
        request.status = target;

        let mut created_edges = Vec::new();
        if decision == Decision::Accept {
            for edge in [
                Contact::new(request.sender_id, request.receiver_id),
                Contact::new(request.receiver_id, request.sender_id),
            ] {
                if insert_contact_edge(&tx, &edge)? {
                    created_edges.push(edge);
                }
            }
        }

        tx.commit()?;

        Ok(Resolution {
            request,
            created_edges,
            replayed: false,
        })
    }
}

fn insert_request(conn: &Connection, request: &ContactRequest) -> Result<()> {
    conn.execute(
        "INSERT INTO contact_requests (id, sender_id, receiver_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            request.id.to_string(),
            request.sender_id.to_string(),
            request.receiver_id.to_string(),
            request.status.as_str(),
            ts_to_sql(&request.created_at),
        ],
    )?;
    Ok(())
}

fn fetch_request(conn: &Connection, id: Uuid) -> Result<ContactRequest> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id.to_string()],
        row_to_request,
    )
    .map_err(not_found)
}

fn pending_between(conn: &Connection, a: UserId, b: UserId) -> Result<Option<ContactRequest>> {
    Ok(conn
        .query_row(
            &format!(
                "{SELECT_COLUMNS} WHERE status = 'pending'
                 AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
                 LIMIT 1"
            ),
            params![a.to_string(), b.to_string()],
            row_to_request,
        )
        .optional()?)
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactRequest> {
    let id: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(ContactRequest {
        id: uuid_from_sql(0, &id)?,
        sender_id: user_from_sql(1, &sender)?,
        receiver_id: user_from_sql(2, &receiver)?,
        status: enum_from_sql(3, &status)?,
        created_at: ts_from_sql(4, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn accept_creates_two_mirrored_edges() {
        let (_dir, mut db) = open();
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = db.create_contact_request(alice, bob).unwrap();
        let res = db
            .resolve_contact_request(request.id, bob, Some(alice), Decision::Accept)
            .unwrap();

        assert!(!res.replayed);
        assert_eq!(res.request.status, RequestStatus::Accepted);
        assert_eq!(res.created_edges.len(), 2);
        assert!(res
            .created_edges
            .iter()
            .any(|e| e.user_id == alice && e.contact_id == bob));
        assert!(res
            .created_edges
            .iter()
            .any(|e| e.user_id == bob && e.contact_id == alice));

        assert_eq!(db.contacts_for(alice).unwrap().len(), 1);
        assert_eq!(db.contacts_for(bob).unwrap().len(), 1);
    }

    #[test]
    fn reject_creates_no_edges() {
        let (_dir, mut db) = open();
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = db.create_contact_request(alice, bob).unwrap();
        let res = db
            .resolve_contact_request(request.id, bob, None, Decision::Reject)
            .unwrap();

        assert_eq!(res.request.status, RequestStatus::Rejected);
        assert!(res.created_edges.is_empty());
        assert!(db.contacts_for(alice).unwrap().is_empty());
        assert!(db.contacts_for(bob).unwrap().is_empty());
    }

    #[test]
    fn accept_after_reject_is_invalid_state() {
        let (_dir, mut db) = open();
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = db.create_contact_request(alice, bob).unwrap();
        db.resolve_contact_request(request.id, bob, None, Decision::Reject)
            .unwrap();

        let err = db
            .resolve_contact_request(request.id, bob, None, Decision::Accept)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
        assert!(db.contacts_for(bob).unwrap().is_empty());
        assert_eq!(
            db.get_contact_request(request.id).unwrap().status,
            RequestStatus::Rejected
        );
    }

    #[test]
    fn replayed_accept_is_idempotent() {
        let (_dir, mut db) = open();
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = db.create_contact_request(alice, bob).unwrap();
        db.resolve_contact_request(request.id, bob, None, Decision::Accept)
            .unwrap();
        let replay = db
            .resolve_contact_request(request.id, bob, None, Decision::Accept)
            .unwrap();

        assert!(replay.replayed);
        assert!(replay.created_edges.is_empty());
        assert_eq!(db.contacts_for(alice).unwrap().len(), 1);
    }

    #[test]
    fn only_receiver_may_resolve() {
        let (_dir, mut db) = open();
        let (alice, bob) = (UserId::new(), UserId::new());

        let request = db.create_contact_request(alice, bob).unwrap();
        assert!(matches!(
            db.resolve_contact_request(request.id, alice, None, Decision::Accept),
            Err(StoreError::InvalidState(_))
        ));
        assert!(matches!(
            db.resolve_contact_request(request.id, bob, Some(UserId::new()), Decision::Accept),
            Err(StoreError::InvalidState(_))
        ));
        assert_eq!(
            db.get_contact_request(request.id).unwrap().status,
            RequestStatus::Pending
        );
    }

    #[test]
    fn unknown_request_is_not_found() {
        let (_dir, mut db) = open();
        assert!(matches!(
            db.resolve_contact_request(Uuid::new_v4(), UserId::new(), None, Decision::Accept),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn create_rejects_self_duplicate_and_existing_contacts() {
        let (_dir, mut db) = open();
        let (alice, bob) = (UserId::new(), UserId::new());

        assert!(matches!(
            db.create_contact_request(alice, alice),
            Err(StoreError::InvalidState(_))
        ));

        let request = db.create_contact_request(alice, bob).unwrap();
        assert!(matches!(
            db.create_contact_request(bob, alice),
            Err(StoreError::InvalidState(_))
        ));

        db.resolve_contact_request(request.id, bob, None, Decision::Accept)
            .unwrap();
        assert!(matches!(
            db.create_contact_request(alice, bob),
            Err(StoreError::InvalidState(_))
        ));
    }

    #[test]
    fn pending_requests_listed_for_receiver() {
        let (_dir, mut db) = open();
        let (alice, bob, carol) = (UserId::new(), UserId::new(), UserId::new());

        db.create_contact_request(alice, carol).unwrap();
        let second = db.create_contact_request(bob, carol).unwrap();
        db.resolve_contact_request(second.id, carol, None, Decision::Reject)
            .unwrap();

        let pending = db.pending_requests_for(carol).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender_id, alice);
        assert!(db.pending_requests_for(alice).unwrap().is_empty());
    }
}
