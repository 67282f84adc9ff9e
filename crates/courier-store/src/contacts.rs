use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use courier_shared::{Contact, UserId};

use crate::database::{ts_from_sql, ts_to_sql, user_from_sql, uuid_from_sql, Database};
use crate::error::{not_found, Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, user_id, contact_id, created_at FROM contacts";

/// Edges deleted by [`Database::remove_contact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub edge: Contact,
    pub mirror: Option<Contact>,
}

impl Database {
    pub fn insert_contact(&self, contact: &Contact) -> Result<bool> {
        insert_contact_edge(self.conn(), contact)
    }

    pub fn get_contact(&self, id: Uuid) -> Result<Contact> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_contact,
            )
            .map_err(not_found)
    }

    /// Outgoing edges of `user`, oldest first.
    pub fn contacts_for(&self, user: UserId) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    pub fn are_contacts(&self, a: UserId, b: UserId) -> Result<bool> {
        contact_exists(self.conn(), a, b)
    }

    /// Delete `actor`'s edge `edge_id` and the mirrored edge pointing back.
    ///
    /// `counterpart`, when given, must be the user the edge points to.
    pub fn remove_contact(
        &mut self,
        edge_id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
    ) -> Result<Removal> {
        let tx = self.conn_mut().transaction()?;

        let edge = tx
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1 AND user_id = ?2"),
                params![edge_id.to_string(), actor.to_string()],
                row_to_contact,
            )
            .map_err(not_found)?;

        if counterpart.is_some_and(|other| other != edge.contact_id) {
            return Err(StoreError::InvalidState(
                "target user does not match the contact".into(),
            ));
        }

        let mirror = tx
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE user_id = ?1 AND contact_id = ?2"),
                params![edge.contact_id.to_string(), actor.to_string()],
                row_to_contact,
            )
            .optional()?;

        tx.execute("DELETE FROM contacts WHERE id = ?1", params![edge.id.to_string()])?;
        if let Some(m) = &mirror {
            tx.execute("DELETE FROM contacts WHERE id = ?1", params![m.id.to_string()])?;
        }

        tx.commit()?;
        Ok(Removal { edge, mirror })
    }
}

/// Insert one directed edge. Returns `false` when the edge already existed.
pub(crate) fn insert_contact_edge(conn: &Connection, contact: &Contact) -> Result<bool> {
    if contact.user_id == contact.contact_id {
        return Err(StoreError::InvalidState("a user cannot be their own contact".into()));
    }
    let affected = conn.execute(
        "INSERT INTO contacts (id, user_id, contact_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (user_id, contact_id) DO NOTHING",
        params![
            contact.id.to_string(),
            contact.user_id.to_string(),
            contact.contact_id.to_string(),
            ts_to_sql(&contact.created_at),
        ],
    )?;
    Ok(affected > 0)
}

pub(crate) fn contact_exists(conn: &Connection, a: UserId, b: UserId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM contacts
         WHERE (user_id = ?1 AND contact_id = ?2) OR (user_id = ?2 AND contact_id = ?1)",
        params![a.to_string(), b.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let contact_id: String = row.get(2)?;
    let created_at: String = row.get(3)?;

    Ok(Contact {
        id: uuid_from_sql(0, &id)?,
        user_id: user_from_sql(1, &user_id)?,
        contact_id: user_from_sql(2, &contact_id)?,
        created_at: ts_from_sql(3, &created_at)?,
    })
}
