use rusqlite::params;
use uuid::Uuid;

use courier_shared::{Message, UserId};

use crate::database::{enum_from_sql, ts_from_sql, ts_to_sql, user_from_sql, uuid_from_sql, Database};
use crate::error::{not_found, Result};

const SELECT_COLUMNS: &str = "SELECT id, sender_id, receiver_id, message_type, content,
        file_path, file_name, file_mime_type, created_at
 FROM messages";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, message_type, content,
                                   file_path, file_name, file_mime_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.message_type.as_str(),
                message.content,
                message.file_path,
                message.file_name,
                message.file_mime_type,
                ts_to_sql(&message.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// The latest `limit` messages exchanged between `a` and `b`, returned
    /// oldest first.
    pub fn conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: String = row.get(2)?;
    let message_type: String = row.get(3)?;
    let created_at: String = row.get(8)?;

    Ok(Message {
        id: uuid_from_sql(0, &id)?,
        sender_id: user_from_sql(1, &sender)?,
        receiver_id: user_from_sql(2, &receiver)?,
        message_type: enum_from_sql(3, &message_type)?,
        content: row.get(4)?,
        file_path: row.get(5)?,
        file_name: row.get(6)?,
        file_mime_type: row.get(7)?,
        created_at: ts_from_sql(8, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use courier_shared::MessageType;

    #[test]
    fn conversation_is_oldest_first_and_scoped_to_pair() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let (alice, bob, carol) = (UserId::new(), UserId::new(), UserId::new());

        let mut first = Message::text(alice, bob, "first");
        first.created_at = first.created_at - chrono::Duration::seconds(10);
        let second = Message::text(bob, alice, "second");
        db.insert_message(&second).unwrap();
        db.insert_message(&first).unwrap();
        db.insert_message(&Message::text(alice, carol, "elsewhere")).unwrap();

        let convo = db.conversation(alice, bob, 50).unwrap();
        let contents: Vec<_> = convo.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);

        let latest = db.conversation(alice, bob, 1).unwrap();
        assert_eq!(latest[0].content, "second");
    }

    #[test]
    fn file_message_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let msg = Message::file(
            UserId::new(),
            UserId::new(),
            "3f2a.pdf".into(),
            "report.pdf".into(),
            "application/pdf".into(),
        );
        db.insert_message(&msg).unwrap();

        let loaded = db.get_message(msg.id).unwrap();
        assert_eq!(loaded.message_type, MessageType::File);
        assert_eq!(loaded.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(loaded.file_mime_type.as_deref(), Some("application/pdf"));
        assert!(matches!(db.get_message(Uuid::new_v4()), Err(StoreError::NotFound)));
    }
}
