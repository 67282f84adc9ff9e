use rusqlite::params;
use uuid::Uuid;

use courier_shared::{Session, User, UserId};

use crate::database::{ts_from_sql, ts_to_sql, user_from_sql, uuid_from_sql, Database};
use crate::error::{not_found, Result};

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                ts_to_sql(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Users matching `ids`. Unknown ids are skipped.
    pub fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, username, email, created_at FROM users WHERE id = ?1")?;

        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            let mut rows = stmt.query_map(params![id.to_string()], row_to_user)?;
            if let Some(user) = rows.next() {
                users.push(user?);
            }
        }
        Ok(users)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (id, user_id, token, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.token,
                ts_to_sql(&session.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: Uuid) -> Result<Session> {
        self.conn()
            .query_row(
                "SELECT id, user_id, token, created_at FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let user_id: String = row.get(1)?;
                    let created_at: String = row.get(3)?;
                    Ok(Session {
                        id: uuid_from_sql(0, &id)?,
                        user_id: user_from_sql(1, &user_id)?,
                        token: row.get(2)?,
                        created_at: ts_from_sql(3, &created_at)?,
                    })
                },
            )
            .map_err(not_found)
    }

    pub fn delete_session(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(3)?;

    Ok(User {
        id: user_from_sql(0, &id)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: ts_from_sql(3, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    fn user(name: &str) -> User {
        User {
            id: UserId::new(),
            username: name.into(),
            email: format!("{name}@example.org"),
            created_at: courier_shared::now(),
        }
    }

    #[test]
    fn get_users_skips_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let ada = user("ada");
        let grace = user("grace");
        db.insert_user(&ada).unwrap();
        db.insert_user(&grace).unwrap();

        let found = db.get_users(&[ada.id, UserId::new(), grace.id]).unwrap();
        assert_eq!(found, vec![ada.clone(), grace]);
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn session_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let ada = user("ada");
        db.insert_user(&ada).unwrap();

        let session = Session {
            id: Uuid::new_v4(),
            user_id: ada.id,
            token: "tok".into(),
            created_at: courier_shared::now(),
        };
        db.insert_session(&session).unwrap();
        assert_eq!(db.get_session(session.id).unwrap().user_id, ada.id);

        assert!(db.delete_session(session.id).unwrap());
        assert!(matches!(db.get_session(session.id), Err(StoreError::NotFound)));
    }
}
