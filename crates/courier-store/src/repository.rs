//! Async repository ports consumed by the services, and the SQLite-backed
//! implementation shared by all of them.
//!
//! `rusqlite` is synchronous, so every call hops onto the blocking pool and
//! takes the single connection mutex there.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use courier_shared::{Contact, ContactRequest, Decision, Message, Session, User, UserId};

use crate::contact_requests::Resolution;
use crate::contacts::Removal;
use crate::database::Database;
use crate::error::{Result, StoreError};

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn create_request(&self, sender: UserId, receiver: UserId) -> Result<ContactRequest>;

    async fn resolve_request(
        &self,
        id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
        decision: Decision,
    ) -> Result<Resolution>;

    async fn remove_contact(
        &self,
        edge_id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
    ) -> Result<Removal>;

    async fn contacts_for(&self, user: UserId) -> Result<Vec<Contact>>;

    async fn pending_requests_for(&self, user: UserId) -> Result<Vec<ContactRequest>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save_message(&self, message: Message) -> Result<Message>;

    async fn message(&self, id: Uuid) -> Result<Message>;

    async fn conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>>;
}

/// Read access to accounts and sessions, used by the auth responder.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn users_by_ids(&self, ids: Vec<UserId>) -> Result<Vec<User>>;

    async fn session(&self, id: Uuid) -> Result<Session>;
}

/// One SQLite connection behind a mutex, cloneable across tasks.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Database::open_at(path).map(Self::new)
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ContactRepository for SqliteStore {
    async fn create_request(&self, sender: UserId, receiver: UserId) -> Result<ContactRequest> {
        self.with_db(move |db| db.create_contact_request(sender, receiver))
            .await
    }

    async fn resolve_request(
        &self,
        id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
        decision: Decision,
    ) -> Result<Resolution> {
        self.with_db(move |db| db.resolve_contact_request(id, actor, counterpart, decision))
            .await
    }

    async fn remove_contact(
        &self,
        edge_id: Uuid,
        actor: UserId,
        counterpart: Option<UserId>,
    ) -> Result<Removal> {
        self.with_db(move |db| db.remove_contact(edge_id, actor, counterpart))
            .await
    }

    async fn contacts_for(&self, user: UserId) -> Result<Vec<Contact>> {
        self.with_db(move |db| db.contacts_for(user)).await
    }

    async fn pending_requests_for(&self, user: UserId) -> Result<Vec<ContactRequest>> {
        self.with_db(move |db| db.pending_requests_for(user)).await
    }
}

#[async_trait]
impl MessageRepository for SqliteStore {
    async fn save_message(&self, message: Message) -> Result<Message> {
        self.with_db(move |db| {
            db.insert_message(&message)?;
            Ok(message)
        })
        .await
    }

    async fn message(&self, id: Uuid) -> Result<Message> {
        self.with_db(move |db| db.get_message(id)).await
    }

    async fn conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>> {
        self.with_db(move |db| db.conversation(a, b, limit)).await
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn users_by_ids(&self, ids: Vec<UserId>) -> Result<Vec<User>> {
        self.with_db(move |db| db.get_users(&ids)).await
    }

    async fn session(&self, id: Uuid) -> Result<Session> {
        self.with_db(move |db| db.get_session(id)).await
    }
}
