//! Collaborator interfaces consumed by the real-time core, and their
//! SQLite-backed implementation.
//!
//! The traits are synchronous because `rusqlite` is; async callers go
//! through [`run_blocking`], which moves the call onto the blocking pool and
//! bounds it with a timeout.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use campus_shared::types::{MessageId, UserId};
use campus_store::{
    Database, DeleteOutcome, DirectMessage, DirectMessageDraft, GroupMessage, GroupMessageDraft,
    StoreError, User,
};

use crate::error::ServerError;

/// Persistence of direct and group messages.
pub trait MessageStore: Send + Sync + 'static {
    fn insert_direct(&self, draft: &DirectMessageDraft) -> Result<DirectMessage, StoreError>;
    fn insert_group(&self, draft: &GroupMessageDraft) -> Result<GroupMessage, StoreError>;
    fn delete_direct(&self, id: MessageId, requester: UserId) -> Result<DeleteOutcome, StoreError>;
    fn delete_group(&self, id: MessageId, requester: UserId) -> Result<DeleteOutcome, StoreError>;
}

/// User lookup by id.
pub trait UserDirectory: Send + Sync + 'static {
    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

/// Shared handle to the SQLite database.
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

    /// Run `f` with exclusive access to the database.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T, StoreError>) -> Result<T, StoreError> {
        // A panic while holding the lock cannot leave the connection in a
        // half-written state outside a transaction, so keep going.
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }
}

impl MessageStore for SqliteStore {
    fn insert_direct(&self, draft: &DirectMessageDraft) -> Result<DirectMessage, StoreError> {
        self.with_db(|db| db.insert_direct_message(draft))
    }

    fn insert_group(&self, draft: &GroupMessageDraft) -> Result<GroupMessage, StoreError> {
        self.with_db(|db| db.insert_group_message(draft))
    }

    fn delete_direct(&self, id: MessageId, requester: UserId) -> Result<DeleteOutcome, StoreError> {
        self.with_db(|db| db.delete_direct_message(id, requester))
    }

    fn delete_group(&self, id: MessageId, requester: UserId) -> Result<DeleteOutcome, StoreError> {
        self.with_db(|db| db.delete_group_message(id, requester))
    }
}

impl UserDirectory for SqliteStore {
    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.with_db(|db| db.find_user(id))
    }
}

/// Run a blocking store call on the blocking pool, bounded by `timeout`.
///
/// On timeout the call keeps running to completion in the background; only
/// the caller stops waiting for it.
pub async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(ServerError::StoreTimeout),
        Ok(Err(join_err)) => Err(ServerError::Internal(format!(
            "store task failed: {join_err}"
        ))),
        Ok(Ok(result)) => result.map_err(ServerError::from),
    }
}

/// A message store whose every write fails, as on a full disk.
#[cfg(test)]
pub(crate) struct BrokenStore;

#[cfg(test)]
impl BrokenStore {
    fn failure() -> StoreError {
        StoreError::Io(std::io::Error::other("disk full"))
    }
}

#[cfg(test)]
impl MessageStore for BrokenStore {
    fn insert_direct(&self, _: &DirectMessageDraft) -> Result<DirectMessage, StoreError> {
        Err(Self::failure())
    }

    fn insert_group(&self, _: &GroupMessageDraft) -> Result<GroupMessage, StoreError> {
        Err(Self::failure())
    }

    fn delete_direct(&self, _: MessageId, _: UserId) -> Result<DeleteOutcome, StoreError> {
        Err(Self::failure())
    }

    fn delete_group(&self, _: MessageId, _: UserId) -> Result<DeleteOutcome, StoreError> {
        Err(Self::failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_blocking_returns_value() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let user = store
            .with_db(|db| db.insert_user("Ada", None, None))
            .unwrap();

        let s = store.clone();
        let found = run_blocking(Duration::from_secs(1), move || s.find_user(user.id))
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.display_name).as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn run_blocking_times_out() {
        let result: Result<(), ServerError> = run_blocking(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ServerError::StoreTimeout)));
    }
}
