//! Connection authentication.
//!
//! Token issuance lives outside this service. The socket handshake carries
//! the user id in its query string and the [`Authenticator`] decides whether
//! to trust it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use campus_shared::types::UserId;

use crate::error::ServerError;
use crate::store::{run_blocking, UserDirectory};

/// Query parameters of `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct Handshake {
    pub user_id: Option<i64>,
}

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, handshake: &Handshake) -> Result<UserId, ServerError>;
}

/// Accepts any handshake naming an existing user.
pub struct DirectoryAuthenticator {
    users: Arc<dyn UserDirectory>,
    timeout: Duration,
}

impl DirectoryAuthenticator {
    pub fn new(users: Arc<dyn UserDirectory>, timeout: Duration) -> Self {
        Self { users, timeout }
    }
}

#[async_trait]
impl Authenticator for DirectoryAuthenticator {
    async fn authenticate(&self, handshake: &Handshake) -> Result<UserId, ServerError> {
        let Some(raw) = handshake.user_id else {
            return Err(ServerError::Unauthorized("missing user_id".into()));
        };
        let user_id = UserId(raw);

        let users = Arc::clone(&self.users);
        match run_blocking(self.timeout, move || users.find_user(user_id)).await? {
            Some(user) => Ok(user.id),
            None => Err(ServerError::Unauthorized(format!("unknown user {user_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use campus_store::Database;

    #[tokio::test]
    async fn known_user_is_accepted() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let ada = store.with_db(|db| db.insert_user("Ada", None, None)).unwrap();
        let auth = DirectoryAuthenticator::new(Arc::new(store), Duration::from_secs(1));

        let user = auth
            .authenticate(&Handshake {
                user_id: Some(ada.id.0),
            })
            .await
            .unwrap();
        assert_eq!(user, ada.id);
    }

    #[tokio::test]
    async fn missing_or_unknown_user_is_refused() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let auth = DirectoryAuthenticator::new(Arc::new(store), Duration::from_secs(1));

        let err = auth.authenticate(&Handshake { user_id: None }).await.unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));

        let err = auth
            .authenticate(&Handshake { user_id: Some(42) })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }
}
