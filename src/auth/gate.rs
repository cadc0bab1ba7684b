use std::sync::Arc;
use tracing::{error, info, warn};

use super::password::PasswordHasher;
use crate::db::models::{NewUser, User};
use crate::db::Repository;
use crate::error::{AuthError, DatabaseError};
use crate::websocket::protocol::Credentials;

/// Validates credentials against the user store. Holds no per-connection
/// state; a session asks it once and keeps the returned identity.
pub struct AuthGate {
    repo: Arc<dyn Repository>,
    hasher: Arc<dyn PasswordHasher>,
}

impl AuthGate {
    pub fn new(repo: Arc<dyn Repository>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { repo, hasher }
    }

    /// Unknown users, wrong passwords and store failures all look the same
    /// to the caller.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let user = match self.repo.find_user(&credentials.username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("Login attempt for unknown user {}", credentials.username);
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                error!("Failed to look up user {}: {}", credentials.username, e);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.hasher.verify(&credentials.password, &user.password).await {
            warn!("Wrong password for user {}", user.username);
            return Err(AuthError::InvalidCredentials);
        }

        info!("User {} ({}) authenticated", user.username, user.id);
        Ok(user)
    }

    /// Creates the user. Does not log the caller in.
    pub async fn signup(&self, credentials: &Credentials) -> Result<User, AuthError> {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        match self.repo.find_user(&credentials.username).await {
            Ok(None) => {}
            Ok(Some(_)) => return Err(AuthError::UserExists),
            Err(e) => {
                error!("Failed to look up user {}: {}", credentials.username, e);
                return Err(AuthError::InvalidCredentials);
            }
        }

        let password = self.hasher.hash(&credentials.password).await?;
        let new_user = NewUser {
            username: credentials.username.clone(),
            password,
        };

        match self.repo.insert_user(new_user).await {
            Ok(user) => {
                info!("User {} ({}) signed up", user.username, user.id);
                Ok(user)
            }
            Err(DatabaseError::Duplicate) => Err(AuthError::UserExists),
            Err(e) => {
                error!("Failed to create user {}: {}", credentials.username, e);
                Err(AuthError::Internal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{BcryptHasher, MockPasswordHasher};
    use crate::db::repository::MockRepository;
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn stored_user(username: &str, password: &str) -> User {
        User {
            id: 7,
            username: username.to_string(),
            password: bcrypt::hash(password, 4).unwrap(),
            created_at: Utc::now(),
        }
    }

    fn gate(repo: MockRepository) -> AuthGate {
        AuthGate::new(Arc::new(repo), Arc::new(BcryptHasher::new(4)))
    }

    #[tokio::test]
    async fn test_login_success() {
        let mut repo = MockRepository::new();
        let user = stored_user("alice", "pw");
        repo.expect_find_user()
            .withf(|username| username == "alice")
            .times(1)
            .returning(move |_| Ok(Some(user.clone())));

        let user = assert_ok!(gate(repo).login(&credentials("alice", "pw")).await);
        assert_eq!(user.id, 7);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let mut repo = MockRepository::new();
        let user = stored_user("alice", "pw");
        repo.expect_find_user()
            .withf(|username| username == "alice")
            .returning(move |_| Ok(Some(user.clone())));
        repo.expect_find_user()
            .withf(|username| username == "ghost")
            .returning(|_| Ok(None));
        repo.expect_find_user()
            .withf(|username| username == "broken")
            .returning(|_| Err(DatabaseError::ConnectionError("down".into())));
        let gate = gate(repo);

        for (username, password) in [("alice", "wrong"), ("ghost", "pw"), ("broken", "pw")] {
            let err = assert_err!(gate.login(&credentials(username, password)).await);
            assert_eq!(err, AuthError::InvalidCredentials);
        }
    }

    #[tokio::test]
    async fn test_signup_hashes_password() {
        let mut repo = MockRepository::new();
        repo.expect_find_user().returning(|_| Ok(None));
        repo.expect_insert_user()
            .withf(|user| user.username == "bob" && user.password.starts_with("$2"))
            .times(1)
            .returning(|user| {
                Ok(User {
                    id: 1,
                    username: user.username,
                    password: user.password,
                    created_at: Utc::now(),
                })
            });

        let user = assert_ok!(gate(repo).signup(&credentials("bob", "secret")).await);
        assert_eq!(user.username, "bob");
    }

    #[tokio::test]
    async fn test_signup_existing_user() {
        let mut repo = MockRepository::new();
        let user = stored_user("alice", "pw");
        repo.expect_find_user().returning(move |_| Ok(Some(user.clone())));
        repo.expect_insert_user().never();

        let err = assert_err!(gate(repo).signup(&credentials("alice", "pw")).await);
        assert_eq!(err, AuthError::UserExists);
    }

    #[tokio::test]
    async fn test_signup_lost_race_reports_existing_user() {
        let mut repo = MockRepository::new();
        repo.expect_find_user().returning(|_| Ok(None));
        repo.expect_insert_user().returning(|_| Err(DatabaseError::Duplicate));

        let err = assert_err!(gate(repo).signup(&credentials("alice", "pw")).await);
        assert_eq!(err, AuthError::UserExists);
    }

    #[tokio::test]
    async fn test_signup_rejects_blank_credentials() {
        let mut repo = MockRepository::new();
        repo.expect_find_user().never();
        let gate = gate(repo);

        assert_err!(gate.signup(&credentials("  ", "pw")).await);
        assert_err!(gate.signup(&credentials("carol", "")).await);
    }

    #[tokio::test]
    async fn test_signup_hash_failure() {
        let mut repo = MockRepository::new();
        repo.expect_find_user().returning(|_| Ok(None));
        repo.expect_insert_user().never();
        let mut hasher = MockPasswordHasher::new();
        hasher.expect_hash().returning(|_| Err(AuthError::Internal));

        let gate = AuthGate::new(Arc::new(repo), Arc::new(hasher));
        let err = assert_err!(gate.signup(&credentials("dave", "pw")).await);
        assert_eq!(err, AuthError::Internal);
    }
}
