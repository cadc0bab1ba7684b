use async_trait::async_trait;
use tracing::error;

use crate::error::AuthError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// `false` on mismatch and on any hashing failure.
    async fn verify(&self, password: &str, hash: &str) -> bool;
}

/// bcrypt on the blocking pool, so hashing never stalls a runtime worker.
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

#[async_trait]
impl PasswordHasher for BcryptHasher {
    async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let password = password.to_owned();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| {
                error!("Password hashing task failed: {}", e);
                AuthError::Internal
            })?
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                AuthError::Internal
            })
    }

    async fn verify(&self, password: &str, hash: &str) -> bool {
        let password = password.to_owned();
        let hash = hash.to_owned();

        match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                error!("Failed to verify password: {}", e);
                false
            }
            Err(e) => {
                error!("Password verification task failed: {}", e);
                false
            }
        }
    }
}
