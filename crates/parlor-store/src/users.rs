//! User credentials with bcrypt password hashes.

use async_trait::async_trait;
use rusqlite::{ErrorCode, OptionalExtension};
use tracing::{debug, instrument, warn};

use parlor_core::{Authenticator, StoreError};

use crate::database::{db_err, Database};

/// Credential storage over the `users` table.
#[derive(Clone)]
pub struct UserRepo {
    db: Database,
    bcrypt_cost: u32,
}

impl UserRepo {
    pub fn new(db: Database, bcrypt_cost: u32) -> Self {
        Self { db, bcrypt_cost }
    }

    /// Insert a user with an already-hashed password.
    ///
    /// The `UNIQUE` constraint on `username` arbitrates concurrent
    /// registrations: exactly one insert succeeds, the rest get `Conflict`.
    #[instrument(skip(self, password_hash))]
    pub fn insert(&self, username: &str, password_hash: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                rusqlite::params![username, password_hash],
            ) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict(format!("username taken: {username}")))
                }
                Err(e) => Err(db_err(e)),
            }
        })
    }

    /// Stored hash for a user, if the user exists.
    pub fn password_hash(&self, username: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Hash and store a new user. Blocking.
    pub fn create(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let hash = bcrypt::hash(password, self.bcrypt_cost)
            .map_err(|e| StoreError::Hashing(e.to_string()))?;
        self.insert(username, &hash)
    }

    /// Check a password against the stored hash. Blocking.
    pub fn check(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let Some(hash) = self.password_hash(username)? else {
            debug!(username, "login for unknown user");
            return Ok(false);
        };
        bcrypt::verify(password, &hash).map_err(|e| StoreError::Hashing(e.to_string()))
    }
}

#[async_trait]
impl Authenticator for UserRepo {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let repo = self.clone();
        let (username, password) = (username.to_owned(), password.to_owned());
        match tokio::task::spawn_blocking(move || repo.check(&username, &password)).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                warn!(error = %e, "credential check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "credential check task failed");
                false
            }
        }
    }

    async fn register(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let repo = self.clone();
        let (username, password) = (username.to_owned(), password.to_owned());
        tokio::task::spawn_blocking(move || repo.create(&username, &password))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
