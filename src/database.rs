use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::StorageError;

pub const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    password TEXT
)
"#;

/// SHA-256 of the plaintext, hex encoded.
///
/// Unsalted: identical passwords share a digest and the table is exposed to
/// precomputed-hash attacks. Kept so existing `users.db` files stay valid.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Durable username -> password hash mapping gating the dashboard.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    /// Opens (creating if absent) the SQLite file behind `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(CredentialStore { pool })
    }

    /// Creates the `users` table if it does not exist. Idempotent.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        sqlx::query(USERS_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts a new record. `Ok(false)` means the username is already taken
    /// and nothing was written.
    pub async fn register(&self, username: &str, password: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(username)
            .bind(hash_password(password))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// True only when a record with this username and this password hash
    /// exists. Unknown user and wrong password are indistinguishable.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool, StorageError> {
        let matches: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? AND password = ?")
                .bind(username)
                .bind(hash_password(password))
                .fetch_one(&self.pool)
                .await?;

        Ok(matches > 0)
    }

    pub async fn stored_hash(&self, username: &str) -> Result<Option<String>, StorageError> {
        let hash = sqlx::query_scalar("SELECT password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(hash)
    }
}
