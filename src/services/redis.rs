//! Redis service for request idempotency keys

use redis::{AsyncCommands, Client, SetExpiry, SetOptions};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RedisService {
    client: Client,
    idempotency_ttl_seconds: u64,
}

/// Redis key under which a client idempotency key is remembered
fn idempotency_key(operation: &str, user_id: i32, client_key: &str) -> String {
    let digest = Sha256::digest(client_key.as_bytes());
    format!("idem:{}:{}:{}", operation, user_id, hex::encode(digest))
}

impl RedisService {
    /// Create a new Redis service
    pub async fn new(url: &str, idempotency_ttl_seconds: u64) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        // Test connection
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(Self {
            client,
            idempotency_ttl_seconds,
        })
    }

    /// Claim an idempotency key for one operation of one user.
    /// Returns false if the key was already claimed and has not expired.
    pub async fn claim_idempotency_key(
        &self,
        operation: &str,
        user_id: i32,
        client_key: &str,
    ) -> AppResult<bool> {
        let mut conn = self.get_connection().await?;
        let key = idempotency_key(operation, user_id, client_key);
        let options = SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(self.idempotency_ttl_seconds as usize));

        let claimed: Option<String> = conn
            .set_options(&key, "1", options)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store idempotency key in Redis: {}", e)))?;

        Ok(claimed.is_some())
    }

    /// Give a key back after the operation failed, so the client can retry
    pub async fn release_idempotency_key(
        &self,
        operation: &str,
        user_id: i32,
        client_key: &str,
    ) -> AppResult<()> {
        let mut conn = self.get_connection().await?;
        let _: () = conn
            .del(idempotency_key(operation, user_id, client_key))
            .await
            .map_err(|e| AppError::Internal(format!("Failed to delete idempotency key from Redis: {}", e)))?;
        Ok(())
    }

    /// Check the connection is alive
    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }

    /// Get a Redis connection (for advanced operations)
    pub async fn get_connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get Redis connection: {}", e)))
    }
}
