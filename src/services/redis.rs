//! Redis-backed fast store

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

use super::fast_store::FastStore;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RedisService {
    conn: ConnectionManager,
}

impl RedisService {
    /// Create a new Redis service
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        // Test connection
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(Self { conn })
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl FastStore for RedisService {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let value: Option<String> = self.connection().get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        self.connection()
            .set_ex::<_, _, ()>(key, value, ttl_secs.max(1))
            .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.connection().del(keys).await?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let keys: Vec<String> = self.connection().keys(pattern).await?;
        Ok(keys)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<()> {
        self.connection().zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let members: Vec<String> = self.connection().zrevrange(key, start, stop).await?;
        Ok(members)
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        let count: u64 = self.connection().zcard(key).await?;
        Ok(count)
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<()> {
        self.connection().zrem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> AppResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // Explicit MGET so a single key still yields a one-element array
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.connection())
            .await?;
        Ok(values)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> AppResult<()> {
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut self.connection())
            .await?;
        Ok(())
    }
}
