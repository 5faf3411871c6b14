use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::keys::thread_messages_key;

/// A thread message. `correlation_id` is the client-generated token echoed
/// back so optimistic copies can be matched to this record exactly.
/// `is_optimistic` is only ever true for client-side provisional copies; the
/// server never stores it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRecord {
    #[sqlx(rename = "message_id")]
    pub id: String,
    pub thread_id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    #[sqlx(default)]
    #[serde(default)]
    pub is_optimistic: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub thread_id: String,
    pub author: String,
    pub content: String,
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMessagesRequest {
    pub thread_id: String,
    pub limit: Option<i64>,
}

const MESSAGE_CACHE_EXPIRE: u64 = 300;
const DEFAULT_PAGE: i64 = 50;

impl MessageRecord {
    pub async fn create(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        req: CreateMessageRequest,
    ) -> Result<Self, sqlx::Error> {
        let message_id = Uuid::new_v4().to_string();

        let message = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (message_id, thread_id, author, content, correlation_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING message_id, thread_id, author, content, correlation_id, created_at
            "#,
        )
        .bind(&message_id)
        .bind(&req.thread_id)
        .bind(&req.author)
        .bind(&req.content)
        .bind(req.correlation_id)
        .fetch_one(pool)
        .await?;

        // The cached latest page is stale as of this write.
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = thread_messages_key(&req.thread_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }

        Ok(message)
    }

    pub async fn get_messages(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        req: GetMessagesRequest,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let limit = req.limit.unwrap_or(DEFAULT_PAGE).clamp(1, 100);
        let default_page = limit == DEFAULT_PAGE;

        if default_page {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                let cache_key = thread_messages_key(&req.thread_id);
                let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
                if let Ok(json_str) = cached {
                    if let Ok(messages) = serde_json::from_str::<Vec<MessageRecord>>(&json_str) {
                        tracing::debug!("messages served from cache: {}", cache_key);
                        return Ok(messages);
                    }
                }
            }
        }

        let messages = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT message_id, thread_id, author, content, correlation_id, created_at
            FROM messages
            WHERE thread_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(&req.thread_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        if default_page {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                let cache_key = thread_messages_key(&req.thread_id);
                if let Ok(json_str) = serde_json::to_string(&messages) {
                    let _: Result<(), redis::RedisError> =
                        conn.set_ex(&cache_key, json_str, MESSAGE_CACHE_EXPIRE).await;
                }
            }
        }

        Ok(messages)
    }
}
