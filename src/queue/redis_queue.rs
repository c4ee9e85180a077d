//! Redis Streams job queue
//!
//! Layout, for a stream named `S`:
//! - `S`: live messages, read through a consumer group
//! - `S:delayed`: sorted set of retries scored by due time (ms), promoted
//!   back into `S` by whichever consumer polls next
//!
//! Consumers heartbeat their in-flight deliveries so that only entries whose
//! holder went quiet are reclaimed, and each reclaim counts as an attempt.
//! - `S_dead_letter`: exhausted messages with their last error
//! - `S:dedupe:<job_id>`: marks a job as live in the queue

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::redis;
use deadpool_redis::{Connection, Pool as RedisPool};
use uuid::Uuid;

use crate::{
    config::QueueConfig,
    constants::{DELAYED_PROMOTION_BATCH, QUEUE_BLOCK_MS},
    error::{AppError, AppResult},
    models::QueueMessage,
};

use super::{Delivery, JobQueue, RetryDecision, RetryPolicy};

/// Raw stream entry: message id and its field map
type StreamEntry = (String, HashMap<String, String>);

/// KEYS: delayed set, stream. ARGV: payload, then the entry's field/value pairs.
/// The caller whose ZREM succeeds is the one that adds the entry.
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return false
end
return redis.call('XADD', KEYS[2], '*', unpack(ARGV, 2))
"#;

pub struct RedisJobQueue {
    pool: RedisPool,
    config: QueueConfig,
    policy: RetryPolicy,
}

impl RedisJobQueue {
    pub fn new(pool: RedisPool, config: QueueConfig) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            pool,
            config,
            policy,
        }
    }

    pub fn dead_letter_stream(&self) -> String {
        format!("{}_dead_letter", self.config.stream)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.config.stream)
    }

    fn dedupe_key(&self, job_id: Uuid) -> String {
        format!("{}:dedupe:{}", self.config.stream, job_id)
    }

    /// Create the consumer groups if they do not exist yet.
    pub async fn initialize(&self) -> AppResult<()> {
        let mut conn = self.pool.get().await?;

        create_consumer_group(&mut conn, &self.config.stream, &self.config.consumer_group).await?;
        create_consumer_group(&mut conn, &self.dead_letter_stream(), &self.config.consumer_group)
            .await?;

        Ok(())
    }

    /// Move due retries from the delayed set back into the stream.
    async fn promote_due_retries(&self, conn: &mut Connection) -> AppResult<usize> {
        let key = self.delayed_key();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(Utc::now().timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(DELAYED_PROMOTION_BATCH)
            .query_async(&mut **conn)
            .await?;

        let mut promoted = 0;
        for payload in due {
            let message = match serde_json::from_str::<QueueMessage>(&payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, payload = %payload, "Dropping malformed delayed retry");
                    let _: i64 = redis::cmd("ZREM")
                        .arg(&key)
                        .arg(&payload)
                        .query_async(&mut **conn)
                        .await?;
                    continue;
                }
            };

            let mut cmd = redis::cmd("EVAL");
            cmd.arg(PROMOTE_SCRIPT)
                .arg(2)
                .arg(&key)
                .arg(&self.config.stream)
                .arg(&payload);
            for (field, value) in message.to_fields() {
                cmd.arg(field).arg(value);
            }
            let stream_id: Option<String> = cmd.query_async(&mut **conn).await?;
            let Some(stream_id) = stream_id else {
                continue;
            };

            tracing::debug!(
                job_id = %message.job_id,
                stream_id = %stream_id,
                attempt = message.retry_count + 1,
                "Promoted delayed retry"
            );
            promoted += 1;
        }

        Ok(promoted)
    }

    /// Take over one message left pending by a consumer that went quiet.
    async fn claim_stale(&self, conn: &mut Connection) -> AppResult<Option<StreamEntry>> {
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(self.config.claim_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut **conn)
            .await?;

        Ok(parse_autoclaim_reply(&reply))
    }

    /// How many times the group has handed out entry `id`.
    async fn delivery_count(&self, conn: &mut Connection, id: &str) -> AppResult<u32> {
        let reply: redis::Value = redis::cmd("XPENDING")
            .arg(&self.config.stream)
            .arg(&self.config.consumer_group)
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(&mut **conn)
            .await?;

        Ok(parse_pending_count(&reply).unwrap_or(1))
    }

    async fn read_new(&self, conn: &mut Connection) -> AppResult<Option<StreamEntry>> {
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(QUEUE_BLOCK_MS)
            .arg("STREAMS")
            .arg(&self.config.stream)
            .arg(">")
            .query_async(&mut **conn)
            .await?;

        Ok(parse_read_reply(&reply))
    }

    async fn ack_id(&self, conn: &mut Connection, id: &str) -> AppResult<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.config.stream)
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async(&mut **conn)
            .await?;
        Ok(())
    }

    async fn move_to_dead_letter(
        &self,
        conn: &mut Connection,
        message: &QueueMessage,
        error: &str,
    ) -> AppResult<()> {
        let mut fields = message.to_fields();
        fields.push(("error", error.to_string()));
        fields.push(("failed_at", Utc::now().to_rfc3339()));
        let stream_id = add_to_stream(conn, &self.dead_letter_stream(), &fields).await?;

        let _: i64 = redis::cmd("DEL")
            .arg(self.dedupe_key(message.job_id))
            .query_async(&mut **conn)
            .await?;

        tracing::info!(
            job_id = %message.job_id,
            stream_id = %stream_id,
            "Moved to dead letter queue"
        );
        Ok(())
    }

    async fn poll(&self) -> AppResult<Option<Delivery>> {
        let mut conn = self.pool.get().await?;

        self.promote_due_retries(&mut conn).await?;

        let (entry, delivery_count) = match self.claim_stale(&mut conn).await? {
            Some(entry) => {
                let count = self.delivery_count(&mut conn, &entry.0).await?;
                tracing::warn!(message_id = %entry.0, delivery_count = count, "Reclaimed stale delivery");
                (Some(entry), count)
            }
            None => (self.read_new(&mut conn).await?, 1),
        };

        let Some((id, fields)) = entry else {
            return Ok(None);
        };

        match QueueMessage::from_fields(&fields) {
            Some(message) => Ok(Some(Delivery {
                id,
                message,
                delivery_count,
            })),
            None => {
                tracing::error!(message_id = %id, fields = ?fields, "Discarding malformed queue message");
                self.ack_id(&mut conn, &id).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, message: &QueueMessage) -> AppResult<bool> {
        let mut conn = self.pool.get().await?;

        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.dedupe_key(message.job_id))
            .arg(Utc::now().timestamp_millis())
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedupe_ttl_secs)
            .query_async(&mut *conn)
            .await?;

        if claimed.is_none() {
            tracing::info!(job_id = %message.job_id, "Job already queued, skipping duplicate");
            return Ok(false);
        }

        let stream_id = add_to_stream(&mut conn, &self.config.stream, &message.to_fields()).await?;
        tracing::info!(job_id = %message.job_id, stream_id = %stream_id, "Job enqueued");

        Ok(true)
    }

    async fn next_delivery(&self) -> AppResult<Option<Delivery>> {
        match self.poll().await {
            Err(AppError::Redis(msg)) if msg.contains("NOGROUP") => {
                tracing::warn!("Consumer group missing, re-initializing");
                self.initialize().await?;
                Ok(None)
            }
            other => other,
        }
    }

    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        let mut conn = self.pool.get().await?;

        self.ack_id(&mut conn, &delivery.id).await?;
        let _: i64 = redis::cmd("DEL")
            .arg(self.dedupe_key(delivery.message.job_id))
            .query_async(&mut *conn)
            .await?;

        tracing::debug!(message_id = %delivery.id, "Message acknowledged");
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> AppResult<RetryDecision> {
        let mut conn = self.pool.get().await?;
        let message = &delivery.message;

        // Schedule before acking: a crash in between duplicates, never loses
        let decision = match self.policy.next_delay(message.retry_count) {
            Some(delay) => {
                let next = message.next_attempt();
                let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                let _: i64 = redis::cmd("ZADD")
                    .arg(self.delayed_key())
                    .arg(due)
                    .arg(serde_json::to_string(&next)?)
                    .query_async(&mut *conn)
                    .await?;

                RetryDecision::Retry {
                    retry_count: next.retry_count,
                    delay,
                }
            }
            None => {
                self.move_to_dead_letter(&mut conn, message, error).await?;
                RetryDecision::DeadLettered
            }
        };

        self.ack_id(&mut conn, &delivery.id).await?;
        Ok(decision)
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> AppResult<()> {
        let mut conn = self.pool.get().await?;
        self.move_to_dead_letter(&mut conn, &delivery.message, error).await?;
        self.ack_id(&mut conn, &delivery.id).await
    }

    async fn touch(&self, delivery: &Delivery) -> AppResult<()> {
        let mut conn = self.pool.get().await?;

        // JUSTID resets the idle clock without bumping the delivery counter
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.config.stream)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(0)
            .arg(&delivery.id)
            .arg("JUSTID")
            .query_async(&mut *conn)
            .await?;

        tracing::trace!(message_id = %delivery.id, "Delivery heartbeat");
        Ok(())
    }

    fn exhausted(&self, delivery: &Delivery) -> bool {
        self.policy
            .is_exhausted(delivery.message.retry_count, delivery.delivery_count)
    }
}

async fn create_consumer_group(conn: &mut Connection, stream: &str, group: &str) -> AppResult<()> {
    let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(&mut **conn)
        .await;

    match result {
        Ok(()) => {
            tracing::info!("Created consumer group '{}' on stream '{}'", group, stream);
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            tracing::debug!("Consumer group '{}' already exists on '{}'", group, stream);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn add_to_stream(
    conn: &mut Connection,
    stream: &str,
    fields: &[(&str, String)],
) -> AppResult<String> {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("*");
    for (field, value) in fields {
        cmd.arg(*field).arg(value);
    }
    let id: String = cmd.query_async(&mut **conn).await?;
    Ok(id)
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(s) => Some(String::from_utf8_lossy(s).to_string()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// `[message_id, [field, value, ...]]`
fn parse_entry(value: &redis::Value) -> Option<StreamEntry> {
    let redis::Value::Array(entry) = value else {
        return None;
    };
    let id = value_to_string(entry.first()?)?;
    let redis::Value::Array(fields) = entry.get(1)? else {
        return None;
    };

    let mut data = HashMap::new();
    let mut iter = fields.iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        if let (Some(k), Some(v)) = (value_to_string(key), value_to_string(value)) {
            data.insert(k, v);
        }
    }

    Some((id, data))
}

/// XREADGROUP: `[[stream_name, [entry, ...]]]`, or nil on timeout
fn parse_read_reply(reply: &redis::Value) -> Option<StreamEntry> {
    let redis::Value::Array(streams) = reply else {
        return None;
    };
    let redis::Value::Array(stream) = streams.first()? else {
        return None;
    };
    let redis::Value::Array(entries) = stream.get(1)? else {
        return None;
    };
    entries.iter().find_map(parse_entry)
}

/// XAUTOCLAIM: `[next_cursor, [entry, ...], [deleted_id, ...]]`
fn parse_autoclaim_reply(reply: &redis::Value) -> Option<StreamEntry> {
    let redis::Value::Array(parts) = reply else {
        return None;
    };
    let redis::Value::Array(entries) = parts.get(1)? else {
        return None;
    };
    entries.iter().find_map(parse_entry)
}

/// XPENDING extended form: `[[id, consumer, idle_ms, delivery_count], ...]`
fn parse_pending_count(reply: &redis::Value) -> Option<u32> {
    let redis::Value::Array(entries) = reply else {
        return None;
    };
    let redis::Value::Array(entry) = entries.first()? else {
        return None;
    };
    match entry.get(3)? {
        redis::Value::Int(count) => u32::try_from(*count).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> redis::Value {
        redis::Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> redis::Value {
        let flat = fields
            .iter()
            .flat_map(|(k, v)| [bulk(k), bulk(v)])
            .collect();
        redis::Value::Array(vec![bulk(id), redis::Value::Array(flat)])
    }

    #[test]
    fn test_parse_read_reply() {
        let reply = redis::Value::Array(vec![redis::Value::Array(vec![
            bulk("execution_queue"),
            redis::Value::Array(vec![entry("1-0", &[("job_id", "abc"), ("language", "python")])]),
        ])]);

        let (id, fields) = parse_read_reply(&reply).unwrap();
        assert_eq!(id, "1-0");
        assert_eq!(fields.get("language").map(String::as_str), Some("python"));
    }

    #[test]
    fn test_parse_read_reply_timeout() {
        assert!(parse_read_reply(&redis::Value::Nil).is_none());
    }

    #[test]
    fn test_parse_autoclaim_reply() {
        let reply = redis::Value::Array(vec![
            bulk("0-0"),
            redis::Value::Array(vec![redis::Value::Nil, entry("7-1", &[("job_id", "x")])]),
            redis::Value::Array(vec![]),
        ]);
        let (id, _) = parse_autoclaim_reply(&reply).unwrap();
        assert_eq!(id, "7-1");

        let empty = redis::Value::Array(vec![
            bulk("0-0"),
            redis::Value::Array(vec![]),
            redis::Value::Array(vec![]),
        ]);
        assert!(parse_autoclaim_reply(&empty).is_none());
    }

    #[test]
    fn test_parse_pending_count() {
        let reply = redis::Value::Array(vec![redis::Value::Array(vec![
            bulk("7-1"),
            bulk("worker_b"),
            redis::Value::Int(120_000),
            redis::Value::Int(3),
        ])]);
        assert_eq!(parse_pending_count(&reply), Some(3));
        assert_eq!(parse_pending_count(&redis::Value::Array(vec![])), None);
    }

    #[test]
    fn test_parse_entry_skips_odd_field() {
        let value = redis::Value::Array(vec![
            bulk("2-0"),
            redis::Value::Array(vec![bulk("a"), bulk("1"), bulk("dangling")]),
        ]);
        let (_, fields) = parse_entry(&value).unwrap();
        assert_eq!(fields.len(), 1);
    }
}
