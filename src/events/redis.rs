use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ConsumerConfig;

use super::{Delivery, EventLog, EventLogError};

const PAYLOAD_FIELD: &str = "payload";

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// Event log on Redis streams (6.2 or later). Each topic is a stream; each
/// consumer stage reads through its own consumer group.
#[derive(Clone)]
pub struct RedisEventLog {
    conn: MultiplexedConnection,
    block_ms: usize,
    claim_idle: Duration,
    circuit_breaker: Breaker,
    known_groups: Arc<Mutex<HashSet<(String, String)>>>,
}

impl RedisEventLog {
    pub async fn connect(url: &str, config: &ConsumerConfig) -> Result<Self, EventLogError> {
        Self::connect_with_circuit_breaker(url, config, 3, 5).await
    }

    /// Connects with a custom publish circuit breaker: it opens after
    /// `failure_threshold` consecutive failures and probes again after
    /// roughly `reset_timeout_secs`.
    pub async fn connect_with_circuit_breaker(
        url: &str,
        config: &ConsumerConfig,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Result<Self, EventLogError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(Self {
            conn,
            block_ms: config.block_ms,
            claim_idle: config.claim_idle,
            circuit_breaker,
            known_groups: Default::default(),
        })
    }

    /// Takes over entries another consumer of `group` left unacknowledged for
    /// longer than `claim_idle`.
    async fn claim_stale(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, EventLogError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(topic)
            .arg(group)
            .arg(consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(parse_autoclaim(reply))
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), EventLogError> {
        let key = (topic.to_string(), group.to_string());
        if self
            .known_groups
            .lock()
            .map(|groups| groups.contains(&key))
            .unwrap_or(false)
        {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(topic, group, "0").await;
        match created {
            Ok(()) => {}
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        if let Ok(mut groups) = self.known_groups.lock() {
            groups.insert(key);
        }
        Ok(())
    }
}

fn into_deliveries(reply: Option<StreamReadReply>) -> Vec<Delivery> {
    reply
        .map(|reply| reply.keys)
        .unwrap_or_default()
        .into_iter()
        .flat_map(|key| key.ids)
        .map(|entry| Delivery {
            payload: entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default(),
            id: entry.id,
        })
        .collect()
}

/// XAUTOCLAIM replies with `[next-id, [[id, [field, value, ...]], ...], ...]`.
/// Entries deleted from the stream come back with nil fields and are handed
/// on with an empty payload so they get dead-lettered and acknowledged.
fn parse_autoclaim(reply: Value) -> Vec<Delivery> {
    let Value::Bulk(parts) = reply else {
        return Vec::new();
    };
    match parts.into_iter().nth(1) {
        Some(Value::Bulk(entries)) => entries.into_iter().filter_map(parse_claimed_entry).collect(),
        _ => Vec::new(),
    }
}

fn parse_claimed_entry(entry: Value) -> Option<Delivery> {
    let Value::Bulk(mut parts) = entry else {
        return None;
    };
    if parts.len() != 2 {
        return None;
    }
    let fields = parts.pop()?;
    let id: String = redis::from_redis_value(&parts.pop()?).ok()?;

    let payload = match fields {
        Value::Bulk(fields) => fields
            .chunks(2)
            .find_map(|pair| match pair {
                [key, value]
                    if redis::from_redis_value::<String>(key).ok().as_deref() == Some(PAYLOAD_FIELD) =>
                {
                    redis::from_redis_value::<String>(value).ok()
                }
                _ => None,
            })
            .unwrap_or_default(),
        _ => String::new(),
    };
    Some(Delivery { id, payload })
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn ping(&self) -> Result<(), EventLogError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<String, EventLogError> {
        let mut conn = self.conn.clone();
        let topic = topic.to_string();
        let fields = [(PAYLOAD_FIELD, payload.to_string())];

        let result = self
            .circuit_breaker
            .call(async move { conn.xadd::<_, _, _, _, String>(topic, "*", &fields).await })
            .await;

        match result {
            Ok(id) => Ok(id),
            Err(FailsafeError::Rejected) => Err(EventLogError::CircuitOpen(
                "event log publish circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e.into()),
        }
    }

    async fn fetch(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, EventLogError> {
        self.ensure_group(topic, group).await?;
        let mut conn = self.conn.clone();

        // "0" replays this consumer's unacknowledged entries.
        let pending_opts = StreamReadOptions::default().group(group, consumer).count(max);
        let pending: Option<StreamReadReply> =
            conn.xread_options(&[topic], &["0"], &pending_opts).await?;
        let deliveries = into_deliveries(pending);
        if !deliveries.is_empty() {
            return Ok(deliveries);
        }

        match self.claim_stale(topic, group, consumer, max).await {
            Ok(claimed) if !claimed.is_empty() => {
                tracing::info!(topic, group, consumer, count = claimed.len(), "Claimed stale pending entries");
                return Ok(claimed);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(topic, group, error = %e, "Claiming stale entries failed"),
        }

        let new_opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(max)
            .block(self.block_ms);
        let fresh: Option<StreamReadReply> = conn.xread_options(&[topic], &[">"], &new_opts).await?;
        Ok(into_deliveries(fresh))
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), EventLogError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(topic, group, &[id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn claimed_entries_are_decoded_in_order() {
        let reply = Value::Bulk(vec![
            data("0-0"),
            Value::Bulk(vec![
                Value::Bulk(vec![data("1-0"), Value::Bulk(vec![data("payload"), data("{\"a\":1}")])]),
                Value::Bulk(vec![data("2-0"), Value::Bulk(vec![data("payload"), data("{\"a\":2}")])]),
            ]),
            Value::Bulk(vec![]),
        ]);

        let deliveries = parse_autoclaim(reply);

        assert_eq!(
            deliveries,
            vec![
                Delivery { id: "1-0".into(), payload: "{\"a\":1}".into() },
                Delivery { id: "2-0".into(), payload: "{\"a\":2}".into() },
            ]
        );
    }

    #[test]
    fn deleted_entries_keep_their_id_with_empty_payload() {
        let reply = Value::Bulk(vec![
            data("0-0"),
            Value::Bulk(vec![Value::Bulk(vec![data("7-0"), Value::Nil])]),
        ]);

        let deliveries = parse_autoclaim(reply);

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].id, "7-0");
        assert!(deliveries[0].payload.is_empty());
    }

    #[test]
    fn empty_or_unexpected_replies_claim_nothing() {
        assert!(parse_autoclaim(Value::Bulk(vec![data("0-0"), Value::Bulk(vec![])])).is_empty());
        assert!(parse_autoclaim(Value::Nil).is_empty());
    }
}
