//! In-memory event log with consumer-group semantics close to Redis streams:
//! per-topic FIFO, per-group cursor, unacknowledged entries redelivered first.
//! Pending entries belong to the group rather than one consumer, which is
//! what the Redis adapter reaches by claiming idle entries.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{Delivery, EventLog, EventLogError};

#[derive(Default)]
struct GroupCursor {
    next: usize,
    pending: BTreeSet<usize>,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<String>>,
    groups: HashMap<(String, String), GroupCursor>,
    failing_fetches: u32,
    failing_publishes: u32,
}

#[derive(Default)]
pub struct InMemoryEventLog {
    state: Mutex<LogState>,
}

fn message_id(index: usize) -> String {
    format!("{}-0", index + 1)
}

fn parse_message_id(id: &str) -> Option<usize> {
    id.split('-').next()?.parse::<usize>().ok()?.checked_sub(1)
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All payloads ever published to `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.state().topics.get(topic).cloned().unwrap_or_default()
    }

    /// Number of delivered but unacknowledged entries for a group.
    pub fn pending_count(&self, topic: &str, group: &str) -> usize {
        self.state()
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|c| c.pending.len())
            .unwrap_or(0)
    }

    /// The next `n` fetches fail.
    pub fn fail_fetches(&self, n: u32) {
        self.state().failing_fetches = n;
    }

    /// The next `n` publishes fail.
    pub fn fail_publishes(&self, n: u32) {
        self.state().failing_publishes = n;
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn ping(&self) -> Result<(), EventLogError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<String, EventLogError> {
        let mut state = self.state();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(EventLogError::Unavailable("injected publish failure".into()));
        }
        let entries = state.topics.entry(topic.to_string()).or_default();
        entries.push(payload.to_string());
        Ok(message_id(entries.len() - 1))
    }

    async fn fetch(
        &self,
        topic: &str,
        group: &str,
        _consumer: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, EventLogError> {
        let mut state = self.state();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(EventLogError::Unavailable("injected fetch failure".into()));
        }

        let entries = state.topics.get(topic).cloned().unwrap_or_default();
        let cursor = state
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_default();

        let indexes: Vec<usize> = if cursor.pending.is_empty() {
            let fresh: Vec<usize> = (cursor.next..entries.len()).take(max).collect();
            cursor.next += fresh.len();
            cursor.pending.extend(fresh.iter().copied());
            fresh
        } else {
            cursor.pending.iter().copied().take(max).collect()
        };

        Ok(indexes
            .into_iter()
            .map(|i| Delivery {
                id: message_id(i),
                payload: entries[i].clone(),
            })
            .collect())
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), EventLogError> {
        let index = parse_message_id(id)
            .ok_or_else(|| EventLogError::Unavailable(format!("unknown message id {}", id)))?;
        if let Some(cursor) = self
            .state()
            .groups
            .get_mut(&(topic.to_string(), group.to_string()))
        {
            cursor.pending.remove(&index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unacked_entries_are_redelivered_first() {
        let log = InMemoryEventLog::new();
        log.publish("t", "one").await.unwrap();
        log.publish("t", "two").await.unwrap();

        let first = log.fetch("t", "g", "c", 1).await.unwrap();
        assert_eq!(first[0].payload, "one");

        let again = log.fetch("t", "g", "c", 10).await.unwrap();
        assert_eq!(again, first);

        log.ack("t", "g", &first[0].id).await.unwrap();
        let next = log.fetch("t", "g", "c", 10).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].payload, "two");
    }

    #[tokio::test]
    async fn another_consumer_picks_up_a_retired_consumers_backlog() {
        let log = InMemoryEventLog::new();
        log.publish("t", "one").await.unwrap();

        let taken = log.fetch("t", "g", "consumer-0", 10).await.unwrap();
        let claimed = log.fetch("t", "g", "consumer-1", 10).await.unwrap();

        assert_eq!(claimed, taken);
        log.ack("t", "g", &claimed[0].id).await.unwrap();
        assert_eq!(log.pending_count("t", "g"), 0);
    }

    #[tokio::test]
    async fn groups_have_independent_cursors() {
        let log = InMemoryEventLog::new();
        log.publish("t", "one").await.unwrap();

        assert_eq!(log.fetch("t", "a", "c", 10).await.unwrap().len(), 1);
        assert_eq!(log.fetch("t", "b", "c", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_fetch_failures_are_consumed() {
        let log = InMemoryEventLog::new();
        log.fail_fetches(1);
        assert!(log.fetch("t", "g", "c", 1).await.is_err());
        assert!(log.fetch("t", "g", "c", 1).await.unwrap().is_empty());
    }
}
