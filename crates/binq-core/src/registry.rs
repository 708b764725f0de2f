//! Tracks which consumers are attached to which queue and keeps their
//! partition assignments current as consumers join and leave.
//!
//! Registries are keyed per queue name rather than shared across all
//! queues: a consumer only ever competes for partitions with other
//! consumers of the *same* queue, so there is no reason for one queue's
//! churn to trigger a rebalance of an unrelated queue's consumers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::Connection;
use crate::partition::{partitions_for, TooManyInstances};

pub struct Consumer<S> {
    pub instance: u32,
    pub partitions: Vec<u32>,
    pub connection: Arc<Connection<S>>,
}

#[derive(Default)]
struct QueueConsumers<S> {
    consumers: Vec<Arc<Consumer<S>>>,
}

/// Per-queue consumer membership, with rebalancing on join/leave.
pub struct Registry<S> {
    queues: RwLock<HashMap<String, QueueConsumers<S>>>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` as a consumer of `queue_name` and rebalances every
    /// consumer of that queue against the new total. Returns the full,
    /// rebalanced membership so the caller can push updated partition
    /// assignments out if it wants to.
    pub async fn join(
        &self,
        queue_name: &str,
        max_partitions: u32,
        connection: Arc<Connection<S>>,
    ) -> Result<Vec<Arc<Consumer<S>>>, TooManyInstances> {
        let mut queues = self.queues.write().await;
        let entry = queues.entry(queue_name.to_owned()).or_default();

        let total = entry.consumers.len() as u32 + 1;
        if total > max_partitions {
            return Err(TooManyInstances {
                instance: total,
                max_partitions,
            });
        }

        let mut members = std::mem::take(&mut entry.consumers);
        members.push(Arc::new(Consumer {
            instance: total,
            partitions: Vec::new(),
            connection,
        }));
        entry.consumers = rebalance(members, total, max_partitions);
        Ok(entry.consumers.clone())
    }

    /// Removes the consumer owning `conn_id` from `queue_name`, if present,
    /// and rebalances the remainder. Drops the queue entry entirely once
    /// its last consumer leaves.
    pub async fn leave(&self, queue_name: &str, conn_id: u64, max_partitions: u32) {
        let mut queues = self.queues.write().await;
        let Some(entry) = queues.get_mut(queue_name) else {
            return;
        };
        entry.consumers.retain(|c| c.connection.id != conn_id);
        let total = entry.consumers.len() as u32;
        if total == 0 {
            queues.remove(queue_name);
            return;
        }
        let members = std::mem::take(&mut entry.consumers);
        entry.consumers = rebalance(members, total, max_partitions);
    }

    pub async fn consumers_for(&self, queue_name: &str) -> Vec<Arc<Consumer<S>>> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|entry| entry.consumers.clone())
            .unwrap_or_default()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.read().await;
        queues.keys().cloned().collect()
    }
}

fn rebalance<S>(
    members: Vec<Arc<Consumer<S>>>,
    total: u32,
    max_partitions: u32,
) -> Vec<Arc<Consumer<S>>> {
    members
        .into_iter()
        .enumerate()
        .map(|(idx, member)| {
            let instance = idx as u32 + 1;
            Arc::new(Consumer {
                instance,
                partitions: partitions_for(instance, total, max_partitions),
                connection: Arc::clone(&member.connection),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn conn(id: u64) -> Arc<Connection<tokio::io::DuplexStream>> {
        let (_client, server) = duplex(64);
        Arc::new(Connection::new(id, "127.0.0.1:1", "127.0.0.1:2", server))
    }

    #[tokio::test]
    async fn join_assigns_partitions_across_the_stripe() {
        let registry: Registry<tokio::io::DuplexStream> = Registry::new();
        registry.join("orders", 4, conn(1)).await.unwrap();
        let members = registry.join("orders", 4, conn(2)).await.unwrap();

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].partitions, vec![1, 3]);
        assert_eq!(members[1].partitions, vec![2, 4]);
    }

    #[tokio::test]
    async fn leave_rebalances_the_remainder() {
        let registry: Registry<tokio::io::DuplexStream> = Registry::new();
        registry.join("orders", 4, conn(1)).await.unwrap();
        registry.join("orders", 4, conn(2)).await.unwrap();

        registry.leave("orders", 1, 4).await;
        let members = registry.consumers_for("orders").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].instance, 1);
        assert_eq!(members[0].partitions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn leave_of_the_last_consumer_drops_the_queue() {
        let registry: Registry<tokio::io::DuplexStream> = Registry::new();
        registry.join("orders", 4, conn(1)).await.unwrap();
        registry.leave("orders", 1, 4).await;

        assert!(registry.queue_names().await.is_empty());
    }

    #[tokio::test]
    async fn join_beyond_max_partitions_is_rejected() {
        let registry: Registry<tokio::io::DuplexStream> = Registry::new();
        registry.join("orders", 1, conn(1)).await.unwrap();
        let err = registry.join("orders", 1, conn(2)).await.unwrap_err();
        assert_eq!(err.max_partitions, 1);
    }
}
