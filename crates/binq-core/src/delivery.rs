//! The delivery pump: one task per consumer, spawned the first time it
//! RECEIVEs from a queue. Runs until its write to the consumer's socket
//! fails or the registry no longer lists it as a member — the reader
//! side closing is what produces that eviction.
//!
//! Partitions are re-read from the registry on every iteration rather
//! than captured once, so a rebalance triggered by another consumer
//! joining or leaving takes effect on this pump's very next poll.

use std::sync::Arc;
use std::time::Duration;

use binq_protocol::{Frame, MessageBatch};
use chrono::{Duration as ChronoDuration, Utc};

use crate::chunk::{chunk_ids, DEFAULT_CHUNK_SIZE};
use crate::connection::Connection;
use crate::handlers::{to_message_view, Handlers};

/// How long a delivered-but-unacked message stays invisible to other
/// consumers of the same partition.
const LOCK_DURATION_SECS: i64 = 600;

/// Idle backoff so a consumer with nothing to deliver doesn't spin.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

pub fn spawn<S>(
    handlers: Arc<Handlers<S>>,
    queue_name: String,
    batch_size: u32,
    connection: Arc<Connection<S>>,
) where
    S: Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            let partitions = {
                let members = handlers.registry().consumers_for(&queue_name).await;
                let mine = members
                    .iter()
                    .find(|member| member.connection.id == connection.id)
                    .map(|member| member.partitions.clone());
                match mine {
                    Some(partitions) => partitions,
                    None => break,
                }
            };

            let messages = match handlers
                .store()
                .find_visible(queue_name.clone(), partitions, batch_size)
                .await
            {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::warn!(queue = %queue_name, error = %err, "delivery pump: store error");
                    tokio::time::sleep(IDLE_BACKOFF).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(IDLE_BACKOFF).await;
                continue;
            }

            let ids: Vec<u64> = messages.iter().map(|message| message.id).collect();
            let until = Utc::now() + ChronoDuration::seconds(LOCK_DURATION_SECS);
            for chunk in chunk_ids(&ids, DEFAULT_CHUNK_SIZE) {
                if let Err(err) = handlers.store().lock_messages(chunk.to_vec(), until).await {
                    tracing::warn!(
                        queue = %queue_name,
                        error = %err,
                        "delivery pump: failed to lock a batch of messages"
                    );
                }
            }

            let batch = MessageBatch {
                messages: messages.into_iter().map(to_message_view).collect(),
            };
            let payload = match serde_json::to_vec(&batch) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(queue = %queue_name, error = %err, "delivery pump: failed to encode batch");
                    continue;
                }
            };

            if connection.write(Frame::server_frame(payload)).await.is_err() {
                tracing::debug!(
                    queue = %queue_name,
                    conn_id = connection.id,
                    "delivery pump: write failed, exiting"
                );
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use binq_store::Store;
    use std::time::Duration as StdDuration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn delivers_then_idles_without_redelivering_a_locked_message() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_queue("orders".to_owned(), 4)
            .await
            .unwrap();
        store
            .create_message("orders".to_owned(), 1, b"x".to_vec(), None, None)
            .await
            .unwrap();

        let handlers = Arc::new(Handlers::new(store));
        let (client, server) = duplex(65536);
        let connection = Arc::new(Connection::new(1, "a", "b", server));
        let client_connection = Connection::new(2, "b", "a", client);

        handlers
            .registry()
            .join("orders", 4, Arc::clone(&connection))
            .await
            .unwrap();

        spawn(Arc::clone(&handlers), "orders".to_owned(), 10, connection);

        let frame = tokio::time::timeout(StdDuration::from_secs(1), client_connection.next())
            .await
            .unwrap()
            .unwrap();
        let batch: MessageBatch = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(batch.messages.len(), 1);

        // Second poll should find the message locked and deliver nothing
        // within a couple of idle-backoff windows.
        let second = tokio::time::timeout(StdDuration::from_millis(200), client_connection.next()).await;
        assert!(second.is_err(), "locked message must not be redelivered");
    }
}
