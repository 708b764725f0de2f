//! Translates parsed command frames into store/registry operations and
//! builds the reply frame, if any. RECEIVE is special: it registers the
//! connection as a consumer once, then hands off to a long-running
//! delivery pump (see [`crate::delivery`]) instead of answering inline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use binq_protocol::{
    AckRequest, CreateQueueRequest, Frame, MessageView, Op, PublishRequest, ReceiveRequest,
};
use binq_store::{Store, StoreError};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::chunk::{chunk_ids, DEFAULT_CHUNK_SIZE};
use crate::connection::Connection;
use crate::delivery;
use crate::partition::TooManyInstances;
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed request body: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error(transparent)]
    TooManyInstances(#[from] TooManyInstances),
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),
    #[error("unknown op byte {0}")]
    UnknownOp(u8),
    #[error("maxPartitions must be at least 1, got {0}")]
    InvalidMaxPartitions(u32),
}

/// Shared state for command handling: the store, the per-queue consumer
/// registry, and which queues each connection is currently receiving
/// from (so OUST can tear membership down on disconnect).
pub struct Handlers<S> {
    store: Store,
    registry: Registry<S>,
    active_receivers: Mutex<HashMap<u64, HashSet<String>>>,
}

impl<S> Handlers<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(store: Store) -> Self {
        Self {
            store,
            registry: Registry::new(),
            active_receivers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Dispatches one client frame, returning the reply frame to write
    /// back, if the command produces one. Takes `self` by `Arc` because
    /// RECEIVE needs to hand a long-lived handle to the spawned delivery
    /// pump.
    pub async fn handle(
        self: Arc<Self>,
        connection: Arc<Connection<S>>,
        frame: Frame,
    ) -> Option<Frame> {
        let result = match Op::try_from(frame.op) {
            Ok(Op::Create) => self.handle_create(&frame.payload).await,
            Ok(Op::Publish) => self.handle_publish(&frame.payload).await,
            Ok(Op::Receive) => {
                self.handle_receive(Arc::clone(&self), connection, &frame.payload)
                    .await
            }
            Ok(Op::Ack) => self.handle_ack(&frame.payload).await,
            Ok(Op::Oust) => {
                self.handle_oust(connection.id).await;
                return None;
            }
            Err(err) => Err(HandlerError::UnknownOp(err.0)),
        };
        Some(match result {
            Ok(frame) => frame,
            Err(err) => error_frame(&err.to_string()),
        })
    }

    async fn handle_create(&self, payload: &[u8]) -> Result<Frame, HandlerError> {
        let req: CreateQueueRequest = serde_json::from_slice(payload)?;
        if req.max_partitions < 1 {
            return Err(HandlerError::InvalidMaxPartitions(req.max_partitions));
        }
        self.store.create_queue(req.name, req.max_partitions).await?;
        Ok(ok_frame())
    }

    async fn handle_publish(&self, payload: &[u8]) -> Result<Frame, HandlerError> {
        let req: PublishRequest = serde_json::from_slice(payload)?;
        let queue = self
            .store
            .get_queue(req.queue_name.clone())
            .await?
            .ok_or_else(|| HandlerError::QueueNotFound(req.queue_name.clone()))?;

        let partition = rand::thread_rng().gen_range(1..=queue.max_partitions);
        self.store
            .create_message(
                req.queue_name,
                partition,
                req.data,
                req.file_name,
                req.file_extension,
            )
            .await?;
        Ok(ok_frame())
    }

    /// Registers `connection` as a consumer of the requested queue (once)
    /// and spawns its delivery pump. The reply only confirms registration
    /// — the matching [`MessageBatch`](binq_protocol::MessageBatch) frames
    /// arrive later, asynchronously, from the pump.
    async fn handle_receive(
        &self,
        handlers: Arc<Handlers<S>>,
        connection: Arc<Connection<S>>,
        payload: &[u8],
    ) -> Result<Frame, HandlerError> {
        let req: ReceiveRequest = serde_json::from_slice(payload)?;
        let queue = self
            .store
            .get_queue(req.queue_name.clone())
            .await?
            .ok_or_else(|| HandlerError::QueueNotFound(req.queue_name.clone()))?;

        let newly_joined = self
            .ensure_membership(&req.queue_name, queue.max_partitions, &connection)
            .await?;

        if newly_joined {
            delivery::spawn(handlers, req.queue_name, req.batch_size, connection);
        }

        Ok(ok_frame())
    }

    async fn handle_ack(&self, payload: &[u8]) -> Result<Frame, HandlerError> {
        let req: AckRequest = serde_json::from_slice(payload)?;
        for chunk in chunk_ids(&req.message_ids, DEFAULT_CHUNK_SIZE) {
            self.store.soft_delete(chunk.to_vec()).await?;
        }
        Ok(ok_frame())
    }

    /// Tears down every queue membership `conn_id` holds as a consumer.
    /// Called when a connection's read side closes; the pumps it owns
    /// notice on their next poll and exit once their write fails.
    pub async fn handle_oust(&self, conn_id: u64) {
        let queues = {
            let mut active = self.active_receivers.lock().await;
            active.remove(&conn_id).unwrap_or_default()
        };
        for queue_name in queues {
            if let Ok(Some(queue)) = self.store.get_queue(queue_name.clone()).await {
                self.registry
                    .leave(&queue_name, conn_id, queue.max_partitions)
                    .await;
            }
        }
    }

    /// Returns `true` the first time `connection` joins `queue_name`, so
    /// the caller spawns exactly one pump per (connection, queue) pair.
    async fn ensure_membership(
        &self,
        queue_name: &str,
        max_partitions: u32,
        connection: &Arc<Connection<S>>,
    ) -> Result<bool, HandlerError> {
        let already_joined = {
            let active = self.active_receivers.lock().await;
            active
                .get(&connection.id)
                .is_some_and(|queues| queues.contains(queue_name))
        };
        if already_joined {
            return Ok(false);
        }

        self.registry
            .join(queue_name, max_partitions, Arc::clone(connection))
            .await?;
        let mut active = self.active_receivers.lock().await;
        active
            .entry(connection.id)
            .or_default()
            .insert(queue_name.to_owned());
        Ok(true)
    }
}

pub(crate) fn to_message_view(message: binq_store::Message) -> MessageView {
    MessageView {
        id: message.id,
        queue_name: message.queue_name,
        partition: message.partition,
        data: message.data,
        file_name: message.file_name,
        file_extension: message.file_extension,
        created_at: message.created_at,
    }
}

fn ok_frame() -> Frame {
    Frame::server_frame(&b"{\"ok\":true}"[..])
}

fn error_frame(message: &str) -> Frame {
    let body = serde_json::json!({ "ok": false, "error": message });
    Frame::server_frame(serde_json::to_vec(&body).unwrap_or_default())
}
