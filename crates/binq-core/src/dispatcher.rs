//! Serializes all command handling onto a single worker task fed by a
//! bounded channel, so registry rebalances and store writes from many
//! connections never race each other.

use std::sync::Arc;

use binq_protocol::Frame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::handlers::Handlers;

enum Inbound<S> {
    Frame {
        connection: Arc<Connection<S>>,
        frame: Frame,
    },
    Oust {
        conn_id: u64,
    },
}

/// Handle to the dispatcher's inbound channel. Cloning shares the same
/// worker; the worker exits once every clone (and the original) is
/// dropped.
#[derive(Clone)]
pub struct Dispatcher<S> {
    sender: mpsc::Sender<Inbound<S>>,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    /// Spawns the worker task and returns a handle to it. `capacity` bounds
    /// how many unprocessed frames may queue before `submit_frame` backs
    /// off the caller.
    pub fn spawn(handlers: Arc<Handlers<S>>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Inbound<S>>(capacity);
        tokio::spawn(async move {
            while let Some(inbound) = receiver.recv().await {
                match inbound {
                    Inbound::Frame { connection, frame } => {
                        let conn_id = connection.id;
                        let connection_for_reply = Arc::clone(&connection);
                        if let Some(reply) = Arc::clone(&handlers).handle(connection, frame).await {
                            if let Err(err) = connection_for_reply.write(reply).await {
                                tracing::warn!(
                                    conn_id,
                                    error = %err,
                                    "failed to write reply frame"
                                );
                            }
                        }
                    }
                    Inbound::Oust { conn_id } => {
                        handlers.handle_oust(conn_id).await;
                    }
                }
            }
        });
        Self { sender }
    }

    /// Enqueues a client frame for processing. Returns `false` if the
    /// worker has already shut down.
    pub async fn submit_frame(&self, connection: Arc<Connection<S>>, frame: Frame) -> bool {
        self.sender
            .send(Inbound::Frame { connection, frame })
            .await
            .is_ok()
    }

    /// Enqueues cleanup for a connection whose read side just closed.
    pub async fn submit_oust(&self, conn_id: u64) -> bool {
        self.sender.send(Inbound::Oust { conn_id }).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binq_protocol::{CreateQueueRequest, Op};
    use binq_store::Store;
    use bytes::Bytes;
    use tokio::io::duplex;

    #[tokio::test]
    async fn submitted_frame_gets_a_reply_written_back() {
        let store = Store::open_in_memory().unwrap();
        let handlers = Arc::new(Handlers::new(store));
        let dispatcher = Dispatcher::spawn(handlers, 16);

        let (client, server) = duplex(4096);
        let connection = Arc::new(Connection::new(1, "a", "b", server));
        let client_connection = Arc::new(Connection::new(2, "b", "a", client));

        let body = serde_json::to_vec(&CreateQueueRequest {
            name: "q".to_owned(),
            max_partitions: 4,
        })
        .unwrap();
        let submitted = dispatcher
            .submit_frame(connection, Frame::new(Op::Create.as_u8(), Bytes::from(body)))
            .await;
        assert!(submitted);

        let reply = client_connection.next().await.unwrap();
        assert_eq!(&reply.payload[..], b"{\"ok\":true}");
    }
}
