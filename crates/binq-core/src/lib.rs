//! Connection handling, partition assignment, consumer bookkeeping, and
//! command dispatch shared by every broker transport.

mod chunk;
mod connection;
mod delivery;
mod dispatcher;
mod handlers;
mod partition;
mod registry;

pub use connection::{hash_connection as connection_hash, Connection, ConnectionError};
pub use dispatcher::Dispatcher;
pub use handlers::{HandlerError, Handlers};
pub use partition::{new_consumer_partitions, partitions_for, TooManyInstances};
pub use registry::{Consumer, Registry};

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Reads frames off `connection` until it closes, handing each to
/// `dispatcher`. Intended to be spawned as its own task per accepted
/// socket; on EOF it tells the dispatcher to release any consumer
/// memberships the connection held.
pub async fn run_connection<S>(connection: Arc<Connection<S>>, dispatcher: Dispatcher<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    loop {
        match connection.next().await {
            Ok(frame) => {
                if !dispatcher.submit_frame(Arc::clone(&connection), frame).await {
                    tracing::warn!(conn_id = connection.id, "dispatcher is no longer accepting frames");
                    break;
                }
            }
            Err(ConnectionError::Eof) => {
                dispatcher.submit_oust(connection.id).await;
                break;
            }
            Err(err) => {
                tracing::warn!(conn_id = connection.id, error = %err, "connection error, closing");
                dispatcher.submit_oust(connection.id).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binq_protocol::{CreateQueueRequest, Frame, Op};
    use binq_store::Store;
    use bytes::Bytes;
    use tokio::io::duplex;

    #[tokio::test]
    async fn run_connection_forwards_frames_until_close() {
        let store = Store::open_in_memory().unwrap();
        let handlers = Arc::new(Handlers::new(store));
        let dispatcher = Dispatcher::spawn(handlers, 16);

        let (client, server) = duplex(4096);
        let connection = Arc::new(Connection::new(1, "a", "b", server));
        let driver = tokio::spawn(run_connection(Arc::clone(&connection), dispatcher));

        let client_connection = Connection::new(2, "b", "a", client);
        let body = serde_json::to_vec(&CreateQueueRequest {
            name: "q".to_owned(),
            max_partitions: 4,
        })
        .unwrap();
        client_connection
            .write(Frame::new(Op::Create.as_u8(), Bytes::from(body)))
            .await
            .unwrap();
        let reply = client_connection.next().await.unwrap();
        assert_eq!(&reply.payload[..], b"{\"ok\":true}");

        client_connection.close().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), driver)
            .await
            .expect("run_connection should exit once the peer closes")
            .unwrap();
    }
}
