//! A plaintext-TCP broker harness for integration tests. Wires the real
//! store/registry/dispatcher/delivery pipeline from `binq-core` without
//! a certificate, so tests exercise the actual protocol instead of
//! calling handlers directly.
//!
//! Same bind-port-0-and-spawn-a-background-accept-loop shape used for
//! the crate's own mock websocket test server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use binq_core::{Connection, Dispatcher, Handlers};
use binq_protocol::{Frame, FrameCodec};
use binq_store::Store;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub struct TestBroker {
    pub addr: SocketAddr,
    _accept_task: JoinHandle<()>,
}

impl TestBroker {
    /// Starts a broker backed by an in-memory store, listening on a random
    /// local port.
    pub async fn start() -> Self {
        let store = Store::open_in_memory().expect("open in-memory store");
        let handlers = Arc::new(Handlers::new(store));
        let dispatcher = Dispatcher::spawn(Arc::clone(&handlers), 100);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener local addr");
        let next_id = Arc::new(AtomicU64::new(1));

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let local = stream
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                let connection = Arc::new(Connection::new(id, &local, &peer.to_string(), stream));
                tokio::spawn(binq_core::run_connection(connection, dispatcher.clone()));
            }
        });

        Self {
            addr,
            _accept_task: accept_task,
        }
    }

    pub async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("connect to test broker");
        TestClient {
            framed: Framed::new(stream, FrameCodec),
        }
    }
}

/// A framed client for driving a [`TestBroker`] in tests.
pub struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TestClient {
    pub async fn send(&mut self, op: u8, payload: impl Into<Bytes>) {
        self.framed
            .send(Frame::new(op, payload))
            .await
            .expect("send frame to test broker");
    }

    pub async fn send_json(&mut self, op: u8, body: &impl serde::Serialize) {
        let payload = serde_json::to_vec(body).expect("serialize request body");
        self.send(op, payload).await;
    }

    pub async fn recv(&mut self) -> Frame {
        self.framed
            .next()
            .await
            .expect("test broker closed the connection")
            .expect("decode frame from test broker")
    }

    pub async fn recv_json<T: serde::de::DeserializeOwned>(&mut self) -> T {
        let frame = self.recv().await;
        serde_json::from_slice(&frame.payload).expect("decode json reply")
    }
}
