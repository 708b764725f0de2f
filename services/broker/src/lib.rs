//! The TLS acceptor: handshakes a connection, runs the optional passkey
//! challenge, then registers it with `binq-core`'s dispatcher.

pub mod config;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use binq_cert::{ensure_cert_pair, SniCertResolver};
use binq_core::{Connection, Dispatcher, Handlers};
use binq_store::Store;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use config::BrokerConfig;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("certificate bootstrap failed: {0}")]
    Cert(#[from] binq_cert::CertError),
    #[error("store open failed: {0}")]
    Store(#[from] binq_store::StoreError),
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
    #[error("tls config failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// Assembles the store, the TLS config, and the dispatcher, then runs the
/// accept loop until `shutdown` resolves.
pub async fn run(
    cfg: BrokerConfig,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), BrokerError> {
    let store = Store::open(&cfg.store_path)?;
    spawn_tombstone_cleanup(store.clone());
    let handlers = Arc::new(Handlers::new(store));
    let dispatcher = Dispatcher::spawn(Arc::clone(&handlers), 100);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let local = ensure_cert_pair(&cfg.cert_path, "localhost")?;
    let remote = ensure_cert_pair(&cfg.cert_path, "remotehost")?;
    let pairs = vec![("localhost".to_owned(), local), ("remotehost".to_owned(), remote)];
    let resolver = Arc::new(SniCertResolver::load(&pairs, "localhost")?);
    let server_config = binq_cert::server_config(resolver)?;
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind(("0.0.0.0", cfg.port))
        .await
        .map_err(BrokerError::Bind)?;
    info!(port = cfg.port, "binq broker listening");

    let next_id = Arc::new(AtomicU64::new(1));
    let seen_hashes: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let passkey = cfg.passkey;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let dispatcher = dispatcher.clone();
                let next_id = Arc::clone(&next_id);
                let seen_hashes = Arc::clone(&seen_hashes);
                tokio::spawn(async move {
                    if let Err(err) = accept_one(
                        stream, peer.to_string(), acceptor, dispatcher, next_id, seen_hashes, passkey,
                    )
                    .await
                    {
                        warn!(error = %err, "connection setup failed");
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutdown signal received, closing listener");
                break;
            }
        }
    }

    Ok(())
}

const PASSKEY_LEN: usize = 16;
const PASSKEY_READ_DEADLINE: Duration = Duration::from_secs(5);

async fn accept_one(
    stream: tokio::net::TcpStream,
    peer_addr: String,
    acceptor: TlsAcceptor,
    dispatcher: Dispatcher<tokio_rustls::server::TlsStream<tokio::net::TcpStream>>,
    next_id: Arc<AtomicU64>,
    seen_hashes: Arc<Mutex<HashSet<String>>>,
    passkey: Option<[u8; PASSKEY_LEN]>,
) -> std::io::Result<()> {
    let local_addr = stream.local_addr().map(|a| a.to_string()).unwrap_or_default();
    let mut tls_stream = acceptor.accept(stream).await?;

    let conn_hash = binq_core::connection_hash(&local_addr, &peer_addr);
    let is_duplicate = {
        let mut seen = seen_hashes.lock().expect("seen_hashes mutex poisoned");
        !seen.insert(conn_hash.clone())
    };

    if let Some(expected) = passkey {
        if !is_duplicate {
            let mut buf = [0u8; PASSKEY_LEN];
            let read = tokio::time::timeout(PASSKEY_READ_DEADLINE, tls_stream.read_exact(&mut buf)).await;
            let ok = matches!(read, Ok(Ok(_))) && buf == expected;
            if ok {
                tls_stream.write_all(b"passkey authenticated").await?;
            } else {
                tls_stream.write_all(b"ERROR: Invalid passkey").await?;
                let _ = tls_stream.shutdown().await;
                return Ok(());
            }
        }
    }

    let id = next_id.fetch_add(1, Ordering::SeqCst);
    let connection = Arc::new(Connection::new(id, &local_addr, &peer_addr, tls_stream));
    binq_core::run_connection(connection, dispatcher).await;
    Ok(())
}

/// Starts the daily tombstone sweep, running `hard_delete_tombstones` once
/// a day at local midnight for rows soft-deleted more than a day ago.
pub fn spawn_tombstone_cleanup(store: Store) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(duration_until_next_local_midnight()).await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(1);
            match store.hard_delete_tombstones(cutoff).await {
                Ok(removed) => info!(removed, "tombstone cleanup completed"),
                Err(err) => warn!(error = %err, "tombstone cleanup failed"),
            }
        }
    });
}

fn duration_until_next_local_midnight() -> Duration {
    let now = chrono::Local::now();
    let next_midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_local_timezone(chrono::Local)
        .single()
        .unwrap_or(now);
    (next_midnight - now).to_std().unwrap_or(Duration::from_secs(24 * 60 * 60))
}

