//! A small interactive client for exercising a running broker by hand:
//! create a queue, publish a message, or drain a queue as a consumer.

mod tls;

use std::net::ToSocketAddrs;
use std::path::PathBuf;

use binq_protocol::{
    AckRequest, CreateQueueRequest, Frame, FrameCodec, MessageBatch, Op, PublishRequest,
    ReceiveRequest,
};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "binq-client", about = "Manual test client for a binq broker")]
struct Args {
    /// Broker host:port, e.g. 127.0.0.1:3000
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// SNI hostname to present during the TLS handshake.
    #[arg(long, default_value = "localhost")]
    sni: String,

    /// Shared passkey as a UUID string, if the broker requires one.
    #[arg(long)]
    passkey: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a queue.
    Create {
        name: String,
        #[arg(long, default_value_t = 4)]
        max_partitions: u32,
    },
    /// Publish one message, reading its body from a file (or stdin with `-`).
    Publish {
        queue_name: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Join a queue as a consumer and print batches as they arrive.
    Receive {
        queue_name: String,
        #[arg(long, default_value_t = 10)]
        batch_size: u32,
        /// Automatically ack every delivered message id.
        #[arg(long)]
        auto_ack: bool,
    },
    /// Ack a set of message ids.
    Ack {
        queue_name: String,
        ids: Vec<u64>,
    },
}

type ClientStream = tokio_rustls::client::TlsStream<TcpStream>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut framed = connect(&args.addr, &args.sni, args.passkey.as_deref()).await?;

    match args.command {
        Command::Create { name, max_partitions } => {
            let body = serde_json::to_vec(&CreateQueueRequest {
                name,
                max_partitions,
            })?;
            framed.send(Frame::new(Op::Create.as_u8(), body)).await?;
            print_reply(&mut framed).await?;
        }
        Command::Publish { queue_name, file } => {
            let data = if file.as_os_str() == "-" {
                let mut buf = Vec::new();
                tokio::io::stdin().read_to_end(&mut buf).await?;
                buf
            } else {
                tokio::fs::read(&file).await?
            };
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            let body = serde_json::to_vec(&PublishRequest {
                queue_name,
                data,
                file_name,
                file_extension: None,
            })?;
            framed.send(Frame::new(Op::Publish.as_u8(), body)).await?;
            print_reply(&mut framed).await?;
        }
        Command::Receive {
            queue_name,
            batch_size,
            auto_ack,
        } => {
            let body = serde_json::to_vec(&ReceiveRequest {
                queue_name: queue_name.clone(),
                batch_size,
            })?;
            framed.send(Frame::new(Op::Receive.as_u8(), body)).await?;
            print_reply(&mut framed).await?;

            info!(queue = %queue_name, "registered; waiting for batches, Ctrl+C to stop");
            loop {
                let frame = match framed.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => {
                        eprintln!("connection error: {err}");
                        break;
                    }
                    None => break,
                };
                let batch: MessageBatch = serde_json::from_slice(&frame.payload)?;
                for message in &batch.messages {
                    println!(
                        "id={} partition={} bytes={}",
                        message.id,
                        message.partition,
                        message.data.len()
                    );
                }
                if auto_ack && !batch.messages.is_empty() {
                    let ids = batch.messages.iter().map(|m| m.id).collect();
                    let body = serde_json::to_vec(&AckRequest { message_ids: ids })?;
                    framed.send(Frame::new(Op::Ack.as_u8(), body)).await?;
                    print_reply(&mut framed).await?;
                }
            }
        }
        Command::Ack { queue_name: _, ids } => {
            let body = serde_json::to_vec(&AckRequest { message_ids: ids })?;
            framed.send(Frame::new(Op::Ack.as_u8(), body)).await?;
            print_reply(&mut framed).await?;
        }
    }

    Ok(())
}

async fn print_reply(framed: &mut Framed<ClientStream, FrameCodec>) -> anyhow::Result<()> {
    match framed.next().await {
        Some(Ok(frame)) => println!("{}", String::from_utf8_lossy(&frame.payload)),
        Some(Err(err)) => eprintln!("connection error: {err}"),
        None => eprintln!("connection closed before a reply arrived"),
    }
    Ok(())
}

async fn connect(
    addr: &str,
    sni: &str,
    passkey: Option<&str>,
) -> anyhow::Result<Framed<ClientStream, FrameCodec>> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let socket_addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve {addr}"))?;
    let tcp = TcpStream::connect(socket_addr).await?;

    let config = tls::insecure_client_config();
    let connector = TlsConnector::from(std::sync::Arc::new(config));
    let server_name = ServerName::try_from(sni.to_owned())?;
    let mut stream = connector.connect(server_name, tcp).await?;

    if let Some(passkey) = passkey {
        let uuid = uuid::Uuid::parse_str(passkey)?;
        stream.write_all(uuid.as_bytes()).await?;
        let mut response = [0u8; 64];
        let n = stream.read(&mut response).await?;
        info!(response = %String::from_utf8_lossy(&response[..n]), "passkey challenge response");
    }

    Ok(Framed::new(stream, FrameCodec))
}
