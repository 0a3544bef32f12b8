//! Socket plumbing: listeners and per-connection reader/writer tasks.
//!
//! Connections never touch the entity store. A reader task frames lines
//! and forwards them as engine events; a writer task drains the bounded
//! send queue. Send-queue overflow and framing errors both surface as
//! events so the engine (the only mutator) decides the exit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use ferric_proto::LineCodec;

use crate::engine::Event;
use crate::state::ConnId;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// The engine's handle to one connection.
#[derive(Debug)]
pub struct ConnHandle {
    pub tx: mpsc::Sender<String>,
    pub addr: SocketAddr,
    /// Accepted on a server-flagged listener.
    pub server_listener: bool,
    /// Accepted on a TLS listener (awaiting ssld handoff).
    pub tls: bool,
}

/// Bind every configured listener and start accept loops.
pub async fn start_listeners(
    listeners: &[crate::config::ListenBlock],
    events: mpsc::Sender<Event>,
    sendq_max: usize,
) -> anyhow::Result<()> {
    for block in listeners {
        let bind = format!("{}:{}", block.host, block.port);
        let listener = TcpListener::bind(&bind).await?;
        info!(addr = %bind, ssl = block.ssl, server = block.server, "listening");
        let events = events.clone();
        let block = block.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        spawn_connection(
                            stream,
                            addr,
                            block.server,
                            block.ssl,
                            events.clone(),
                            sendq_max,
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });
    }
    Ok(())
}

/// Dial a configured server link. The engine learns the outcome as an
/// event either way.
pub fn dial_server(
    block: crate::config::ConnectBlock,
    events: mpsc::Sender<Event>,
    sendq_max: usize,
) {
    tokio::spawn(async move {
        let target = format!("{}:{}", block.host, block.port);
        match TcpStream::connect(&target).await {
            Ok(stream) => {
                let addr = stream
                    .peer_addr()
                    .unwrap_or_else(|_| "0.0.0.0:0".parse().expect("static addr"));
                let conn = spawn_connection(stream, addr, true, false, events.clone(), sendq_max);
                let _ = events
                    .send(Event::Dialed {
                        conn,
                        block_name: block.name.clone(),
                    })
                    .await;
            }
            Err(e) => {
                warn!(server = %block.name, error = %e, "connect failed");
                let _ = events
                    .send(Event::DialFailed {
                        block_name: block.name.clone(),
                    })
                    .await;
            }
        }
    });
}

/// Wire one accepted/connected socket into the engine.
pub fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_listener: bool,
    tls: bool,
    events: mpsc::Sender<Event>,
    sendq_max: usize,
) -> ConnId {
    let conn = ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
    let (tx, mut rx) = mpsc::channel::<String>(sendq_max);
    let framed = Framed::new(stream, LineCodec::new());
    let (mut sink, mut lines) = framed.split();

    // writer: drain the send queue; a closed queue closes the socket
    {
        let events = events.clone();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = sink.send(line).await {
                    debug!(conn = %conn, error = %e, "write failed");
                    let _ = events
                        .send(Event::Closed {
                            conn,
                            reason: format!("Write error: {e}"),
                        })
                        .await;
                    return;
                }
            }
            let _ = sink.close().await;
        });
    }

    let handle = ConnHandle {
        tx,
        addr,
        server_listener,
        tls,
    };

    // reader: register with the engine first so no line can outrun the
    // Accepted event, then frame lines until EOF or error
    tokio::spawn(async move {
        if events.send(Event::Accepted { conn, handle }).await.is_err() {
            return;
        }
        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    if events.send(Event::Line { conn, line }).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = events
                        .send(Event::Closed {
                            conn,
                            reason: format!("Read error: {e}"),
                        })
                        .await;
                    return;
                }
                None => {
                    let _ = events
                        .send(Event::Closed {
                            conn,
                            reason: "Connection closed".to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
    });
    conn
}
