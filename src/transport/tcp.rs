//! Tokio TCP driver.
//!
//! One task per accepted socket owns its [`Connection`]: reads feed the
//! reassembler, a fixed interval drives coalesced flushes (sessions can ask
//! for an earlier one), and the read half reaching EOF ends the connection. Writes go through
//! `OwnedWriteHalf::try_write`, so a slow reader shows up as queued frames,
//! never as a stalled task.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::connection::{CloseReason, Connection, ConnectionContext};
use crate::transport::Transport;

/// Bytes requested per socket read.
pub const READ_BUFFER_SIZE: usize = 1024;

/// How long shutdown waits for open connections to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

impl Transport for OwnedWriteHalf {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OwnedWriteHalf::try_write(&*self, buf)
    }
}

/// Bind the configured address and serve until Ctrl-C.
#[instrument(skip(ctx), fields(address = %ctx.config.server.address))]
pub async fn start_server(ctx: ConnectionContext) -> Result<()> {
    let listener = TcpListener::bind(&ctx.config.server.address).await?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(listener, ctx, shutdown_rx).await
}

/// Accept connections on `listener` until `shutdown_rx` fires.
///
/// On shutdown every open connection is closed and the call returns once
/// they are gone or the grace period ran out.
#[instrument(skip(listener, ctx, shutdown_rx))]
pub async fn start_server_with_shutdown(
    listener: TcpListener,
    ctx: ConnectionContext,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(address = %local, "World server listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let active = Arc::new(AtomicUsize::new(0));
    let mut next_id: u64 = 0;
    let max_connections = ctx.config.server.max_connections;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Closing connections...");
                let _ = stop_tx.send(true);
                wait_for_drain(&active).await;
                ctx.metrics.log_metrics();
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                if active.load(Ordering::Acquire) >= max_connections {
                    warn!(peer = %addr, max_connections, "Connection limit reached, refusing peer");
                    drop(stream);
                    continue;
                }

                next_id += 1;
                let id = next_id;
                let ctx = ctx.clone();
                let stop_rx = stop_rx.clone();
                let active = Arc::clone(&active);
                active.fetch_add(1, Ordering::AcqRel);

                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, addr, id, ctx, stop_rx).await {
                        debug!(conn = id, error = %e, "Connection ended with error");
                    }
                    active.fetch_sub(1, Ordering::AcqRel);
                });
            }
        }
    }
}

async fn wait_for_drain(active: &AtomicUsize) {
    let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(remaining = active.load(Ordering::Acquire), "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                let remaining = active.load(Ordering::Acquire);
                if remaining == 0 {
                    info!("All connections closed, shutting down");
                    return;
                }
                debug!(remaining, "Waiting for connections to close");
            }
        }
    }
}

/// Drive one accepted socket until it closes.
///
/// Flipping `stop` to `true` (or dropping its sender) closes the connection
/// with [`CloseReason::Shutdown`].
#[instrument(skip(stream, ctx, stop), fields(conn = id, peer = %addr))]
pub async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: u64,
    ctx: ConnectionContext,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    stream.set_nodelay(ctx.config.server.tcp_nodelay)?;
    let flush_interval = ctx.config.connection.flush_interval;

    let (mut reader, writer) = stream.into_split();
    let mut conn = Connection::new(id, addr.to_string(), writer, ctx);
    conn.open()?;
    let handle = conn.handle();

    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while conn.timer_active() {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => return conn.on_peer_closed(),
                Ok(n) => conn.feed(&buf[..n], Instant::now())?,
                Err(e) => return Err(conn.fail(ProtocolError::Io(e))),
            },

            _ = ticker.tick() => {
                conn.on_timer_tick()?;
            }

            _ = handle.flush_wanted() => {
                conn.on_flush_request()?;
            }

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    conn.close(CloseReason::Shutdown);
                }
            }
        }
    }

    Ok(())
}
