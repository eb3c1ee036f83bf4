//! Listener loop
//!
//! Binds the console port, retrying forever on failure, and serves one
//! connection at a time. The backlog is 1 and nothing is accepted while a
//! session runs, so a second client waits until the first one leaves.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};

use crate::session::{serve_connection, SessionContext};

/// Pending connections the kernel holds while a session is served
const LISTEN_BACKLOG: u32 = 1;

/// Permanent accept loop for the bridge task
pub struct Listener {
    addr: SocketAddr,
    retry_backoff: Duration,
    ctx: SessionContext,
}

impl Listener {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            addr: ctx.config.listen_addr(),
            retry_backoff: ctx.config.bind_retry(),
            ctx,
        }
    }

    /// Override the bind address (tests bind to an ephemeral loopback port)
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    fn try_bind(&self) -> std::io::Result<TcpListener> {
        let socket = if self.addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(self.addr)?;
        socket.listen(LISTEN_BACKLOG)
    }

    /// Bind and listen, retrying after the fixed backoff until it works
    pub async fn bind(&self) -> TcpListener {
        loop {
            match self.try_bind() {
                Ok(listener) => {
                    tracing::info!("Telnet listening on {}", self.addr);
                    return listener;
                }
                Err(e) => {
                    tracing::info!(
                        "Unable to bind {} ({}), retrying in {:?}",
                        self.addr,
                        e,
                        self.retry_backoff
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }

    /// Accept and serve connections one at a time, forever
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!("Telnet client connected from {}", peer);
                    let end = serve_connection(stream, self.ctx.clone()).await;
                    tracing::info!("Telnet client {} disconnected ({:?})", peer, end);
                }
                Err(e) => {
                    tracing::warn!("Telnet socket accept error: {}", e);
                }
            }
        }
    }

    /// Bind, then serve
    pub async fn run(self) {
        let listener = self.bind().await;
        self.serve(listener).await;
    }
}
