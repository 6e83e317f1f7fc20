use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::commands::CommandExecutor;
use crate::config::ServerConfig;
use crate::server::connection::ConnectionHandler;
use crate::server::dispatcher::Dispatcher;

const LISTEN_BACKLOG: u32 = 1024;

/// Accept loop. Each connection runs on its own task and shares only read-only state.
pub struct Server {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let addr = lookup_host(config.bind_addr())
            .await
            .with_context(|| format!("resolving {}", config.bind_addr()))?
            .next()
            .with_context(|| format!("no address for {}", config.bind_addr()))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("creating listening socket")?;
        socket.set_reuseaddr(true).context("setting SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("binding {addr}"))?;
        let listener = socket.listen(LISTEN_BACKLOG).context("listening")?;

        let executor = CommandExecutor::new(config.command_timeout());
        let dispatcher = Arc::new(Dispatcher::new(executor));
        let handler = Arc::new(ConnectionHandler::new(
            dispatcher,
            config.idle_timeout(),
            config.max_message_bytes,
        ));

        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("reading local address")
    }

    /// Accept connections until the process is terminated.
    pub async fn run(self) -> Result<()> {
        info!("Listening on {} for connections", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    // Back off briefly, e.g. when out of file descriptors
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                handler.handle(stream, peer.to_string()).await;
            });
        }
    }
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    Server::bind(&config).await?.run().await
}
