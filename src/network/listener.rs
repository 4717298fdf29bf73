//! TCP accept loop serving the playback proxy

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::proxy::{route, PlaybackServer};
use crate::Result;

/// Accept loop that serves one task per inbound connection
pub struct ProxyListener {
    server: Arc<PlaybackServer>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyListener {
    /// Create a listener for `server`
    #[must_use]
    pub fn new(server: Arc<PlaybackServer>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            server,
            shutdown_tx,
        }
    }

    /// Handle that stops the accept loop when sent to
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind `address` and serve until shutdown or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn run(self, address: &str) -> Result<()> {
        let listener = TcpListener::bind(address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Listening via HTTP on {}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Listener {} shutting down", addr);
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let server = Arc::clone(&self.server);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| route(Arc::clone(&server), req));

            // Headers may already be on the wire when this fails, so the
            // status code can no longer carry the error.
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Failed to write response to {}, connection aborted: {}", peer_addr, e);
            }
        });
    }
}
