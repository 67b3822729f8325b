use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, warn};

use crate::error::{PageletError, Result};

/// Handle to the running static file server. Closing it shuts the server
/// down gracefully.
pub struct ServerHandle {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The serving origin, always loopback.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Serve `dir_path` at `http://127.0.0.1:<port>/`. Port 0 binds an
/// ephemeral port; the actual port is reported on the handle.
pub async fn serve_directory(dir_path: &Path, port: u16) -> Result<ServerHandle> {
    let app = Router::new().fallback_service(ServeDir::new(dir_path));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PageletError::Server(format!("Failed to bind {}: {}", addr, e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| PageletError::Server(e.to_string()))?
        .port();

    debug!(port = port, dir = %dir_path.display(), "Serving bundle cache");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(e) = serve.await {
            warn!(error = %e, "Static server terminated abnormally");
        }
    });

    Ok(ServerHandle {
        port,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}
