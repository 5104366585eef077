//! HTTP booter: serves the workspace tree (kernel images, initramfs,
//! cloud-configs) to clients that have already chainloaded past TFTP.

use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;

use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub async fn serve(bind: SocketAddrV4, workspace: PathBuf) -> std::io::Result<()> {
    let app = Router::new()
        .fallback_service(ServeDir::new(&workspace))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(SocketAddr::V4(bind)).await?;
    info!(addr = %bind, root = %workspace.display(), "HTTP booter listening");
    axum::serve(listener, app).await
}

/// Run the booter on its own thread with a single-threaded runtime; the
/// rest of the process stays plain threads.
pub fn spawn(bind: SocketAddrV4, workspace: PathBuf) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("http".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(%e, "failed to build HTTP runtime");
                    return;
                }
            };
            if let Err(e) = runtime.block_on(serve(bind, workspace)) {
                error!(%e, "HTTP booter exited");
            }
        })
        .expect("Failed to spawn HTTP thread")
}
