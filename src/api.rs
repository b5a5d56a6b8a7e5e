use std::net::SocketAddr;

use axum::Router;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::handler::{AppState, clip::clip_router, system::system_router};

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .nest("/clip", clip_router(state.clone()))
        .nest("/system", system_router(state))
}

pub(crate) fn start_api_server(
    listen: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let listener = match TcpListener::bind(listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("failed to bind API server to {}: {}", listen, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server listening on {}", listen);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down API server...");
}
