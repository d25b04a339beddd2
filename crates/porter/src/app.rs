//! Router assembly and serving.

use crate::{
    config::Config,
    error::Error,
    forward::{Forwarder, forward},
};
use axum::Router;
use porter_auth::auth::{AuthLayer, IntrospectionClient, Validator};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the proxy router: every method and path is authorized by
/// `validator` and then relayed through `forwarder`.
pub fn router<V>(validator: V, forwarder: Forwarder) -> Router
where
    V: Validator,
{
    Router::new()
        .fallback(forward)
        .with_state(forwarder)
        .layer(AuthLayer::new(validator))
}

/// Build the outbound clients from `config`, bind the listener and serve
/// until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<(), Error> {
    let introspection =
        IntrospectionClient::builder(config.authority_url.as_str(), config.service_token.clone())
            .path(config.introspection_path.clone())
            .timeout(config.introspection_timeout)
            .build()?;
    let forwarder = Forwarder::new(config.backend_url.clone(), Some(config.backend_timeout))?;

    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!(
        listen = %listener.local_addr()?,
        backend = %forwarder.target(),
        authority = %introspection.endpoint(),
        "porter starting"
    );

    let app = router(introspection, forwarder);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("porter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}
