//! Listeners and graceful shutdown.

use crate::config::{Settings, TlsPaths};
use crate::manager::WorkerPool;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The TLS certificate or key could not be loaded.
    #[error("cannot load TLS material from '{}' / '{}': {source}", paths.cert_path.display(), paths.key_path.display())]
    Tls {
        /// Configured certificate and key.
        paths: TlsPaths,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A listener failed.
    #[error("listener on {addr} failed: {source}")]
    Listener {
        /// Bound address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Serves `app` until `shutdown` resolves, then drains `pool`.
///
/// The plaintext listener always runs; the TLS listener runs when
/// certificate and key paths are configured. On shutdown the listeners stop
/// accepting, in-flight requests get `shutdown_grace` to finish, and every
/// queued transfer runs to completion before this returns.
pub async fn serve<F>(
    app: Router,
    settings: &Settings,
    pool: Arc<WorkerPool>,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send,
{
    let mut handles = Vec::new();
    let mut listeners = JoinSet::new();

    let http_addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let handle = Handle::new();
    handles.push(handle.clone());
    let server = axum_server::bind(http_addr)
        .handle(handle)
        .serve(app.clone().into_make_service());
    listeners.spawn(async move { (http_addr, server.await) });
    tracing::info!(addr = %http_addr, "HTTP listener starting");

    let mut reload_task = None;
    if let Some(tls) = &settings.tls {
        let https_addr = SocketAddr::from(([0, 0, 0, 0], settings.https_port));
        let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|source| ServeError::Tls {
                paths: tls.clone(),
                source,
            })?;
        if let Some(period) = settings.refresh_interval {
            reload_task = Some(spawn_tls_reload(config.clone(), tls.clone(), period));
        }

        let handle = Handle::new();
        handles.push(handle.clone());
        let server = axum_server::bind_rustls(https_addr, config)
            .handle(handle)
            .serve(app.into_make_service());
        listeners.spawn(async move { (https_addr, server.await) });
        tracing::info!(addr = %https_addr, "HTTPS listener starting");
    } else {
        tracing::warn!("TLS is not configured, serving plaintext HTTP only");
    }

    let mut failure = None;
    tokio::select! {
        () = shutdown => tracing::info!("Shutdown requested"),
        Some(joined) = listeners.join_next() => {
            failure = listener_failure(joined);
        }
    }

    for handle in &handles {
        handle.graceful_shutdown(Some(settings.shutdown_grace));
    }
    while let Some(joined) = listeners.join_next().await {
        if let Some(e) = listener_failure(joined) {
            failure.get_or_insert(e);
        }
    }
    if let Some(task) = reload_task {
        task.abort();
    }
    tracing::info!("Listeners stopped");

    pool.shutdown().await;
    failure.map_or(Ok(()), Err)
}

fn listener_failure(
    joined: Result<(SocketAddr, std::io::Result<()>), tokio::task::JoinError>,
) -> Option<ServeError> {
    match joined {
        Ok((_, Ok(()))) => None,
        Ok((addr, Err(source))) => {
            tracing::error!(addr = %addr, error = %source, "Listener failed");
            Some(ServeError::Listener { addr, source })
        }
        Err(e) => {
            tracing::error!(error = %e, "Listener task failed");
            None
        }
    }
}

/// Re-reads the certificate and key every `period` so rotated files are
/// served without a restart.
fn spawn_tls_reload(
    config: RustlsConfig,
    paths: TlsPaths,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match config
                .reload_from_pem_file(&paths.cert_path, &paths.key_path)
                .await
            {
                Ok(()) => tracing::debug!("TLS certificates reloaded"),
                Err(e) => tracing::error!(error = %e, "Failed to reload TLS certificates"),
            }
        }
    })
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
