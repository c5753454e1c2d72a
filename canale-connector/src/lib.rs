//! Supervisor for the canale CDC bridge.
//!
//! [`Connector`] owns the source and sink adapters, provisions collections
//! and streams for every configured binding, launches one replication task
//! per binding plus the operational HTTP surface, and multiplexes shutdown:
//! `SIGINT`/`SIGTERM` or the first task failure stops the whole group.

pub mod config;
pub mod server;

use canale_core::metrics;
use canale_core::monitor::NamedMonitor;
use canale_mongo::{ChangeEventHandler, EnsureCollectionOptions, HandlerError, WatchOptions};
use config::{Config, ConfigError};
use metrics_exporter_prometheus::PrometheusHandle;
use server::{Server, ServerError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Errors that stop the connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] canale_mongo::SourceError),

    #[error(transparent)]
    Sink(#[from] canale_nats::SinkError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("task panicked: {0}")]
    TaskPanic(String),
}

/// The supervisor: owns the adapters, runs the task group.
pub struct Connector {
    cfg: Config,
    mongo: Arc<canale_mongo::Client>,
    nats: Arc<canale_nats::Client>,
    metrics_handle: PrometheusHandle,
}

impl Connector {
    /// Validates the configuration and connects both adapters.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or either backend
    /// is unreachable; startup aborts.
    pub async fn new(
        mut cfg: Config,
        metrics_handle: PrometheusHandle,
    ) -> Result<Self, ConnectorError> {
        cfg.validate_and_set_defaults()?;

        let mongo = Arc::new(canale_mongo::Client::connect(&cfg.connector.mongo.uri).await?);
        let nats = Arc::new(canale_nats::Client::connect(&cfg.connector.nats.url).await?);

        Ok(Self {
            cfg,
            mongo,
            nats,
            metrics_handle,
        })
    }

    /// Provisions every binding, then runs replication tasks and the HTTP
    /// surface until shutdown or the first failure.
    pub async fn run(self) -> Result<(), ConnectorError> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        spawn_signal_listener(shutdown_tx.clone());

        // Startup provisioning, in order; any failure aborts the process.
        for coll in &self.cfg.connector.collections {
            self.mongo
                .ensure_collection(&EnsureCollectionOptions {
                    db_name: coll.db_name.clone(),
                    coll_name: coll.coll_name.clone(),
                    change_stream_pre_and_post_images: coll
                        .change_stream_pre_and_post_images
                        .unwrap_or(false),
                    ..EnsureCollectionOptions::default()
                })
                .await?;

            self.mongo
                .ensure_collection(&EnsureCollectionOptions {
                    db_name: coll.tokens_db_name.clone(),
                    coll_name: coll.tokens_coll_name.clone(),
                    capped: coll.tokens_coll_capped.unwrap_or(config::DEFAULT_TOKENS_COLL_CAPPED),
                    size_in_bytes: coll
                        .tokens_coll_size_in_bytes
                        .unwrap_or(config::DEFAULT_TOKENS_COLL_SIZE_IN_BYTES),
                    change_stream_pre_and_post_images: false,
                })
                .await?;

            self.nats.ensure_stream(&coll.stream_name).await?;
        }

        let mut tasks: JoinSet<Result<(), ConnectorError>> = JoinSet::new();

        for coll in &self.cfg.connector.collections {
            let mongo = Arc::clone(&self.mongo);
            let nats = Arc::clone(&self.nats);
            let shutdown_rx = shutdown_tx.subscribe();
            let opts = WatchOptions {
                db_name: coll.db_name.clone(),
                coll_name: coll.coll_name.clone(),
                tokens_db_name: coll.tokens_db_name.clone(),
                tokens_coll_name: coll.tokens_coll_name.clone(),
                tokens_coll_capped: coll
                    .tokens_coll_capped
                    .unwrap_or(config::DEFAULT_TOKENS_COLL_CAPPED),
                stream_name: coll.stream_name.clone(),
            };

            tasks.spawn(async move {
                let handler: ChangeEventHandler = Box::new(move |message| {
                    let nats = Arc::clone(&nats);
                    Box::pin(async move {
                        nats.publish(message)
                            .await
                            .map_err(|e| Box::new(e) as HandlerError)
                    })
                        as Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
                });

                mongo.watch_collection(&opts, handler, shutdown_rx).await?;
                Ok(())
            });
        }
        metrics::set_active_watchers(self.cfg.connector.collections.len());

        let monitors: Vec<Arc<dyn NamedMonitor>> = vec![
            Arc::clone(&self.mongo) as Arc<dyn NamedMonitor>,
            Arc::clone(&self.nats) as Arc<dyn NamedMonitor>,
        ];
        let http = Server::new(
            self.cfg.connector.server.addr.clone(),
            monitors,
            self.metrics_handle.clone(),
        );
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move { http.run(shutdown_rx).await.map_err(ConnectorError::from) });

        // Wait for the group; the first failure cancels everyone else.
        let mut first_error: Option<ConnectorError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(ConnectorError::TaskPanic(e.to_string())));
            if let Err(error) = result {
                error!(%error, "task failed, shutting down");
                if first_error.is_none() {
                    first_error = Some(error);
                }
                let _ = shutdown_tx.send(());
            }
        }
        metrics::set_active_watchers(0);

        // Sink first, then source.
        self.nats.close().await;
        self.mongo.close().await;

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Translates `SIGINT`/`SIGTERM` into the group's shutdown signal.
fn spawn_signal_listener(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(error) => {
                        error!(%error, "could not install SIGTERM handler");
                        return;
                    }
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received SIGINT");
        }

        let _ = shutdown_tx.send(());
    });
}
