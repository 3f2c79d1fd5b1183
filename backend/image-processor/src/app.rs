//! Service bootstrap and lifecycle
//!
//! Wires the stores, the queue clients, the worker pipeline and the HTTP server
//! together, then runs until SIGINT/SIGTERM. Shutdown order: HTTP server,
//! worker pipeline (drains the buffer), then metadata store, queue consumer and
//! publisher.

use crate::config::Config;
use crate::db::{self, ImageRepository, PgImageRepository};
use crate::handlers::{self, AppState};
use crate::kafka::{KafkaTaskConsumer, KafkaTaskProducer, TaskConsumer, TaskPublisher};
use crate::services::submission::SubmissionService;
use crate::services::transform::TransformEngine;
use crate::services::worker::WorkerPipeline;
use crate::storage::{AssetStore, S3AssetStore};
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use resilience::wait_for_shutdown;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Close the metadata store, the queue consumer and the publisher, in that order.
///
/// Close errors are logged and otherwise ignored.
pub async fn close_resources(
    repository: &dyn ImageRepository,
    consumer: &dyn TaskConsumer,
    publisher: &dyn TaskPublisher,
) {
    if let Err(e) = repository.close().await {
        error!(error = %e, "Failed to close metadata store");
    }
    if let Err(e) = consumer.close().await {
        error!(error = %e, "Failed to close queue consumer");
    }
    if let Err(e) = publisher.close().await {
        error!(error = %e, "Failed to close queue publisher");
    }
    info!("Resources closed");
}

/// Resolves on Ctrl+C, or SIGTERM on unix
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Build everything from `config` and run until shutdown
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = db::init_pool(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    db::migrate(&pool)
        .await
        .context("Failed to run database migrations")?;
    let repository: Arc<dyn ImageRepository> = Arc::new(PgImageRepository::new(pool));

    let store: Arc<dyn AssetStore> = Arc::new(
        S3AssetStore::connect(&config.s3)
            .await
            .context("Failed to initialize object storage")?,
    );
    info!(bucket = %config.s3.bucket, "Object storage ready");

    let consumer: Arc<dyn TaskConsumer> = Arc::new(
        KafkaTaskConsumer::new(&config.consumer_config())
            .context("Failed to create Kafka consumer")?,
    );
    let publisher: Arc<dyn TaskPublisher> = Arc::new(
        KafkaTaskProducer::new(&config.kafka.brokers, &config.kafka.topic)
            .context("Failed to create Kafka producer")?,
    );

    let engine = Arc::new(TransformEngine::new(
        Arc::clone(&store),
        config.transform_config(),
    ));
    let pipeline = Arc::new(WorkerPipeline::new(
        Arc::clone(&consumer),
        engine,
        Arc::clone(&repository),
        config.worker_config(),
    ));
    let submission = Arc::new(
        SubmissionService::new(
            Arc::clone(&store),
            Arc::clone(&repository),
            Arc::clone(&publisher),
        )
        .with_max_dimension(config.processing.max_dimension),
    );

    let state = web::Data::new(AppState {
        store: Arc::clone(&store),
        repository: Arc::clone(&repository),
        submission,
        presign_expiry: config.presign_expiry(),
        max_upload_bytes: config.app.max_upload_bytes,
    });

    let bind_address = config.bind_address();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run();
    let server_handle = server.handle();

    info!(address = %bind_address, env = %config.app.env, "HTTP server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = signal_tx.send(true);
    });

    let mut server_task = tokio::spawn(server);
    let pipeline_task = tokio::spawn(Arc::clone(&pipeline).run(shutdown_rx.clone()));

    let mut shutdown = shutdown_rx.clone();
    let signalled = tokio::select! {
        _ = wait_for_shutdown(&mut shutdown) => true,
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("HTTP server stopped"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
            false
        }
    };

    if signalled {
        server_handle.stop(true).await;
        match server_task.await {
            Ok(Ok(())) => info!("HTTP server stopped"),
            Ok(Err(e)) => error!(error = %e, "HTTP server failed during shutdown"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
        }
    } else {
        let _ = shutdown_tx.send(true);
    }

    if let Err(e) = pipeline_task.await {
        error!(error = %e, "Worker pipeline task failed");
    }

    close_resources(repository.as_ref(), consumer.as_ref(), publisher.as_ref()).await;

    info!("image-processor stopped");
    Ok(())
}
