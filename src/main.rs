use axum::extract::DefaultBodyLimit;
use question_bank_backend::{
    build_generation_service,
    config::{get_config, init_config, QueueBackend, StorageBackend},
    database::pool::{create_pool, run_migrations},
    middleware::auth::ApiKey,
    router,
    services::{
        ai_service::OpenAiAssistantsClient,
        queue_service::{JobQueue, LocalJobQueue, PgJobQueue},
    },
    AppState, ServiceSettings, Stores,
};
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config()?;
    init_tracing(config.json_logs);

    let pool = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            Some(pool)
        }
        None => None,
    };

    let stores = match (config.storage_backend, &pool) {
        (StorageBackend::Postgres, Some(pool)) => Stores::postgres(pool.clone()),
        (StorageBackend::Postgres, None) => {
            anyhow::bail!("STORAGE_BACKEND=postgres requires DATABASE_URL")
        }
        (StorageBackend::Memory, _) => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            Stores::in_memory()
        }
    };

    let http_client = Client::builder().timeout(Duration::from_secs(60)).build()?;
    let mut openai = OpenAiAssistantsClient::new(
        config.openai_api_key.clone(),
        http_client,
        config.assistants.clone(),
    );
    if let Some(base_url) = &config.openai_base_url {
        openai = openai.with_base_url(base_url.clone());
    }
    let generation =
        build_generation_service(&stores, Arc::new(openai), ServiceSettings::from(config));

    let cancel = CancellationToken::new();
    let mut workers = Vec::new();

    let queue: Arc<dyn JobQueue> = match (config.queue_backend, &pool) {
        (QueueBackend::Postgres, Some(pool)) => {
            let queue = PgJobQueue::new(pool.clone());
            let requeued = queue.requeue_stale().await?;
            if requeued > 0 {
                info!(requeued, "requeued interrupted generation jobs");
            }
            workers.push(queue.spawn_worker(generation.clone(), cancel.clone()));
            Arc::new(queue)
        }
        (QueueBackend::Postgres, None) => {
            anyhow::bail!("QUEUE_BACKEND=postgres requires DATABASE_URL")
        }
        (QueueBackend::Local, _) => {
            let (queue, handle) = LocalJobQueue::start(generation.clone(), cancel.clone());
            workers.push(handle);
            Arc::new(queue)
        }
    };

    {
        let kv = stores.kv.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(300)) => {}
                }
                match kv.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "purged expired key-value entries"),
                    Err(e) => tracing::error!(error = %e, "failed to purge expired entries"),
                }
            }
        }));
    }

    let state = AppState::new(
        generation,
        stores.corpus.clone(),
        queue,
        ApiKey::new(config.api_key.as_str()),
        config.max_questions_per_request,
    );

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "worker task ended abnormally");
        }
    }
    Ok(())
}
