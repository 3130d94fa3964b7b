use std::{process, sync::Arc};

use pagecache::{
    application::{error::AppError, recipes::RecipeService},
    cache::{EntryStore, InvalidationTarget, ResponseCache},
    config,
    infra::{
        cache::connect_store,
        error::InfraError,
        http::{self, AdminState, HttpState},
        memory::InMemoryCookbook,
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cache(args) => match args.command {
            config::CacheCommand::Ping(_) => run_cache_ping(settings).await,
            config::CacheCommand::Flush(_) => run_cache_flush(settings).await,
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = connect_store(&settings.store).await?;
    let cache = ResponseCache::new(settings.cache.clone(), store);
    let recipes = RecipeService::new(Arc::new(InMemoryCookbook::seeded()), cache.objects());

    info!(
        target = "pagecache::serve",
        namespace = %settings.cache.namespace.key_prefix(),
        enabled = settings.cache.enabled,
        page_ttl_secs = settings.site.page_ttl.as_secs(),
        "response cache ready"
    );

    let http_state = HttpState {
        recipes: recipes.clone(),
        cache: cache.clone(),
        page_ttl: settings.site.page_ttl,
    };
    let admin_state = AdminState {
        recipes,
        cache: cache.clone(),
    };

    let result = serve_http(&settings, http_state, admin_state).await;

    // Let spawned cache writes land before the store goes away.
    if tokio::time::timeout(settings.server.graceful_shutdown, cache.drain())
        .await
        .is_err()
    {
        warn!(
            target = "pagecache::serve",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "pending cache writes abandoned at shutdown"
        );
    }

    result
}

async fn run_cache_ping(settings: config::Settings) -> Result<(), AppError> {
    let store = connect_store(&settings.store).await?;
    store
        .ping()
        .await
        .map_err(|err| AppError::from(InfraError::store(err.to_string())))?;
    info!(target = "pagecache::cache", "store answered ping");
    Ok(())
}

async fn run_cache_flush(settings: config::Settings) -> Result<(), AppError> {
    let store: Arc<dyn EntryStore> = connect_store(&settings.store).await?;
    let namespace = settings.cache.namespace.key_prefix();
    let removed = ResponseCache::new(settings.cache, store)
        .invalidate(InvalidationTarget::Namespace)
        .await?;
    info!(target = "pagecache::cache", namespace = %namespace, removed, "namespace flushed");
    Ok(())
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "pagecache::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "pagecache::serve", error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!(target = "pagecache::serve", "shutdown requested");
        let _ = stop_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(stopped(stop_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(stopped(stop_rx));

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
