use {
    pay_reconcile::{
        AppState,
        adapters::{provider_client::HttpProvider, routes},
        config::Config,
        infra::postgres::PgStore,
        services::worker,
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{
        signal,
        sync::{broadcast::error::RecvError, watch},
    },
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(config.database_url.reveal())
        .await
        .expect("failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let provider = HttpProvider::from_config(&config).expect("failed to build provider client");
    let state = AppState::new(&config, Arc::new(PgStore::new(pool)), Arc::new(provider));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(worker::run_scheduler(
        state.scheduler.clone(),
        config.poll.tick,
        shutdown_rx.clone(),
    ));
    tokio::spawn(worker::run_sweeper(
        state.suppressor.clone(),
        config.sweep_interval,
        shutdown_rx,
    ));

    let mut confirmed = state.subscribe_confirmed();
    tokio::spawn(async move {
        loop {
            match confirmed.recv().await {
                Ok(event) => tracing::info!(
                    payment_id = %event.payment_id,
                    amount = event.amount,
                    currency = %event.currency,
                    "payment confirmed"
                ),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "confirmation listener lagged"),
                Err(RecvError::Closed) => return,
            }
        }
    });

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.unwrap();
    tracing::info!(
        addr = %config.bind_addr,
        environment = %config.environment,
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    let _ = shutdown_tx.send(true);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
