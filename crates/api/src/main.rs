//! API server entry point.

use std::sync::Arc;

use api::stress::{self, StressTestArgs};
use api::{AppState, Cli, Command, Config, LogFormat};
use clap::Parser;
use common::ExecutionContext;
use domain::OrderService;
use order_store::PostgresOrderRepository;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    match cli.command() {
        Command::Serve => serve(config).await,
        Command::StressTest(args) => stress_test(args).await,
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Connect to the database and wait until it answers
    let pool = order_store::connect_pool(&config.database)?;
    order_store::wait_for_database(&pool, config.db_ready_timeout).await?;

    // 4. Build the application
    let repository = PostgresOrderRepository::new(pool.clone());
    let state = Arc::new(AppState::new(OrderService::new(repository)));
    let app = api::create_app(state, metrics_handle, config.request_timeout);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(
        %addr,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        max_connections = config.database.max_connections,
        "starting API server"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn stress_test(args: StressTestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (ctx, handle) = ExecutionContext::cancellable();
    let ctx = ctx.with_timeout(stress::TOTAL_TIMEOUT);
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.cancel();
    });

    let summary = stress::run(&args, &ctx).await?;
    println!("--- Stress Test Summary ---");
    println!("Total Orders Sent: {}", summary.requested);
    println!("Successful Orders: {}", summary.succeeded);
    println!("Failed Orders: {}", summary.failed);
    println!("Total Duration: {:?}", summary.duration);
    Ok(())
}
