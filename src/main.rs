use product_service::{
    init_telemetry, os_signal, router, ServiceConfig, ShutdownCoordinator, StubProductService,
};
use std::future::IntoFuture;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    // 追踪子系统不可用时不对外提供服务
    let guard = match init_telemetry(&config.telemetry) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize tracing");
            return ExitCode::FAILURE;
        }
    };

    let products = StubProductService::new(guard.telemetry().spans());
    let app = router(guard.telemetry(), products);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port = config.port, "failed to bind listener");
            if let Err(err) = guard.shutdown_within(config.shutdown_timeout).await {
                tracing::error!(error = %err, "failed to flush spans");
            }
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(port = config.port, "starting http server");
    let report = ShutdownCoordinator::new(config.shutdown_timeout)
        .run(
            |signal| {
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .into_future()
            },
            os_signal(),
            guard,
        )
        .await;

    tracing::info!(clean = report.is_clean(), "server stopped");
    report.exit_code()
}
