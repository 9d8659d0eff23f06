//! 商品查询服务的全链路追踪
//!
//! 包含追踪子系统的初始化与关闭、span 工厂、请求级别的追踪ID传递、
//! 入站追踪中间件以及进程的关闭协调。
//! 核心功能与Web框架无关，Axum 集成位于 `axum` feature 之后。
//!
//! ## Usage
//!
//! ### 基础用法：追踪ID的传递
//! ```
//! use product_service::{get_trace_id, with_trace_id, TraceId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let trace_id = TraceId::generate();
//! let seen = with_trace_id(trace_id.clone(), async { get_trace_id() }).await;
//! assert_eq!(seen, Ok(trace_id));
//!
//! // 上下文之外读取追踪ID是错误，而不是空字符串
//! assert!(get_trace_id().is_err());
//! # }
//! ```
//!
//! ### 启动服务（需要启用 axum feature）
//! ```ignore
//! use product_service::{init_telemetry, os_signal, router, ServiceConfig, ShutdownCoordinator, StubProductService};
//!
//! let config = ServiceConfig::from_env()?;
//! let guard = init_telemetry(&config.telemetry)?;
//! let app = router(guard.telemetry(), StubProductService::new(guard.telemetry().spans()));
//! let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
//!
//! let report = ShutdownCoordinator::new(config.shutdown_timeout)
//!     .run(
//!         |signal| axum::serve(listener, app).with_graceful_shutdown(signal).into_future(),
//!         os_signal(),
//!         guard,
//!     )
//!     .await;
//! ```

mod config;
mod context;
mod product;
mod shutdown;
mod span;
mod telemetry;
mod trace_id;

pub use config::{ConfigError, ServiceConfig};
pub use context::{
    attach_trace_id, get_trace_id, trace_id_from, with_context, with_trace_id, AsTraceContext,
    TraceError,
};
pub use product::{parse_product_id, ProductError, ProductService, StubProductService};
pub use shutdown::{
    os_signal, Phase, ShutdownCoordinator, ShutdownReport, ShutdownSignal, ShutdownTrigger,
};
pub use span::{SpanFactory, SpanScope};
#[doc(hidden)]
pub use span::trim_function_path;
pub use telemetry::{
    init_telemetry, init_telemetry_with_exporter, BatchSettings, Telemetry, TelemetryConfig,
    TelemetryError, TelemetryGuard, DEFAULT_OTLP_ENDPOINT, DEFAULT_SERVICE_NAME,
};
pub use trace_id::TraceId;

/// HTTP 响应头中的追踪ID字段名
pub const TRACE_ID_HEADER: &str = "x-trace-id";

// -- axum feature --
#[cfg(feature = "axum")]
mod integrations;
#[cfg(feature = "axum")]
pub use integrations::axum::{
    inject_context, RequestContext, TraceContextConfig, TraceContextLayer, TraceContextService,
    DEFAULT_MAX_BODY_ATTRIBUTE_LEN,
};
#[cfg(feature = "axum")]
pub use integrations::handlers::{router, router_with_config, ApiResponse, AppState};
