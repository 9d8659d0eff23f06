//! Tracer provider 生命周期
//!
//! 负责构建批量导出的 span exporter、合并服务资源描述、安装全局 provider 和
//! 组合传播器（W3C TraceContext + Baggage），并返回一个 [`TelemetryGuard`]。
//! 消费 guard 的 `shutdown` 即为关闭钩子：刷新缓冲区中的 span 并关闭 provider。
//!
//! 进程内的其他组件通过 [`Telemetry`] 句柄显式获得 tracer 与传播器，
//! 全局注册只是为了兼容直接使用 `opentelemetry::global` 的第三方库。

use crate::span::SpanFactory;
use opentelemetry::propagation::{Extractor, Injector, TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use opentelemetry_sdk::Resource;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 默认的 OTLP gRPC 采集端点（明文传输）
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// 默认服务名，同时作为 tracer 的 instrumentation scope 名称
pub const DEFAULT_SERVICE_NAME: &str = "product-service";

/// 进程内是否已经安装过全局 provider
static GLOBAL_INSTALLED: AtomicBool = AtomicBool::new(false);

/// 批量处理器参数
///
/// 队列写满时 SDK 直接丢弃新结束的 span，请求路径不会被阻塞
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// 等待导出的 span 队列上限
    pub max_queue_size: usize,
    /// 单次导出的最大 span 数
    pub max_export_batch_size: usize,
    /// 两次导出之间的间隔
    pub scheduled_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_millis(5000),
        }
    }
}

/// 追踪子系统配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// 资源描述中的 `service.name`
    pub service_name: String,
    /// OTLP gRPC 端点
    pub otlp_endpoint: String,
    /// 是否安装为全局 provider 和全局传播器
    pub install_global: bool,
    pub batch: BatchSettings,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            install_global: true,
            batch: BatchSettings::default(),
        }
    }
}

/// 追踪子系统初始化和关闭过程中的错误
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// OTLP exporter 构建失败，进程不应继续对外提供服务
    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// 全局 provider 已经安装过
    #[error("a global tracer provider is already installed")]
    AlreadyInstalled,

    #[error("failed to flush tracer provider: {0}")]
    Flush(#[source] OTelSdkError),

    #[error("tracer provider shutdown failed: {0}")]
    Shutdown(#[source] OTelSdkError),

    /// 关闭超出时间上限，缓冲区中的 span 可能丢失
    #[error("tracer provider shutdown exceeded {0:?}")]
    ShutdownTimeout(Duration),

    #[error("tracer provider shutdown task failed: {0}")]
    ShutdownTask(#[from] tokio::task::JoinError),
}

/// 进程内共享的追踪句柄
///
/// 克隆开销很小，可以放进路由状态或中间件中
#[derive(Clone)]
pub struct Telemetry {
    tracer: SdkTracer,
    propagator: Arc<TextMapCompositePropagator>,
}

impl Telemetry {
    fn new(tracer: SdkTracer) -> Self {
        Self {
            tracer,
            propagator: Arc::new(composite_propagator()),
        }
    }

    /// 获取 span 工厂
    pub fn spans(&self) -> SpanFactory {
        SpanFactory::new(self.tracer.clone())
    }

    /// 从载体（例如HTTP头）中提取上游传播过来的上下文
    ///
    /// 载体里没有追踪信息时返回一个空的根上下文，随后创建的 span 会开启新的 trace
    pub fn extract(&self, carrier: &dyn Extractor) -> Context {
        self.propagator.extract_with_context(&Context::new(), carrier)
    }

    /// 把上下文注入到出站请求的载体中
    pub fn inject(&self, cx: &Context, carrier: &mut dyn Injector) {
        self.propagator.inject_context(cx, carrier);
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

/// 持有 tracer provider 的守卫
///
/// 必须在进程退出前调用 [`TelemetryGuard::shutdown`]，否则批量队列里的 span 可能丢失。
/// `shutdown` 会消费守卫，因此同一个 provider 不会被关闭两次。
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
    telemetry: Telemetry,
    owns_global: bool,
}

impl TelemetryGuard {
    /// 获取追踪句柄
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// 获取底层 provider
    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// 立即导出队列中所有已结束的 span
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        self.provider.force_flush().map_err(TelemetryError::Flush)
    }

    /// 刷新并关闭 provider
    ///
    /// 会阻塞当前线程直到导出完成，异步上下文中请使用 [`TelemetryGuard::shutdown_within`]
    pub fn shutdown(self) -> Result<(), TelemetryError> {
        let result = self.provider.shutdown().map_err(TelemetryError::Shutdown);
        if self.owns_global {
            GLOBAL_INSTALLED.store(false, Ordering::Release);
        }
        result
    }

    /// 在阻塞线程池中关闭 provider，最多等待 `timeout`
    pub async fn shutdown_within(self, timeout: Duration) -> Result<(), TelemetryError> {
        let task = tokio::task::spawn_blocking(move || self.shutdown());
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(TelemetryError::ShutdownTimeout(timeout)),
        }
    }
}

impl fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("owns_global", &self.owns_global)
            .finish_non_exhaustive()
    }
}

/// 使用默认的 OTLP gRPC exporter 初始化追踪子系统
///
/// 必须在 tokio 运行时内调用：gRPC 通道在构建时就绑定到当前运行时。
///
/// # 错误
/// exporter 构建失败或全局 provider 已存在时返回错误，调用方应放弃启动
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    init_telemetry_with_exporter(config, exporter)
}

/// 使用调用方提供的 exporter 初始化追踪子系统
///
/// exporter 依然被包在批量处理器中，测试里通常传入内存 exporter
pub fn init_telemetry_with_exporter<E>(
    config: &TelemetryConfig,
    exporter: E,
) -> Result<TelemetryGuard, TelemetryError>
where
    E: SpanExporter + 'static,
{
    if config.install_global && GLOBAL_INSTALLED.swap(true, Ordering::AcqRel) {
        return Err(TelemetryError::AlreadyInstalled);
    }

    let batch_config = BatchConfigBuilder::default()
        .with_max_queue_size(config.batch.max_queue_size)
        .with_max_export_batch_size(config.batch.max_export_batch_size)
        .with_scheduled_delay(config.batch.scheduled_delay)
        .build();
    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(service_resource(&config.service_name))
        .with_span_processor(processor)
        .build();

    let telemetry = Telemetry::new(provider.tracer(config.service_name.clone()));

    if config.install_global {
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(composite_propagator());
        tracing::info!(
            service_name = %config.service_name,
            "installed global tracer provider and propagator"
        );
    }

    Ok(TelemetryGuard {
        provider,
        telemetry,
        owns_global: config.install_global,
    })
}

/// SDK 默认资源（进程、SDK 信息和环境变量）合并上服务标识
fn service_resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build()
}

fn composite_propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}
