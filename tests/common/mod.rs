//! 集成测试共用的工具函数

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use product_service::{
    init_telemetry_with_exporter, ProductError, ProductService, SpanFactory, TelemetryConfig,
    TelemetryGuard,
};
use std::future::Future;
use std::time::Duration;
use tower::ServiceExt;

/// 合法的 W3C traceparent，用于验证上游上下文的延续
pub const UPSTREAM_TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
pub const UPSTREAM_SPAN_ID: &str = "b7ad6b7169203331";

pub fn upstream_traceparent() -> String {
    format!("00-{UPSTREAM_TRACE_ID}-{UPSTREAM_SPAN_ID}-01")
}

/// 使用内存 exporter 的追踪子系统，不触碰全局状态
pub fn memory_telemetry() -> (TelemetryGuard, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let config = TelemetryConfig {
        install_global: false,
        ..TelemetryConfig::default()
    };
    let guard = init_telemetry_with_exporter(&config, exporter.clone())
        .expect("in-memory telemetry should initialize");
    (guard, exporter)
}

/// 刷新批量处理器并返回所有已结束的 span
pub fn finished_spans(guard: &TelemetryGuard, exporter: &InMemorySpanExporter) -> Vec<SpanData> {
    guard.force_flush().expect("flush should succeed");
    exporter.get_finished_spans().expect("exporter should be readable")
}

pub fn attribute(span: &SpanData, key: &str) -> Option<opentelemetry::Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

pub fn span_named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("no span named {name:?} in {:?}", names(spans)))
}

pub fn span_ending_with<'a>(spans: &'a [SpanData], suffix: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name.ends_with(suffix))
        .unwrap_or_else(|| panic!("no span ending with {suffix:?} in {:?}", names(spans)))
}

fn names(spans: &[SpanData]) -> Vec<&str> {
    spans.iter().map(|span| span.name.as_ref()).collect()
}

/// 发送一个 GET 请求，返回状态码、响应头和解析后的 JSON 响应体
pub async fn get_json(
    app: Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, serde_json::Value) {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or_else(|err| {
        panic!("response body is not JSON ({err}): {}", String::from_utf8_lossy(&body))
    });
    (status, headers, json)
}

pub fn is_trace_id(value: &serde_json::Value) -> bool {
    value.as_str().is_some_and(|id| {
        id.len() == 32
            && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            && id.bytes().any(|b| b != b'0')
    })
}

/// 总是查询失败的商品服务
#[derive(Clone)]
pub struct MissingProducts {
    spans: SpanFactory,
}

impl MissingProducts {
    pub fn new(spans: SpanFactory) -> Self {
        Self { spans }
    }
}

impl ProductService for MissingProducts {
    fn get_by_id(
        &self,
        cx: Context,
        id: i64,
    ) -> impl Future<Output = Result<String, ProductError>> + Send {
        async move {
            let scope = self.spans.start(&cx, Some("lookup"));
            let err = ProductError::NotFound(id);
            scope.record_error(&err);
            Err(err)
        }
    }
}

/// 查询前先等待一段时间的商品服务，用来制造进行中的请求
#[derive(Clone)]
pub struct SlowProducts {
    spans: SpanFactory,
    delay: Duration,
}

impl SlowProducts {
    pub fn new(spans: SpanFactory, delay: Duration) -> Self {
        Self { spans, delay }
    }
}

impl ProductService for SlowProducts {
    fn get_by_id(
        &self,
        cx: Context,
        id: i64,
    ) -> impl Future<Output = Result<String, ProductError>> + Send {
        async move {
            let scope = self.spans.start(&cx, Some("slow lookup"));
            scope.set_attribute(KeyValue::new("product.id", id));
            tokio::time::sleep(self.delay).await;
            Ok(format!("product with ID {id}"))
        }
    }
}
