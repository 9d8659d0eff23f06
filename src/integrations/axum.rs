//! Axum框架的追踪中间件
//!
//! 每个入站请求对应一个 span：从请求头提取上游上下文，启动名为
//! `"<METHOD> <URI>"` 的 span，把追踪ID写进请求上下文，处理完成后把响应状态码
//! 和响应体记录为 span 属性。

use super::handlers::ApiResponse;
use crate::context::{self, AsTraceContext, TraceError};
use crate::span::SpanScope;
use crate::telemetry::Telemetry;
use crate::trace_id::TraceId;
use crate::TRACE_ID_HEADER;
use axum::{
    body::{Body, BodyDataStream, Bytes},
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{stream, StreamExt};
use opentelemetry::trace::FutureExt;
use opentelemetry::KeyValue;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

/// span 属性中响应体的默认长度上限（字节）
pub const DEFAULT_MAX_BODY_ATTRIBUTE_LEN: usize = 4096;

/// 追踪中间件配置选项
#[derive(Clone, Debug)]
pub struct TraceContextConfig {
    /// 是否在响应头中回写追踪ID（默认启用）
    pub enable_response_header: bool,
    /// 是否把响应体记录到 span 上（默认启用）
    ///
    /// 需要缓冲响应体开头的一段，长连接推送之类的流式接口应关闭此项
    pub capture_response_body: bool,
    /// 记录到 span 上的响应体最大字节数
    ///
    /// 中间件最多缓冲这么多字节，更长的响应体其余部分直接流式透传给客户端
    pub max_body_attribute_len: usize,
}

impl Default for TraceContextConfig {
    fn default() -> Self {
        Self {
            enable_response_header: true,
            capture_response_body: true,
            max_body_attribute_len: DEFAULT_MAX_BODY_ATTRIBUTE_LEN,
        }
    }
}

/// 追踪中间件层
#[derive(Clone)]
pub struct TraceContextLayer {
    telemetry: Telemetry,
    config: TraceContextConfig,
}

impl TraceContextLayer {
    /// 使用默认配置创建追踪中间件层
    pub fn new(telemetry: Telemetry) -> Self {
        Self::with_config(telemetry, TraceContextConfig::default())
    }

    /// 使用自定义配置创建追踪中间件层
    pub fn with_config(telemetry: Telemetry, config: TraceContextConfig) -> Self {
        Self { telemetry, config }
    }
}

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextService {
            inner,
            telemetry: self.telemetry.clone(),
            config: self.config.clone(),
        }
    }
}

/// 追踪中间件服务
#[derive(Clone)]
pub struct TraceContextService<S> {
    inner: S,
    telemetry: Telemetry,
    config: TraceContextConfig,
}

impl<S> Service<Request> for TraceContextService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // 请求头里没有 traceparent 时得到空上下文，span 会开启新的 trace
        let parent = self.telemetry.extract(&HeaderExtractor(req.headers()));

        let method = req.method().clone();
        let uri = req.uri().clone();

        let scope = self
            .telemetry
            .spans()
            .start(&parent, Some(&format!("{method} {uri}")));
        let trace_id = scope.trace_id().unwrap_or_else(|| {
            tracing::debug!("request span has an invalid context, using a local trace id");
            TraceId::generate()
        });
        scope.set_attribute(KeyValue::new("traceID", trace_id.to_string()));

        let otel_cx = context::attach_trace_id(scope.context(), trace_id.clone());
        req.extensions_mut().insert(RequestContext {
            cx: otel_cx.clone(),
            trace_id: trace_id.clone(),
        });

        let log_span = tracing::info_span!(
            "request",
            trace_id = %trace_id,
            method = %method,
            uri = %uri
        );

        let future = {
            let _attached = otel_cx.clone().attach();
            self.inner.call(req)
        };
        let config = self.config.clone();

        Box::pin(async move {
            let response = future.with_context(otel_cx).instrument(log_span).await?;
            let mut response = record_response(&scope, response, &config).await;

            if config.enable_response_header {
                if let Ok(header_value) = HeaderValue::from_str(trace_id.as_str()) {
                    response.headers_mut().insert(TRACE_ID_HEADER, header_value);
                }
            }

            scope.end();
            Ok(response)
        })
    }
}

/// 把响应状态码和响应体写入 span，并原样返回响应
///
/// 状态码取自最终发给客户端的响应，读取响应体失败时记录的是 500
async fn record_response(
    scope: &SpanScope,
    response: Response,
    config: &TraceContextConfig,
) -> Response {
    let response = if config.capture_response_body {
        capture_body(scope, response, config.max_body_attribute_len).await
    } else {
        response
    };

    scope.set_attribute(KeyValue::new(
        "http.response.status",
        i64::from(response.status().as_u16()),
    ));
    response
}

async fn capture_body(scope: &SpanScope, response: Response, limit: usize) -> Response {
    let (parts, body) = response.into_parts();
    match ResponseCapture::collect(body, limit).await {
        Ok(capture) => {
            scope.set_attribute(KeyValue::new(
                "http.response.body",
                capture.attribute_value(limit),
            ));
            Response::from_parts(parts, capture.into_body())
        }
        Err(err) => {
            scope.record_error(&err);
            tracing::error!(error = %err, "failed to read response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// 响应体开头的副本
///
/// 只在单个请求内存在，写入 span 属性后随响应一起释放
enum ResponseCapture {
    /// 响应体不超过上限，已经完整读取
    Complete(Bytes),
    /// 响应体超过上限，`rest` 是尚未读取的剩余部分
    Truncated { head: Bytes, rest: BodyDataStream },
}

impl ResponseCapture {
    /// 读取响应体，缓冲超过 `limit` 字节后停止
    async fn collect(body: Body, limit: usize) -> Result<Self, axum::Error> {
        let mut chunks = body.into_data_stream();
        let mut buffered = Vec::new();
        while let Some(chunk) = chunks.next().await {
            buffered.extend_from_slice(&chunk?);
            if buffered.len() > limit {
                return Ok(Self::Truncated {
                    head: Bytes::from(buffered),
                    rest: chunks,
                });
            }
        }
        Ok(Self::Complete(Bytes::from(buffered)))
    }

    fn captured(&self) -> &Bytes {
        match self {
            Self::Complete(bytes) => bytes,
            Self::Truncated { head, .. } => head,
        }
    }

    fn attribute_value(&self, max_len: usize) -> String {
        let bytes = self.captured();
        let end = bytes.len().min(max_len);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// 还原出与原响应字节完全一致的响应体
    fn into_body(self) -> Body {
        match self {
            Self::Complete(bytes) => Body::from(bytes),
            Self::Truncated { head, rest } => {
                let head = stream::once(async move { Ok::<_, axum::Error>(head) });
                Body::from_stream(head.chain(rest))
            }
        }
    }
}

/// 请求级别的追踪上下文
///
/// 由 [`TraceContextLayer`] 写入请求扩展，处理器可以直接在函数签名中提取
#[derive(Clone, Debug)]
pub struct RequestContext {
    cx: opentelemetry::Context,
    trace_id: TraceId,
}

impl RequestContext {
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// 请求 span 所在的上下文
    pub fn context(&self) -> &opentelemetry::Context {
        &self.cx
    }
}

impl AsTraceContext for RequestContext {
    fn trace_context(&self) -> opentelemetry::Context {
        self.cx.clone()
    }
}

impl AsTraceContext for Parts {
    fn trace_context(&self) -> opentelemetry::Context {
        self.extensions
            .get::<RequestContext>()
            .map(RequestContext::trace_context)
            .unwrap_or_else(opentelemetry::Context::current)
    }
}

impl<B> AsTraceContext for axum::http::Request<B> {
    fn trace_context(&self) -> opentelemetry::Context {
        self.extensions()
            .get::<RequestContext>()
            .map(RequestContext::trace_context)
            .unwrap_or_else(opentelemetry::Context::current)
    }
}

/// Axum 提取器
///
/// 请求没有经过 [`TraceContextLayer`] 时返回 [`TraceError::MissingTraceId`]，
/// 最终以 500 响应结束，而不是得到一个空的追踪ID
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = TraceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(TraceError::MissingTraceId)
    }
}

impl IntoResponse for TraceError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "handler invoked without trace context");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::untraced(self.to_string())),
        )
            .into_response()
    }
}

/// 把追踪上下文注入出站请求头，向下游服务传播 traceparent 和 baggage
pub fn inject_context(telemetry: &Telemetry, cx: &impl AsTraceContext, headers: &mut HeaderMap) {
    telemetry.inject(&cx.trace_context(), &mut HeaderInjector(headers));
}
