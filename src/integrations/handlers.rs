//! HTTP 路由与处理器
//!
//! | 路由 | 成功响应 |
//! |------|----------|
//! | `GET /ping` | `200 {"message":"ok","traceID":...}` |
//! | `GET /v1/product/{id}` | `200 {"message":"success get product","traceID":...,"data":...}` |
//!
//! 非整数ID返回 400，查询失败返回 404，响应体中同样带有 `traceID`。

use super::axum::{RequestContext, TraceContextConfig, TraceContextLayer};
use crate::context::{self, TraceError};
use crate::product::{parse_product_id, ProductError, ProductService};
use crate::span::{SpanFactory, SpanScope};
use crate::telemetry::Telemetry;
use crate::trace_id::TraceId;
use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use opentelemetry::KeyValue;
use serde::Serialize;
use std::sync::Arc;

/// 统一的 JSON 响应体
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T = ()> {
    pub message: String,
    #[serde(rename = "traceID", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn new(message: impl Into<String>, trace_id: &TraceId) -> Self {
        Self {
            message: message.into(),
            trace_id: Some(trace_id.to_string()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    /// 拿不到追踪ID时使用，只在请求绕过追踪中间件时出现
    pub(crate) fn untraced(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace_id: None,
            data: None,
        }
    }
}

/// 处理器共享状态
pub struct AppState<S> {
    spans: SpanFactory,
    products: Arc<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            spans: self.spans.clone(),
            products: Arc::clone(&self.products),
        }
    }
}

/// 组装带追踪中间件的路由
pub fn router<S: ProductService>(telemetry: &Telemetry, products: S) -> Router {
    router_with_config(telemetry, products, TraceContextConfig::default())
}

/// 使用自定义中间件配置组装路由
pub fn router_with_config<S: ProductService>(
    telemetry: &Telemetry,
    products: S,
    config: TraceContextConfig,
) -> Router {
    let state = AppState {
        spans: telemetry.spans(),
        products: Arc::new(products),
    };

    Router::new()
        .route("/ping", get(ping::<S>))
        .route("/v1/product/{id}", get(get_product::<S>))
        .with_state(state)
        .layer(TraceContextLayer::with_config(telemetry.clone(), config))
}

async fn ping<S: ProductService>(
    State(state): State<AppState<S>>,
    request: RequestContext,
) -> Result<Response, TraceError> {
    let scope = crate::start_span!(state.spans, &request);
    let trace_id = context::trace_id_from(scope.context())?;

    Ok((StatusCode::OK, Json(ApiResponse::<()>::new("ok", &trace_id))).into_response())
}

async fn get_product<S: ProductService>(
    State(state): State<AppState<S>>,
    request: RequestContext,
    raw_id: Result<Path<String>, PathRejection>,
) -> Result<Response, TraceError> {
    let scope = crate::start_span!(state.spans, &request);
    let trace_id = context::trace_id_from(scope.context())?;

    // 无法解码的路径参数同样是非法ID，走统一的 400 响应
    let id = match raw_id
        .map_err(|rejection| ProductError::MalformedId(rejection.body_text()))
        .and_then(|Path(raw_id)| parse_product_id(&raw_id))
    {
        Ok(id) => id,
        Err(err) => return Ok(failure(&scope, &trace_id, err)),
    };
    scope.set_attribute(KeyValue::new("product.id", id));

    match state.products.get_by_id(scope.context().clone(), id).await {
        Ok(product) => Ok((
            StatusCode::OK,
            Json(ApiResponse::new("success get product", &trace_id).with_data(product)),
        )
            .into_response()),
        Err(err) => Ok(failure(&scope, &trace_id, err)),
    }
}

/// 把错误记录到 span 上并转换成对应状态码的响应
fn failure(scope: &SpanScope, trace_id: &TraceId, err: ProductError) -> Response {
    scope.record_error(&err);
    let status = match err {
        ProductError::InvalidId { .. } | ProductError::MalformedId(_) => StatusCode::BAD_REQUEST,
        ProductError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    tracing::warn!(error = %err, status = status.as_u16(), "get product failed");

    (
        status,
        Json(ApiResponse::<()>::new(err.to_string(), trace_id)),
    )
        .into_response()
}
