//! 追踪上下文管理
//!
//! 追踪ID作为值存放在 OpenTelemetry 的 [`Context`] 中，随上下文链一起传递，
//! 不依赖任何全局可变状态。核心部分与Web框架无关，框架层只需实现
//! [`AsTraceContext`] 把自己的请求上下文转换为普通的 [`Context`]。

use crate::trace_id::TraceId;
use opentelemetry::trace::FutureExt;
use opentelemetry::Context;
use std::future::Future;

/// 读取追踪上下文时可能出现的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// 上下文中没有追踪ID，通常说明请求没有经过追踪中间件
    #[error("trace id missing from request context")]
    MissingTraceId,
}

/// 框架适配接口
///
/// 任何携带追踪信息的请求上下文（例如 axum 的请求扩展）都可以实现这个 trait，
/// span 工厂总是通过它拿到底层的 [`Context`] 来派生子 span，
/// 从而保证父子关系不会因为框架包装而断开。
pub trait AsTraceContext {
    /// 返回用于派生子 span 的上下文
    fn trace_context(&self) -> Context;
}

impl AsTraceContext for Context {
    fn trace_context(&self) -> Context {
        self.clone()
    }
}

impl<T: AsTraceContext + ?Sized> AsTraceContext for &T {
    fn trace_context(&self) -> Context {
        (**self).trace_context()
    }
}

/// 在上下文中记录追踪ID，返回新的子上下文
pub fn attach_trace_id(cx: &Context, trace_id: TraceId) -> Context {
    cx.with_value(trace_id)
}

/// 从指定上下文中读取追踪ID
///
/// # 错误
/// 上下文中没有追踪ID时返回 [`TraceError::MissingTraceId`]
pub fn trace_id_from(cx: &Context) -> Result<TraceId, TraceError> {
    cx.get::<TraceId>().cloned().ok_or(TraceError::MissingTraceId)
}

/// 获取当前追踪ID
///
/// 从当前异步任务挂载的上下文中读取。不在追踪作用域内时返回错误，
/// 而不是悄悄生成一个新的ID。
pub fn get_trace_id() -> Result<TraceId, TraceError> {
    Context::map_current(trace_id_from)
}

/// 在指定上下文中执行异步操作
///
/// 每次 poll 时都会挂载该上下文，跨越 await 点依然有效
pub async fn with_context<F>(cx: Context, future: F) -> F::Output
where
    F: Future,
{
    future.with_context(cx).await
}

/// 在指定的追踪ID作用域中执行异步操作
///
/// 以当前上下文为父上下文，只额外写入追踪ID
pub async fn with_trace_id<F>(trace_id: TraceId, future: F) -> F::Output
where
    F: Future,
{
    let cx = attach_trace_id(&Context::current(), trace_id);
    with_context(cx, future).await
}
