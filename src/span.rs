//! Span 工厂
//!
//! 根据父上下文派生子 span，并把它包进 [`SpanScope`]。`SpanScope` 在被显式
//! `end` 或被丢弃（包括 panic 展开）时结束 span，保证每个 span 恰好结束一次。

use crate::context::AsTraceContext;
use crate::trace_id::TraceId;
use opentelemetry::trace::{SpanRef, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;
use std::error::Error;
use std::fmt;
use std::panic::Location;

/// 以当前函数的完整路径作为 span 名称启动 span
///
/// ```ignore
/// let scope = start_span!(spans, &cx);
/// let named = start_span!(spans, &cx, "lookup");
/// ```
#[macro_export]
macro_rules! start_span {
    ($factory:expr, $parent:expr) => {
        $factory.start($parent, ::core::option::Option::Some($crate::function_path!()))
    };
    ($factory:expr, $parent:expr, $name:expr) => {
        $factory.start($parent, ::core::option::Option::Some($name))
    };
}

/// 展开为调用处所在函数的完整路径
#[doc(hidden)]
#[macro_export]
macro_rules! function_path {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        $crate::trim_function_path(type_name_of(f))
    }};
}

/// 去掉 `function_path!` 引入的辅助函数名和 async 闭包后缀
#[doc(hidden)]
pub fn trim_function_path(raw: &'static str) -> &'static str {
    let mut name = raw.strip_suffix("::f").unwrap_or(raw);
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

/// 基于注入的 tracer 创建 span
#[derive(Clone)]
pub struct SpanFactory {
    tracer: SdkTracer,
}

impl SpanFactory {
    pub(crate) fn new(tracer: SdkTracer) -> Self {
        Self { tracer }
    }

    /// 在父上下文下启动一个子 span
    ///
    /// # 参数
    /// * `parent` - 父上下文，框架包装会通过 [`AsTraceContext`] 被展开
    /// * `name` - span 名称；为 `None` 时使用调用处的源码位置
    ///
    /// 工厂本身从不结束 span，由返回的 [`SpanScope`] 负责
    #[track_caller]
    pub fn start(&self, parent: &impl AsTraceContext, name: Option<&str>) -> SpanScope {
        let name = match name {
            Some(name) => name.to_owned(),
            None => caller_name(Location::caller()),
        };
        let parent = parent.trace_context();
        let span = self.tracer.start_with_context(name, &parent);
        SpanScope {
            cx: parent.with_span(span),
        }
    }
}

impl fmt::Debug for SpanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanFactory").finish_non_exhaustive()
    }
}

fn caller_name(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}

/// 一个正在进行中的 span 及其上下文
///
/// 丢弃时结束 span；提前调用 [`SpanScope::end`] 之后再丢弃不会重复结束
#[must_use = "dropping a SpanScope ends its span immediately"]
pub struct SpanScope {
    cx: Context,
}

impl SpanScope {
    /// 包含当前 span 的上下文，用于派生子 span 或写入请求级别的值
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span(&self) -> SpanRef<'_> {
        self.cx.span()
    }

    /// span 所属 trace 的ID；span 上下文无效时返回 None
    pub fn trace_id(&self) -> Option<TraceId> {
        TraceId::from_span_context(self.cx.span().span_context())
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    /// 记录错误事件并把 span 状态置为 error
    pub fn record_error(&self, err: &(dyn Error + 'static)) {
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }

    /// 结束 span
    pub fn end(self) {}
}

impl AsTraceContext for SpanScope {
    fn trace_context(&self) -> Context {
        self.cx.clone()
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

impl fmt::Debug for SpanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanScope")
            .field("span_context", self.cx.span().span_context())
            .finish()
    }
}
