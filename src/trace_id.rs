//! TraceId 核心结构体定义
//!
//! 请求级别的追踪ID，取值来自 OpenTelemetry span 的 trace id，
//! 以32字符小写十六进制形式出现在响应体、响应头和 span 属性中。

use opentelemetry::trace::{SpanContext, TraceId as OtelTraceId};
use std::fmt;

/// 全零的 trace id，在 W3C TraceContext 规范中表示无效
const INVALID_TRACE_ID: &str = "00000000000000000000000000000000";

/// 追踪ID结构体
///
/// 内部保存已格式化的十六进制字符串，避免每次读取时重复格式化
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// 从 OpenTelemetry 的 trace id 创建追踪ID
    ///
    /// 无效（全零）的 trace id 返回 None
    #[inline]
    pub fn from_otel(trace_id: OtelTraceId) -> Option<Self> {
        if trace_id == OtelTraceId::INVALID {
            return None;
        }
        Some(Self(format!("{trace_id}")))
    }

    /// 从 span 上下文中提取追踪ID
    ///
    /// # 返回
    /// span 上下文有效时返回 Some(TraceId)，否则返回 None
    #[inline]
    pub fn from_span_context(span_context: &SpanContext) -> Option<Self> {
        if !span_context.is_valid() {
            return None;
        }
        Self::from_otel(span_context.trace_id())
    }

    /// 本地生成一个新的追踪ID
    ///
    /// 只在 tracer 给出无效 span 上下文时（例如 noop provider）作为兜底，
    /// 保证响应里始终有一个格式合法的ID。
    pub fn generate() -> Self {
        let value = loop {
            let candidate = fastrand::u128(..);
            if candidate != 0 {
                break candidate;
            }
        };
        Self(format!("{value:032x}"))
    }

    /// 从字符串创建追踪ID，并进行 W3C TraceContext 规范校验
    ///
    /// # 校验规则
    /// - 长度必须是 32 个字符
    /// - 只能包含小写十六进制字符（0-9, a-f）
    /// - 不能全为零
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        if id.len() != 32 {
            return None;
        }

        if !Self::is_valid_hex_bytes(id.as_bytes()) {
            return None;
        }

        if id == INVALID_TRACE_ID {
            return None;
        }

        Some(Self(id.to_string()))
    }

    #[inline]
    fn is_valid_hex_bytes(bytes: &[u8]) -> bool {
        bytes
            .iter()
            .all(|&b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// 转换回 OpenTelemetry 的 trace id
    pub fn to_otel(&self) -> OtelTraceId {
        OtelTraceId::from_hex(&self.0).unwrap_or(OtelTraceId::INVALID)
    }

    /// 获取追踪ID字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TraceId> for String {
    fn from(trace_id: TraceId) -> Self {
        trace_id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceState};

    fn span_context(trace_id: &str) -> SpanContext {
        SpanContext::new(
            OtelTraceId::from_hex(trace_id).unwrap(),
            SpanId::from_hex("b7ad6b7169203331").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        )
    }

    #[test]
    fn test_from_span_context() {
        let trace_id = TraceId::from_span_context(&span_context("0af7651916cd43dd8448eb211c80319c"))
            .expect("有效的 span 上下文应产生追踪ID");
        assert_eq!(trace_id.as_str(), "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn test_invalid_span_context_yields_none() {
        assert!(TraceId::from_span_context(&SpanContext::empty_context()).is_none());
        assert!(TraceId::from_otel(OtelTraceId::INVALID).is_none());
    }

    #[test]
    fn test_leading_zeros_are_kept() {
        // 数值较小的 trace id 也必须输出固定32位
        let trace_id = TraceId::from_otel(OtelTraceId::from_bytes(0x2a_u128.to_be_bytes())).unwrap();
        assert_eq!(trace_id.as_str(), "0000000000000000000000000000002a");
        assert_eq!(trace_id.as_str().len(), 32);
    }

    #[test]
    fn test_to_otel_matches_source() {
        let source = OtelTraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
        let trace_id = TraceId::from_otel(source).unwrap();
        assert_eq!(trace_id.to_otel(), source);
    }

    #[test]
    fn test_generate() {
        let trace_id = TraceId::generate();
        assert_eq!(trace_id.as_str().len(), 32);
        assert!(TraceId::from_string_validated(trace_id.as_str()).is_some());
        assert_ne!(trace_id, TraceId::generate(), "连续生成的ID不应相同");
    }

    #[test]
    fn test_from_string_validated() {
        let valid_id = "0af7651916cd43dd8448eb211c80319c";
        assert_eq!(
            TraceId::from_string_validated(valid_id),
            Some(TraceId(valid_id.to_string()))
        );

        // 长度不正确
        assert_eq!(TraceId::from_string_validated("short"), None);
        // 包含大写字符
        assert_eq!(
            TraceId::from_string_validated("0AF7651916CD43DD8448EB211C80319C"),
            None
        );
        // 包含非十六进制字符
        assert_eq!(
            TraceId::from_string_validated("0af7651916cd43dd8448eb211c80319g"),
            None
        );
        // 全为零
        assert_eq!(TraceId::from_string_validated(INVALID_TRACE_ID), None);
    }

    #[test]
    fn test_display_and_into_string() {
        let trace_id = TraceId::from_string_validated("0af7651916cd43dd8448eb211c80319c").unwrap();
        assert_eq!(format!("{trace_id}"), "0af7651916cd43dd8448eb211c80319c");
        let owned: String = trace_id.into();
        assert_eq!(owned, "0af7651916cd43dd8448eb211c80319c");
    }
}
