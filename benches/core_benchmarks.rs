//! 核心功能性能基准测试

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use opentelemetry::trace::TraceId as OtelTraceId;
use opentelemetry::Context;
use opentelemetry_sdk::trace::InMemorySpanExporter;
use product_service::{
    attach_trace_id, init_telemetry_with_exporter, trace_id_from, TelemetryConfig,
    TraceId,
};

/// 基准测试：从 OpenTelemetry trace id 转换
fn bench_id_conversion(c: &mut Criterion) {
    let otel_id = OtelTraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap();
    c.bench_function("TraceId::from_otel", |b| {
        b.iter(|| black_box(TraceId::from_otel(black_box(otel_id))))
    });
}

/// 基准测试：ID 验证
fn bench_id_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("TraceId::from_string_validated");
    for (name, input) in [
        ("valid_id", "0af7651916cd43dd8448eb211c80319c"),
        ("invalid_length", "invalid-trace-id-that-is-longer"),
        ("invalid_chars", "0af7651916cd43dd8448eb211c80319g"),
        ("all_zeros", "00000000000000000000000000000000"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(TraceId::from_string_validated(black_box(input))))
        });
    }
    group.finish();
}

/// 基准测试：上下文中读取追踪ID
fn bench_context_lookup(c: &mut Criterion) {
    let cx = attach_trace_id(&Context::new(), TraceId::generate());
    c.bench_function("trace_id_from", |b| {
        b.iter(|| black_box(trace_id_from(black_box(&cx))))
    });
}

/// 基准测试：启动并结束一个子 span
fn bench_span_start(c: &mut Criterion) {
    let config = TelemetryConfig {
        install_global: false,
        ..TelemetryConfig::default()
    };
    let exporter = InMemorySpanExporter::default();
    let guard = init_telemetry_with_exporter(&config, exporter.clone()).unwrap();
    let spans = guard.telemetry().spans();
    let parent = spans.start(&Context::new(), Some("parent"));

    // 内存 exporter 会保留所有导出的 span，每批迭代前清空（不计入耗时）
    c.bench_function("SpanFactory::start", |b| {
        b.iter_batched(
            || exporter.reset(),
            |()| spans.start(black_box(&parent), Some("child")).end(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_id_conversion,
    bench_id_validation,
    bench_context_lookup,
    bench_span_start
);
criterion_main!(benches);
