//! 进程配置
//!
//! 从环境变量读取监听端口、关闭超时和追踪子系统参数。
//!
//! | 变量 | 默认值 |
//! |------|--------|
//! | `PORT` | `8080` |
//! | `SHUTDOWN_TIMEOUT_SECS` | `5` |
//! | `OTEL_SERVICE_NAME` | `product-service` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` |
//! | `OTEL_BSP_MAX_QUEUE_SIZE` | `2048` |
//! | `OTEL_BSP_MAX_EXPORT_BATCH_SIZE` | `512` |
//! | `OTEL_BSP_SCHEDULE_DELAY` | `5000`（毫秒） |

use crate::telemetry::TelemetryConfig;
use std::str::FromStr;
use std::time::Duration;

/// 配置读取错误，属于启动期致命错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// 服务整体配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// HTTP 监听端口
    pub port: u16,
    /// 优雅关闭的时间上限
    pub shutdown_timeout: Duration,
    pub telemetry: TelemetryConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            shutdown_timeout: Duration::from_secs(5),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// 从进程环境变量读取配置
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取配置，未设置的键使用默认值
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHUTDOWN_TIMEOUT_SECS")? {
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        let telemetry = &mut config.telemetry;
        if let Some(name) = non_empty(&lookup, "OTEL_SERVICE_NAME") {
            telemetry.service_name = name;
        }
        if let Some(endpoint) = non_empty(&lookup, "OTEL_EXPORTER_OTLP_ENDPOINT") {
            telemetry.otlp_endpoint = endpoint;
        }
        if let Some(size) = parse_var(&lookup, "OTEL_BSP_MAX_QUEUE_SIZE")? {
            telemetry.batch.max_queue_size = size;
        }
        if let Some(size) = parse_var(&lookup, "OTEL_BSP_MAX_EXPORT_BATCH_SIZE")? {
            telemetry.batch.max_export_batch_size = size;
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, "OTEL_BSP_SCHEDULE_DELAY")? {
            telemetry.batch.scheduled_delay = Duration::from_millis(millis);
        }

        if telemetry.batch.max_export_batch_size > telemetry.batch.max_queue_size {
            return Err(ConfigError::Invalid {
                key: "OTEL_BSP_MAX_EXPORT_BATCH_SIZE",
                value: telemetry.batch.max_export_batch_size.to_string(),
                reason: "must not exceed OTEL_BSP_MAX_QUEUE_SIZE".to_string(),
            });
        }

        Ok(config)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = non_empty(lookup, key) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        })
}
