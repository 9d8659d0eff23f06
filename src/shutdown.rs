//! 关闭协调
//!
//! 状态机：`Running -> ShuttingDown -> Stopped`。
//!
//! 触发条件是操作系统信号或服务器提前退出（例如监听失败）。触发后通过一次性
//! 通道通知服务器优雅关闭，在时限内没有完成就强制中止服务器任务，
//! 最后刷新并关闭 tracer provider。`run` 消费协调器，保证关闭流程只执行一次。

use crate::telemetry::{TelemetryError, TelemetryGuard};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::ExitCode;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// 协调器所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
    Stopped,
}

/// 触发关闭的原因
#[derive(Debug)]
pub enum ShutdownTrigger {
    /// 收到操作系统信号
    Signal(&'static str),
    /// 服务器带错误退出
    ServerError(io::Error),
    /// 服务器在没有收到关闭通知时正常退出
    ServerExited,
}

/// 关闭流程的结果
#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    /// 服务器是否在时限内完成了优雅关闭
    pub graceful: bool,
    /// tracer provider 的关闭结果
    pub telemetry: Result<(), TelemetryError>,
}

impl ShutdownReport {
    /// 由信号触发、优雅关闭且 span 全部刷新时才算干净退出
    pub fn is_clean(&self) -> bool {
        matches!(self.trigger, ShutdownTrigger::Signal(_)) && self.graceful && self.telemetry.is_ok()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_clean() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

/// 交给服务器的关闭通知，完成即表示应开始优雅关闭
#[derive(Debug)]
pub struct ShutdownSignal(oneshot::Receiver<()>);

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // 发送端被丢弃同样视为关闭通知
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

/// 关闭协调器
#[derive(Debug)]
pub struct ShutdownCoordinator {
    grace_period: Duration,
    phase: watch::Sender<Phase>,
}

impl ShutdownCoordinator {
    /// 创建协调器
    ///
    /// `grace_period` 同时约束服务器优雅关闭和 provider 刷新
    pub fn new(grace_period: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            grace_period,
            phase,
        }
    }

    /// 订阅阶段变化
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// 运行服务器直到触发关闭，然后完成整个关闭流程
    ///
    /// # 参数
    /// * `serve` - 接收关闭通知并返回服务器 future，例如
    ///   `|signal| axum::serve(listener, app).with_graceful_shutdown(signal).into_future()`
    /// * `trigger` - 外部触发源，生产环境使用 [`os_signal`]
    /// * `telemetry` - 服务器停止后关闭的追踪子系统
    pub async fn run<S, Fut, T>(self, serve: S, trigger: T, telemetry: TelemetryGuard) -> ShutdownReport
    where
        S: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
        T: Future<Output = ShutdownTrigger>,
    {
        let (notify, signal) = oneshot::channel();
        let mut server = tokio::spawn(serve(ShutdownSignal(signal)));
        tokio::pin!(trigger);

        let (trigger, server_finished) = tokio::select! {
            trigger = &mut trigger => (trigger, false),
            joined = &mut server => {
                let trigger = match joined {
                    Ok(Ok(())) => ShutdownTrigger::ServerExited,
                    Ok(Err(err)) => ShutdownTrigger::ServerError(err),
                    Err(err) => ShutdownTrigger::ServerError(io::Error::other(err)),
                };
                (trigger, true)
            }
        };

        self.phase.send_replace(Phase::ShuttingDown);
        match &trigger {
            ShutdownTrigger::Signal(name) => tracing::warn!(signal = *name, "received shutdown signal"),
            ShutdownTrigger::ServerError(err) => tracing::warn!(error = %err, "http server failed"),
            ShutdownTrigger::ServerExited => tracing::warn!("http server exited unexpectedly"),
        }

        let graceful = if server_finished {
            true
        } else {
            let _ = notify.send(());
            match tokio::time::timeout(self.grace_period, &mut server).await {
                Ok(Ok(Ok(()))) => {
                    tracing::info!("http server shut down gracefully");
                    true
                }
                Ok(Ok(Err(err))) => {
                    tracing::error!(error = %err, "http server failed while shutting down");
                    false
                }
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "http server task failed while shutting down");
                    false
                }
                Err(_) => {
                    tracing::error!(
                        grace_period = ?self.grace_period,
                        "graceful shutdown timed out, closing server"
                    );
                    server.abort();
                    false
                }
            }
        };

        let telemetry = telemetry.shutdown_within(self.grace_period).await;
        if let Err(err) = &telemetry {
            tracing::error!(error = %err, "failed to flush spans");
        }

        self.phase.send_replace(Phase::Stopped);
        ShutdownReport {
            trigger,
            graceful,
            telemetry,
        }
    }
}

/// 等待 SIGINT（Ctrl-C）或 SIGTERM
pub async fn os_signal() -> ShutdownTrigger {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownTrigger::Signal("SIGINT"),
        _ = terminate => ShutdownTrigger::Signal("SIGTERM"),
    }
}
