//! SA Injector - 入口程序

use anyhow::{Context, Result};
use clap::Parser;
use sa_injector_operator::config::Cli;
use sa_injector_operator::InitializerOperator;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("加载配置失败")?;

    // RUST_LOG 优先于配置中的日志级别
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("无效的日志级别")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        kind = ?config.kind,
        initializer = %config.initializer_name,
        "启动 SA Injector"
    );

    let operator = InitializerOperator::new(config).await?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut run = tokio::spawn(async move { operator.run(stop_rx).await });

    tokio::select! {
        result = &mut run => {
            return result.context("初始化器任务异常退出")?;
        }
        reason = shutdown_signal() => {
            info!(signal = reason, "收到退出信号，正在停止");
        }
    }

    let _ = stop_tx.send(true);
    match run.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "初始化器任务异常退出"),
    }

    info!("SA Injector 已停止");
    Ok(())
}

/// 等待 SIGINT 或 SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("注册 ctrl-c 处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("注册 SIGTERM 处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = term => "SIGTERM",
    }
}
