//! SA Injector Operator - 为未初始化的工作负载注入 GCP 服务账号凭据
//!
//! 该模块实现了一个集群侧的初始化器：监听处于初始化阶段的 Pod 或 Deployment，
//! 当本组件位于初始化器队列队首时，将自己移出队列，挂载注解指定的 Secret，
//! 并设置 `GOOGLE_APPLICATION_CREDENTIALS`，最后以策略合并补丁写回。

pub mod config;
pub mod dispatcher;
pub mod event_source;
pub mod gate;
pub mod mutator;
pub mod patch;
pub mod resources;

use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::config::{InitializerConfig, WorkloadKind};
use crate::dispatcher::Dispatcher;
use crate::event_source::{uninitialized_client, KubeEventSource};
use crate::gate::InitializerGate;
use crate::mutator::Mutator;
use crate::patch::{KubePatcher, PatchEngine};
use crate::resources::{InitializingDeployment, InitializingPod, Workload};

/// Operator 主结构体
pub struct InitializerOperator {
    /// Kubernetes 客户端
    client: Client,
    /// 初始化器配置
    config: InitializerConfig,
}

impl InitializerOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: InitializerConfig) -> Result<Self> {
        // 先集群内、后 kubeconfig 推断连接配置
        let kube_config = kube::Config::infer()
            .await
            .context("推断 Kubernetes 连接配置失败")?;
        let client = uninitialized_client(kube_config).context("创建 Kubernetes 客户端失败")?;

        Ok(Self::with_client(client, config))
    }

    /// 使用已有客户端创建 Operator
    ///
    /// 客户端需带有 [`event_source::include_uninitialized_layer`]，否则看不到未初始化的对象。
    pub fn with_client(client: Client, config: InitializerConfig) -> Self {
        Self { client, config }
    }

    /// 启动 Operator，直到 `stop` 变为 true
    pub async fn run(&self, stop: watch::Receiver<bool>) -> Result<()> {
        match self.config.kind {
            WorkloadKind::Pod => self.run_kind::<InitializingPod>(stop).await,
            WorkloadKind::Deployment => self.run_kind::<InitializingDeployment>(stop).await,
        }
    }

    async fn run_kind<K: Workload>(&self, stop: watch::Receiver<bool>) -> Result<()> {
        let config = &self.config;
        info!(
            kind = K::LABEL,
            initializer = %config.initializer_name,
            annotation = %config.annotation,
            resync_secs = config.resync_period_secs,
            "启动初始化器"
        );

        let source = KubeEventSource::<K>::new(self.client.clone(), config.resync_period());

        let engine = PatchEngine::new(KubePatcher::<K>::new(self.client.clone(), &config.field_manager))
            .with_timeout(config.patch_timeout());

        let dispatcher = Arc::new(Dispatcher::new(
            InitializerGate::new(config.initializer_name.clone()),
            Mutator::new(config.annotation.clone(), config.secret_mount_root.clone()),
            engine,
        ));

        dispatcher
            .run(&source, stop)
            .await
            .with_context(|| format!("{} 初始化器运行失败", K::LABEL))
    }
}
