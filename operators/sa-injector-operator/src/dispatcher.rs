//! 事件调度模块
//!
//! 从事件源读取对象快照，每个对象在独立的任务中依次经过
//! 闸门 → 变更 → 补丁。任务之间不共享可变状态，也不保证不同对象之间的顺序。

use futures::StreamExt;
use kube::ResourceExt;
use sa_injector_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::event_source::EventSource;
use crate::gate::InitializerGate;
use crate::mutator::Mutator;
use crate::patch::{PatchEngine, Patcher};
use crate::resources::Workload;

/// 单个对象的处理结果
#[derive(Debug)]
pub enum Outcome {
    /// 不是本组件处理的对象
    Skipped,
    /// 补丁已提交，`modified` 表示是否注入了凭据
    Initialized {
        /// 是否注入了凭据
        modified: bool,
    },
    /// 处理失败，对象保持事件发生前的状态
    Failed(Error),
}

/// 事件调度器
pub struct Dispatcher<K, P> {
    /// 初始化闸门
    gate: InitializerGate,
    /// 变更器
    mutator: Mutator,
    /// 补丁引擎
    engine: PatchEngine<K, P>,
}

impl<K: Workload, P: Patcher + 'static> Dispatcher<K, P> {
    /// 创建新的调度器
    pub fn new(gate: InitializerGate, mutator: Mutator, engine: PatchEngine<K, P>) -> Self {
        Self { gate, mutator, engine }
    }

    /// 处理一个对象快照
    pub async fn handle(&self, object: K) -> Outcome {
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_default();

        if !self.gate.admits(&object) {
            debug!(kind = K::LABEL, %namespace, %name, "跳过 {}/{}", K::LABEL, name);
            return Outcome::Skipped;
        }

        let mutation = self.mutator.mutate(&object);
        if !mutation.modified {
            info!(kind = K::LABEL, %namespace, %name, "{}/{} 未注入凭据", K::LABEL, name);
        }

        match self.engine.apply(&object, &mutation.object).await {
            Ok(_) => {
                info!(kind = K::LABEL, %namespace, %name, modified = mutation.modified, "已初始化 {}/{}", K::LABEL, name);
                Outcome::Initialized {
                    modified: mutation.modified,
                }
            }
            Err(e) => {
                error!(kind = K::LABEL, %namespace, %name, error = %e, "保存 {}/{} 失败", K::LABEL, name);
                Outcome::Failed(e)
            }
        }
    }

    /// 订阅事件源并持续调度，直到停止信号到来或事件流结束
    ///
    /// 只有初次订阅失败会返回错误。停止时不等待仍在进行的对象任务。
    pub async fn run<S>(self: Arc<Self>, source: &S, mut stop: watch::Receiver<bool>) -> Result<()>
    where
        S: EventSource<Object = K>,
    {
        let mut events = source.subscribe().await?;
        info!(kind = K::LABEL, initializer = self.gate.name(), "开始调度初始化事件");

        if *stop.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!(kind = K::LABEL, "收到停止信号，停止调度");
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(object)) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            dispatcher.handle(object).await;
                        });
                    }
                    Some(Err(e)) => warn!(kind = K::LABEL, error = %e, "事件源错误"),
                    None => {
                        warn!(kind = K::LABEL, "事件流已结束");
                        break;
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::EventStream;
    use crate::patch::MockPatcher;
    use crate::resources::InitializingPod;
    use async_trait::async_trait;
    use futures::stream;
    use sa_injector_common::{INITIALIZER_NAME, SECRET_MOUNT_ROOT, SERVICE_ACCOUNT_ANNOTATION};
    use serde_json::json;

    fn dispatcher(patcher: MockPatcher) -> Dispatcher<InitializingPod, MockPatcher> {
        Dispatcher::new(
            InitializerGate::new(INITIALIZER_NAME),
            Mutator::new(SERVICE_ACCOUNT_ANNOTATION, SECRET_MOUNT_ROOT),
            PatchEngine::new(patcher),
        )
    }

    fn pod(name: &str, pending: &[&str]) -> InitializingPod {
        let pending: Vec<_> = pending.iter().map(|n| json!({"name": n})).collect();
        serde_json::from_value(json!({
            "metadata": {
                "name": name,
                "annotations": {SERVICE_ACCOUNT_ANNOTATION: "sa-1"},
                "initializers": {"pending": pending}
            },
            "spec": {"containers": [{"name": "c1"}]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ineligible_object_is_never_patched() {
        let mut patcher = MockPatcher::new();
        patcher.expect_patch().never();

        let outcome = dispatcher(patcher).handle(pod("foo", &["a.b.c", INITIALIZER_NAME])).await;
        assert!(matches!(outcome, Outcome::Skipped));
    }

    #[tokio::test]
    async fn test_eligible_object_is_patched_once() {
        let mut patcher = MockPatcher::new();
        patcher.expect_patch().times(1).returning(|_, _, _| Ok(()));

        let outcome = dispatcher(patcher).handle(pod("foo", &[INITIALIZER_NAME])).await;
        assert!(matches!(outcome, Outcome::Initialized { modified: true }));
    }

    #[tokio::test]
    async fn test_rejection_is_per_object() {
        let mut patcher = MockPatcher::new();
        patcher.expect_patch().times(1).returning(|_, name, _| {
            Err(Error::PatchRejected {
                kind: "pod".to_string(),
                name: name.to_string(),
                source: "not found".into(),
            })
        });

        let outcome = dispatcher(patcher).handle(pod("foo", &[INITIALIZER_NAME])).await;
        assert!(matches!(outcome, Outcome::Failed(Error::PatchRejected { .. })));
    }

    struct FailingSource;

    #[async_trait]
    impl EventSource for FailingSource {
        type Object = InitializingPod;

        async fn subscribe(&self) -> Result<EventStream<InitializingPod>> {
            Err(Error::Watch("unauthorized".to_string()))
        }
    }

    #[tokio::test]
    async fn test_initial_subscription_failure_is_returned() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let result = Arc::new(dispatcher(MockPatcher::new())).run(&FailingSource, stop_rx).await;
        assert!(matches!(result, Err(Error::Watch(_))));
    }

    struct PendingSource;

    #[async_trait]
    impl EventSource for PendingSource {
        type Object = InitializingPod;

        async fn subscribe(&self) -> Result<EventStream<InitializingPod>> {
            Ok(stream::pending().boxed())
        }
    }

    #[tokio::test]
    async fn test_stop_signal_ends_run() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(Arc::new(dispatcher(MockPatcher::new())).run(&PendingSource, stop_rx));

        let _ = stop_tx.send(true);
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), run).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_dropped_stop_sender_ends_run() {
        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            Arc::new(dispatcher(MockPatcher::new())).run(&PendingSource, stop_rx),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
