//! 补丁引擎模块
//!
//! 将原始对象与变更后对象序列化为 JSON，计算两路策略合并补丁，
//! 并以一次请求提交给 API（按命名空间 + 名称寻址）。
//! 补丁不携带 resourceVersion 前置条件：按键合并可以避免覆盖无关字段的并发修改，
//! 但同一字段上的并发修改仍可能竞争。

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use sa_injector_common::{two_way_merge_patch, Error, MergeSchema, Result, DEFAULT_NAMESPACE};
use serde_json::Value;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::resources::Workload;

/// 补丁提交接口
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Patcher: Send + Sync {
    /// 以策略合并补丁更新指定对象
    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<()>;
}

/// 基于 kube 客户端的补丁提交器
pub struct KubePatcher<K> {
    /// Kubernetes 客户端
    client: Client,
    /// 补丁参数
    params: PatchParams,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubePatcher<K> {
    /// 创建新的补丁提交器，`field_manager` 标识本组件
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            params: PatchParams {
                field_manager: Some(field_manager.to_string()),
                ..Default::default()
            },
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: Workload> Patcher for KubePatcher<K> {
    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &self.params, &Patch::Strategic(patch))
            .await
            .map_err(|e| Error::PatchRejected {
                kind: K::LABEL.to_string(),
                name: name.to_string(),
                source: Box::new(e),
            })?;
        Ok(())
    }
}

/// 补丁引擎
pub struct PatchEngine<K, P> {
    /// 补丁提交器
    patcher: P,
    /// 列表合并键
    schema: MergeSchema,
    /// 单次提交的超时时间
    timeout: Option<Duration>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Workload, P: Patcher> PatchEngine<K, P> {
    /// 创建新的补丁引擎
    pub fn new(patcher: P) -> Self {
        Self {
            patcher,
            schema: K::merge_schema(),
            timeout: None,
            _kind: PhantomData,
        }
    }

    /// 为补丁提交设置超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 计算原始对象到变更后对象的补丁
    pub fn diff(&self, original: &K, modified: &K) -> Result<Value> {
        let original = serde_json::to_value(original)?;
        let modified = serde_json::to_value(modified)?;
        two_way_merge_patch(&original, &modified, &self.schema)
    }

    /// 计算并提交补丁，返回已提交的补丁内容
    ///
    /// 序列化、差异计算和 API 拒绝都以单个错误返回，不做重试。
    pub async fn apply(&self, original: &K, modified: &K) -> Result<Value> {
        let patch = self.diff(original, modified)?;
        let name = original.name_any();
        let namespace = original.namespace().unwrap_or_else(|| DEFAULT_NAMESPACE.into());

        debug!(kind = K::LABEL, %namespace, %name, %patch, "提交策略合并补丁");

        let submit = self.patcher.patch(&namespace, &name, &patch);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, submit)
                .await
                .map_err(|_| Error::Timeout {
                    kind: K::LABEL.to_string(),
                    name: name.clone(),
                    secs: timeout.as_secs(),
                })??,
            None => submit.await?,
        }

        Ok(patch)
    }
}
