//! 工作负载资源模块
//!
//! 集群当前的 `ObjectMeta` 已不再携带 `initializers` 字段，因此这里定义了
//! 自己的 Pod 和 Deployment 包装类型：元数据在标准 `ObjectMeta` 之外额外
//! 解析 `initializers`，规格部分直接复用 k8s-openapi 的类型。
//! 两种资源通过 [`Workload`] trait 向闸门、变更器和补丁引擎暴露统一接口。

use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use sa_injector_common::{Initializers, MergeSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Debug;

/// 带初始化器队列的对象元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializableMeta {
    /// 标准元数据
    #[serde(flatten)]
    pub object: ObjectMeta,

    /// 初始化器队列
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializers: Option<Initializers>,
}

/// 可被本初始化器处理的工作负载
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// 日志中使用的资源名
    const LABEL: &'static str;

    /// 计算补丁时使用的列表合并键
    fn merge_schema() -> MergeSchema;

    /// 初始化器队列
    fn initializers(&self) -> Option<&Initializers>;

    /// 可修改的初始化器队列
    fn initializers_mut(&mut self) -> &mut Option<Initializers>;

    /// 注入目标 PodSpec
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec>;

    /// 读取注解值
    fn annotation(&self, key: &str) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }
}

/// 尚未完成初始化的 Pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializingPod {
    /// 元数据
    pub metadata: InitializableMeta,

    /// Pod 规格
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,

    /// Pod 状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

impl Resource for InitializingPod {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "Pod".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "pods".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata.object
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata.object
    }
}

impl Workload for InitializingPod {
    const LABEL: &'static str = "pod";

    fn merge_schema() -> MergeSchema {
        MergeSchema::pod()
    }

    fn initializers(&self) -> Option<&Initializers> {
        self.metadata.initializers.as_ref()
    }

    fn initializers_mut(&mut self) -> &mut Option<Initializers> {
        &mut self.metadata.initializers
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut()
    }
}

/// 尚未完成初始化的 Deployment，注入目标是其 Pod 模板
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializingDeployment {
    /// 元数据
    pub metadata: InitializableMeta,

    /// Deployment 规格
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<DeploymentSpec>,

    /// Deployment 状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl Resource for InitializingDeployment {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "Deployment".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "apps".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "deployments".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata.object
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata.object
    }
}

impl Workload for InitializingDeployment {
    const LABEL: &'static str = "deployment";

    fn merge_schema() -> MergeSchema {
        MergeSchema::deployment()
    }

    fn initializers(&self) -> Option<&Initializers> {
        self.metadata.initializers.as_ref()
    }

    fn initializers_mut(&mut self) -> &mut Option<Initializers> {
        &mut self.metadata.initializers
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|spec| spec.template.spec.as_mut())
    }
}
