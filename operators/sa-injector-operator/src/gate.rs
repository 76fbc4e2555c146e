//! 初始化闸门模块
//!
//! 只有当本组件位于对象初始化器队列队首时才允许处理该对象。

use sa_injector_common::is_next;

use crate::resources::Workload;

/// 初始化闸门
#[derive(Debug, Clone)]
pub struct InitializerGate {
    /// 本组件注册的初始化器名称
    name: String,
}

impl InitializerGate {
    /// 创建新的闸门
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// 初始化器名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 对象当前是否轮到本组件初始化
    pub fn admits<K: Workload>(&self, object: &K) -> bool {
        is_next(object.initializers(), &self.name)
    }
}
