//! 初始化器队列模型
//!
//! 对象元数据中的 `initializers.pending` 是一个有序队列，只有队首的初始化器
//! 可以处理对象，处理完成后只移除自己的那一项。空队列用 `None` 表示，
//! `None` 与空列表都视为"已完成初始化"。

use serde::{Deserialize, Serialize};

/// 单个待处理的初始化器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initializer {
    /// 初始化器名称
    pub name: String,
}

impl Initializer {
    /// 创建新的初始化器条目
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// 对象元数据中的初始化器信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initializers {
    /// 待处理的初始化器队列
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<Vec<Initializer>>,

    /// 初始化失败时由集群写入的结果
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Initializers {
    /// 由名称列表构造队列
    pub fn pending<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: Some(names.into_iter().map(Initializer::new).collect()),
            result: None,
        }
    }

    /// 队首初始化器名称
    pub fn head(&self) -> Option<&str> {
        self.pending
            .as_deref()
            .and_then(|pending| pending.first())
            .map(|i| i.name.as_str())
    }
}

/// 判断 `name` 是否位于队首
pub fn is_next(initializers: Option<&Initializers>, name: &str) -> bool {
    initializers.and_then(Initializers::head) == Some(name)
}

/// 移除队首条目
///
/// 只剩一个条目时整个 `initializers` 变为 `None`；若集群已写入 `result`，
/// 则保留 `result`，只把队列置为 `None`。多于一个时保持其余条目的相对顺序。
/// 队列缺失或为空时不做任何修改。
pub fn pop_pending(initializers: &mut Option<Initializers>) {
    let Some(current) = initializers.as_mut() else {
        return;
    };

    match current.pending.as_ref().map_or(0, Vec::len) {
        0 => {}
        1 if current.result.is_none() => *initializers = None,
        1 => current.pending = None,
        _ => {
            if let Some(pending) = current.pending.as_mut() {
                pending.remove(0);
            }
        }
    }
}
