//! 错误处理模块
//!
//! 该模块提供 SA Injector 的统一错误类型。协调流水线中的每一类失败
//! （序列化、差异计算、API 拒绝、超时、监听）都对应一个变体，
//! 错误只影响当前对象，不会中断其他对象的处理。

use std::error::Error as StdError;
use thiserror::Error;

/// 装箱的底层错误，用于在不依赖具体客户端库的情况下保留错误来源
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// SA Injector 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 对象序列化失败
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 无法计算两路合并补丁
    #[error("补丁计算错误: {0}")]
    Diff(String),

    /// API 拒绝了补丁（冲突、校验失败、对象不存在等）
    #[error("API 拒绝补丁 {kind}/{name}: {source}")]
    PatchRejected {
        /// 资源类型
        kind: String,
        /// 资源名称
        name: String,
        /// 底层错误
        #[source]
        source: BoxError,
    },

    /// 补丁提交超时
    #[error("提交补丁 {kind}/{name} 超时 ({secs} 秒)")]
    Timeout {
        /// 资源类型
        kind: String,
        /// 资源名称
        name: String,
        /// 超时时长（秒）
        secs: u64,
    },

    /// 列举/监听失败
    #[error("监听错误: {0}")]
    Watch(String),
}

/// SA Injector 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 从字符串创建错误
pub trait IntoError<T> {
    /// 将当前类型转换为错误
    fn into_error(self, kind: fn(String) -> Error) -> Result<T>;
}

impl<T> IntoError<T> for String {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self))
    }
}

impl<T> IntoError<T> for &str {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_error() {
        let result: Result<()> = "initializer name is empty".into_error(Error::Config);
        assert!(matches!(result, Err(Error::Config(msg)) if msg == "initializer name is empty"));
    }

    #[test]
    fn test_patch_rejected_keeps_source() {
        let source: BoxError = "conflict".into();
        let err = Error::PatchRejected {
            kind: "pod".to_string(),
            name: "foo".to_string(),
            source,
        };
        assert!(err.to_string().contains("pod/foo"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("conflict"));
    }
}
