//! SA Injector Common - 跨模块共享的数据结构与工具
//!
//! 该模块提供初始化器队列模型、凭据注入参数、统一错误类型，
//! 以及与集群客户端无关的策略合并补丁计算。

pub mod error;
pub mod models;
pub mod strategic;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::initializer::*;
pub use models::injection::*;
pub use strategic::{two_way_merge_patch, MergeSchema};
