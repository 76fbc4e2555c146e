//! 数据模型模块

pub mod initializer;
pub mod injection;
