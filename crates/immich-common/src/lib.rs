//! Immich Operator Common - 跨模块共享的工具与数据结构
//!
//! 该模块提供 Immich Operator 各组件共享的配置文档处理能力，
//! 包括无类型配置树的深度合并、空值裁剪以及统一的错误处理机制。

pub mod config;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
