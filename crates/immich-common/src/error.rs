//! 错误处理模块
//!
//! 该模块提供共享工具的统一错误处理机制，包括自定义错误类型
//! 和错误转换，便于调试和日志记录。

use thiserror::Error;

/// 配置文档处理的统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// YAML 序列化/反序列化错误
    #[error("YAML 序列化错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置文档结构错误
    #[error("配置文档错误: {0}")]
    Document(String),
}

/// 共享工具的结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
