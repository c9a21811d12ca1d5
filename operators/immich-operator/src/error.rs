//! 错误处理模块
//!
//! 该模块提供 Immich Operator 的统一错误类型。校验错误在协调开始前
//! 聚合上报；各组件的协调错误逐个收集，互不阻塞。

use thiserror::Error;

/// Operator 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// 配置文档处理错误
    #[error("配置文档处理错误: {0}")]
    Config(#[from] immich_common::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 资源规约校验失败，消息中聚合了所有问题
    #[error("校验失败: {0}")]
    Validation(String),

    /// 启用的组件既未在 spec 中配置镜像，也没有默认镜像
    #[error("组件 {0} 缺少镜像配置")]
    MissingImage(&'static str),

    /// 对象缺少必需的元数据字段
    #[error("对象缺少元数据字段: {0}")]
    MissingObjectKey(&'static str),
}

/// Operator 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
