//! 统一异常处理模块
//!
//! 消息核心的错误分类。所有失败都会向调用方暴露，
//! 订阅路径上的错误通过 `on_error` 回调送达，绝不静默吞掉。

use thiserror::Error;

use crate::domain::model::MessageStatus;

/// 消息核心错误类型
#[derive(Debug, Error)]
pub enum ChatError {
    /// 入参校验失败（空白内容、非法标识、非法表情键等）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 目标不存在（如对已删除消息进行操作）
    #[error("Not found: {0}")]
    NotFound(String),

    /// 消息状态机拒绝回退迁移
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// 当前状态
        from: MessageStatus,
        /// 期望写入的状态
        to: MessageStatus,
    },

    /// 附件上传失败
    #[error("Upload error: {0}")]
    Upload(String),

    /// 实时存储瞬态故障（由调用方决定是否重试，核心不做重试）
    #[error("Store error: {0}")]
    Store(String),

    /// 存储载荷编解码失败（损坏的消息记录等）
    #[error("Payload codec error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ChatError {
    /// 构造校验错误
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    /// 构造目标不存在错误
    pub fn not_found(msg: impl Into<String>) -> Self {
        ChatError::NotFound(msg.into())
    }

    /// 构造存储错误
    pub fn store(msg: impl Into<String>) -> Self {
        ChatError::Store(msg.into())
    }

    /// 构造上传错误
    pub fn upload(msg: impl Into<String>) -> Self {
        ChatError::Upload(msg.into())
    }

    /// 是否为校验类错误
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }

    /// 是否为目标不存在错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::NotFound(_))
    }
}

/// 消息核心结果类型
pub type Result<T, E = ChatError> = std::result::Result<T, E>;
