//! 引擎统一错误处理
//!
//! 错误只在引擎内部流转：公共命令入口永远不抛错，
//! 所有失败最多被记录日志后吞掉（见 `engine` 模块）。

use thiserror::Error;

use crate::provider::ProviderError;

/// 引擎错误类型
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// 语言信号不足，本轮翻译放弃（不是面向用户的错误）
    #[error("语言信号不足，放弃本轮翻译")]
    InsufficientLanguageSignal,

    /// 速率受限，单元跳过，等待下一轮
    #[error("请求速率受限")]
    RateLimited,

    /// 翻译服务调用失败
    #[error("翻译服务错误: {0}")]
    Provider(#[from] ProviderError),
}

impl EngineError {
    /// 该错误是否应该终止整个翻译轮次
    ///
    /// 只有语言信号不足会放弃本轮；其余错误都按单元粒度处理，
    /// 失败的单元不进缓存，下一轮自然重试。
    pub fn aborts_pass(&self) -> bool {
        matches!(self, EngineError::InsufficientLanguageSignal)
    }
}

/// 错误结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;
