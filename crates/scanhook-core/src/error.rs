//! 桥接层错误类型
use crate::dispatch::EventKind;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// 调用方能力方法返回的错误（扫描结束后交还给调用方）
    #[error("scan callback failed: {0:#}")]
    Callback(anyhow::Error),

    #[error("scan callback panicked while handling {event}")]
    Panicked { event: EventKind },

    #[error("engine sent {event} without event data")]
    MissingEventData { event: EventKind },

    #[error("scan engine failed with status {code}")]
    Engine { code: i32 },

    /// 令牌未注册或已释放
    #[error("no callback registered for token {token:#x}")]
    Unroutable { token: usize },

    /// 回调对象已关闭，其导入缓冲区已释放
    #[error("callback bundle is closed")]
    Sealed,
}

/// 桥接层结果类型
pub type BridgeResult<T> = Result<T, BridgeError>;
