//! 高度图统一错误类型
//!
//! 只覆盖加载期与持久化期的可恢复错误；越界索引之类的调用方错误直接 panic。

/// 高度图统一错误
#[derive(thiserror::Error, Debug)]
pub enum HeightMapError {
    #[error("unsupported map format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid map dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    #[error("height buffer holds {actual} samples, expected {expected}")]
    HeightBufferSize { expected: usize, actual: usize },

    #[error("non-finite height sample at corner {index}")]
    NonFiniteHeight { index: usize },

    #[error("type map holds {actual} entries, expected {expected}")]
    TypeMapSize { expected: usize, actual: usize },

    #[error("save state mismatch: {0}")]
    StateMismatch(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl HeightMapError {
    pub fn state_mismatch<T: ToString>(msg: T) -> Self {
        HeightMapError::StateMismatch(msg.to_string())
    }
}

/// 高度图操作的结果类型
pub type HeightMapResult<T> = Result<T, HeightMapError>;
