//! Errors - エラー型と分類
//!
//! ユーザー向け操作（store / cancel / future publish）ではエラーを呼び出し元へ返し、
//! サービスループ内では tick 単位でログに出して次の tick に任せます。

use thiserror::Error;

/// ErrorKind は運用上の分類
///
/// - Validation: 入力が不正（ストア変更前に拒否）
/// - Persistence: ストアに到達できない、または操作失敗
/// - Transport: バスに到達できない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Persistence,
    Transport,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("schedule store failure: {0}")]
    Persistence(String),

    #[error("message bus failure: {0}")]
    Transport(String),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Validation(_) => ErrorKind::Validation,
            SchedulerError::Persistence(_) => ErrorKind::Persistence,
            SchedulerError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Transient failures are retried by the next service tick.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Persistence | ErrorKind::Transport)
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Validation(format!("json: {err}"))
    }
}
