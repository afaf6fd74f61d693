use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

/// Coarse error category reported through the last-error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Range,
    TypeMismatch,
    Memory,
    Internal,
    InvalidHandle,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("value out of range: {0}")]
    Range(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("allocation failed: {0}")]
    Memory(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("node handle {0} is not valid")]
    InvalidHandle(NodeId),
    #[error("property {0} is read-only")]
    ReadOnly(i32),
    #[error("connecting {from} to {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },
    #[error("automator at {time}s overlaps an existing automator")]
    OverlappingAutomators { time: f64 },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Range(_)
            | EngineError::ReadOnly(_)
            | EngineError::Cycle { .. }
            | EngineError::OverlappingAutomators { .. } => ErrorKind::Range,
            EngineError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            EngineError::Memory(_) => ErrorKind::Memory,
            EngineError::Internal(_) => ErrorKind::Internal,
            EngineError::InvalidHandle(_) => ErrorKind::InvalidHandle,
        }
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        EngineError::Range(message.into())
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        EngineError::TypeMismatch(message.into())
    }
}

impl From<sonora_rt::PoolError> for EngineError {
    fn from(err: sonora_rt::PoolError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
