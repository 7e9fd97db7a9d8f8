//! Error types for KyroConf.
//!
//! All resolution errors are strongly typed using thiserror. They are also
//! serializable: the service facade never throws past its boundary, it
//! returns errors inside the response so the caller can surface them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`ResolutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownChoice,
    InvalidDecision,
    TypeMismatch,
    InvalidRange,
    InconsistentKnowledgeBase,
    UnknownSession,
    QueueFull,
    Internal,
}

/// Errors raised while resolving a decision.
///
/// Every variant is recoverable at the request boundary: the pipeline aborts
/// and the session keeps its previous knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    /// The decision references a choice that is not currently open.
    #[error("Unknown choice: {choice}")]
    UnknownChoice {
        choice: String,
    },

    /// The decision is well-formed but cannot be applied.
    #[error("Invalid decision: {reason}")]
    InvalidDecision {
        reason: String,
    },

    #[error("Type mismatch: {left} is not comparable with {right}")]
    TypeMismatch {
        left: String,
        right: String,
    },

    #[error("Invalid range for feature '{feature}': {reason}")]
    InvalidRange {
        feature: String,
        reason: String,
    },

    /// Cycle or dangling reference in the knowledge base.
    #[error("Inconsistent knowledge base: {reason}")]
    InconsistentKnowledgeBase {
        reason: String,
    },

    #[error("Unknown session: {session_id}")]
    UnknownSession {
        session_id: String,
    },

    #[error("Resolution queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ResolutionError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an `InconsistentKnowledgeBase` error.
    #[must_use]
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::InconsistentKnowledgeBase {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidDecision` error.
    #[must_use]
    pub fn invalid_decision(reason: impl Into<String>) -> Self {
        Self::InvalidDecision {
            reason: reason.into(),
        }
    }

    /// Creates an `UnknownChoice` error.
    #[must_use]
    pub fn unknown_choice(choice: impl Into<String>) -> Self {
        Self::UnknownChoice {
            choice: choice.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownChoice { .. } => ErrorKind::UnknownChoice,
            Self::InvalidDecision { .. } => ErrorKind::InvalidDecision,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::InconsistentKnowledgeBase { .. } => ErrorKind::InconsistentKnowledgeBase,
            Self::UnknownSession { .. } => ErrorKind::UnknownSession,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the error was caused by the client's request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownChoice { .. } | Self::InvalidDecision { .. } | Self::UnknownSession { .. }
        )
    }

    /// Returns true if the error points at corrupt knowledge base data.
    #[must_use]
    pub const fn is_knowledge_base_defect(&self) -> bool {
        matches!(
            self,
            Self::InconsistentKnowledgeBase { .. } | Self::InvalidRange { .. } | Self::TypeMismatch { .. }
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

/// Result type alias for resolution operations.
pub type ResolutionResult<T> = Result<T, ResolutionError>;
