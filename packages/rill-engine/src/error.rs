//! Error types for the engine.

use crate::ids::Token;
use crate::value::Value;

/// Errors surfaced by pull programs and by the engine itself.
///
/// User errors raised via `raise_error` carry an arbitrary `Value` payload;
/// everything else is an engine-level failure. Multiple failures collected
/// during scope close compose into `Composite`, preserving order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    Raised {
        value: Box<Value>,
    },
    Internal {
        message: String,
    },
    OpenOnClosedScope {
        token: Token,
    },
    AcquireAfterScopeClose {
        token: Token,
    },
    LeaseAfterScopeClose {
        token: Token,
    },
    RootScopeClose,
    ScopeNotFound {
        token: Token,
    },
    Composite {
        errors: Vec<StreamError>,
    },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Raised { value } => write!(f, "raised: {:?}", value),
            StreamError::Internal { message } => write!(f, "internal error: {}", message),
            StreamError::OpenOnClosedScope { token } => {
                write!(f, "cannot open child of closed scope {}", token.raw())
            }
            StreamError::AcquireAfterScopeClose { token } => {
                write!(f, "cannot acquire resource on closed scope {}", token.raw())
            }
            StreamError::LeaseAfterScopeClose { token } => {
                write!(f, "cannot lease closed scope {}", token.raw())
            }
            StreamError::RootScopeClose => write!(f, "cannot close the root scope"),
            StreamError::ScopeNotFound { token } => {
                write!(f, "scope {} not found", token.raw())
            }
            StreamError::Composite { errors } => {
                write!(f, "composite failure ({} errors):", errors.len())?;
                for err in errors {
                    write!(f, " [{}]", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    pub fn raised(value: impl Into<Value>) -> Self {
        StreamError::Raised {
            value: Box::new(value.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StreamError::Internal {
            message: message.into(),
        }
    }

    pub fn open_on_closed_scope(token: Token) -> Self {
        StreamError::OpenOnClosedScope { token }
    }

    pub fn acquire_after_scope_close(token: Token) -> Self {
        StreamError::AcquireAfterScopeClose { token }
    }

    pub fn lease_after_scope_close(token: Token) -> Self {
        StreamError::LeaseAfterScopeClose { token }
    }

    pub fn scope_not_found(token: Token) -> Self {
        StreamError::ScopeNotFound { token }
    }

    /// Collapse a list of failures: none stays none, one is reported as-is,
    /// several become a `Composite` preserving order.
    pub fn from_list(mut errors: Vec<StreamError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(StreamError::Composite { errors }),
        }
    }

    /// Compose two failures into one, preserving order.
    pub fn compose(first: StreamError, second: StreamError) -> Self {
        let mut errors = Vec::new();
        match first {
            StreamError::Composite { errors: inner } => errors.extend(inner),
            other => errors.push(other),
        }
        match second {
            StreamError::Composite { errors: inner } => errors.extend(inner),
            other => errors.push(other),
        }
        StreamError::Composite { errors }
    }

    /// Compose two optional failures.
    pub fn combine(first: Option<StreamError>, second: Option<StreamError>) -> Option<StreamError> {
        match (first, second) {
            (None, None) => None,
            (Some(e), None) | (None, Some(e)) => Some(e),
            (Some(a), Some(b)) => Some(StreamError::compose(a, b)),
        }
    }
}
