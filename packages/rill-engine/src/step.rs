//! Terminal results, effect outcomes and exit cases.

use crate::error::StreamError;
use crate::ids::Token;
use crate::value::Value;

/// The cause handed to finalizers when a scope closes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitCase {
    Succeeded,
    Errored(StreamError),
    Canceled,
}

/// An interruption rooted at a specific scope.
///
/// `origin` identifies the scope where the interruption originated;
/// propagation stops once the interpreter resumes outside of it. Errors
/// observed while unwinding ride along in `deferred` and are surfaced when
/// the interruption is absorbed.
#[derive(Debug, Clone, PartialEq)]
pub struct Interruption {
    pub origin: Token,
    pub deferred: Option<StreamError>,
}

impl Interruption {
    pub fn new(origin: Token) -> Self {
        Interruption {
            origin,
            deferred: None,
        }
    }

    pub fn with_deferred(origin: Token, deferred: Option<StreamError>) -> Self {
        Interruption { origin, deferred }
    }
}

/// Terminal result of a pull.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Done(Value),
    Fail(StreamError),
    Interrupted(Interruption),
}

impl Terminal {
    pub fn unit() -> Self {
        Terminal::Done(Value::Unit)
    }

    pub fn from_result(result: Result<Value, StreamError>) -> Self {
        match result {
            Ok(value) => Terminal::Done(value),
            Err(err) => Terminal::Fail(err),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Terminal::Done(_))
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Terminal::Fail(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Terminal::Interrupted(_))
    }
}

/// Why a scope is interrupted.
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptCause {
    /// The interruption signal fired; carries the originating scope's token.
    Interrupted(Token),
    /// The interruption signal itself failed.
    Errored(StreamError),
}

impl InterruptCause {
    /// The terminal an interpreter step produces when it observes this cause.
    pub fn to_terminal(&self) -> Terminal {
        match self {
            InterruptCause::Interrupted(origin) => {
                Terminal::Interrupted(Interruption::new(*origin))
            }
            InterruptCause::Errored(err) => Terminal::Fail(err.clone()),
        }
    }
}

/// Outcome of running an effect or acquiring a resource under a scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(Value),
    Errored(StreamError),
    Canceled(Interruption),
}

impl Outcome {
    pub fn to_terminal(self) -> Terminal {
        match self {
            Outcome::Succeeded(value) => Terminal::Done(value),
            Outcome::Errored(err) => Terminal::Fail(err),
            Outcome::Canceled(interruption) => Terminal::Interrupted(interruption),
        }
    }
}
