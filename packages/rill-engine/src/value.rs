//! Value types that flow through the engine.
//!
//! A single dynamic value type serves both the outputs emitted in chunks and
//! the carry threaded through binds.

use std::any::Any;
use std::sync::Arc;

use crate::algebra::PullStep;
use crate::error::StreamError;
use crate::scope::Scope;

/// Opaque payload handle for values owned by callers (lease handles,
/// resource tokens and the like).
pub type Handle = Arc<dyn Any + Send + Sync>;

/// A value that can flow through the engine.
///
/// Native variants cover the common cases; `Handle` carries arbitrary caller
/// payloads; the remaining variants are produced by engine operations
/// (`Scope` by get-scope, `Step` by uncons/step-leg, `Error` by attempt).
#[derive(Clone)]
pub enum Value {
    Unit,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Error(StreamError),
    Scope(Scope),
    Step(Option<Box<PullStep>>),
    Handle(Handle),
}

impl Value {
    /// Check if this is a None/Unit value.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None | Value::Unit)
    }

    /// Try to get as i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as an error payload.
    pub fn as_error(&self) -> Option<&StreamError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Try to get as a scope handle.
    pub fn as_scope(&self) -> Option<&Scope> {
        match self {
            Value::Scope(s) => Some(s),
            _ => None,
        }
    }

    /// Try to take as a step cursor.
    pub fn into_step(self) -> Option<Option<Box<PullStep>>> {
        match self {
            Value::Step(step) => Some(step),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Value::Scope(s) => write!(f, "Scope({})", s.token().raw()),
            Value::Step(Some(step)) => {
                write!(f, "Step(chunk.len={})", step.chunk.len())
            }
            Value::Step(None) => write!(f, "Step(None)"),
            Value::Handle(_) => write!(f, "Handle(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Scope(a), Value::Scope(b)) => a.token() == b.token(),
            (Value::Step(None), Value::Step(None)) => true,
            (Value::Handle(a), Value::Handle(b)) => Arc::ptr_eq(a, b),
            // step cursors with tails have no structural equality
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}
