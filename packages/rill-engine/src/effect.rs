//! The ambient effect interface: effect thunks, cooperative interruption
//! gates, and effect translations.
//!
//! The engine does not schedule anything itself. Effects are opaque thunks
//! supplied by callers; the only structure the interpreter relies on is that
//! a thunk can be run to a `Result` and that it receives a [`Gate`] through
//! which a blocking effect can observe interruption of its scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::error::StreamError;
use crate::value::Value;

/// Shared state for a gate.
#[derive(Debug)]
struct GateState {
    shut: AtomicBool,
    lock: Mutex<bool>,
    cond: Condvar,
}

impl GateState {
    fn new() -> Self {
        GateState {
            shut: AtomicBool::new(false),
            lock: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

/// A gate that never shuts, handed to effects running outside any
/// interruptible scope (the uncancellable mask).
static OPEN_GATE: Lazy<Gate> = Lazy::new(|| Gate {
    state: Arc::new(GateState::new()),
});

/// Read-only view of an interruption signal.
///
/// A gate starts open and shuts at most once. Effects poll `is_shut` at
/// convenient points, or park on `wait_shut` when they have nothing to do
/// until interruption.
#[derive(Debug, Clone)]
pub struct Gate {
    state: Arc<GateState>,
}

impl Gate {
    /// A gate that is never shut.
    pub fn open() -> Gate {
        OPEN_GATE.clone()
    }

    pub fn is_shut(&self) -> bool {
        self.state.shut.load(Ordering::SeqCst)
    }

    /// Block until the gate shuts.
    pub fn wait_shut(&self) {
        if self.is_shut() {
            return;
        }
        let mut guard = self.state.lock.lock();
        while !*guard && !self.is_shut() {
            self.state.cond.wait(&mut guard);
        }
    }

    /// Block until the gate shuts or the timeout expires. Returns true if
    /// the gate is shut.
    pub fn wait_shut_for(&self, timeout: Duration) -> bool {
        if self.is_shut() {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.state.lock.lock();
        while !*guard && !self.is_shut() {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            self.state.cond.wait_for(&mut guard, deadline - now);
        }
        self.is_shut()
    }
}

/// Owner side of a gate.
#[derive(Debug, Clone)]
pub struct GateSource {
    gate: Gate,
}

impl GateSource {
    pub fn new() -> Self {
        GateSource {
            gate: Gate {
                state: Arc::new(GateState::new()),
            },
        }
    }

    pub fn gate(&self) -> Gate {
        self.gate.clone()
    }

    pub fn is_shut(&self) -> bool {
        self.gate.is_shut()
    }

    /// Shut the gate and wake all waiters.
    pub fn shut(&self) {
        self.gate.state.shut.store(true, Ordering::SeqCst);
        let mut guard = self.gate.state.lock.lock();
        *guard = true;
        self.gate.state.cond.notify_all();
    }
}

impl Default for GateSource {
    fn default() -> Self {
        Self::new()
    }
}

type ThunkFn = dyn Fn(&Gate) -> Result<Value, StreamError> + Send + Sync;

/// An effectful value in the (erased) ambient effect.
///
/// Running a thunk may block; a well-behaved long-running thunk watches the
/// gate it is given and returns promptly once the gate shuts. The value
/// returned after interruption is discarded by the interpreter.
#[derive(Clone)]
pub struct Thunk {
    run: Arc<ThunkFn>,
}

impl Thunk {
    pub fn new(
        f: impl Fn(&Gate) -> Result<Value, StreamError> + Send + Sync + 'static,
    ) -> Self {
        Thunk { run: Arc::new(f) }
    }

    /// An effect that ignores the gate.
    pub fn from_fn(
        f: impl Fn() -> Result<Value, StreamError> + Send + Sync + 'static,
    ) -> Self {
        Thunk::new(move |_| f())
    }

    /// A pure effect.
    pub fn of(value: impl Into<Value>) -> Self {
        let value = value.into();
        Thunk::new(move |_| Ok(value.clone()))
    }

    /// An effect that always fails.
    pub fn fail(err: StreamError) -> Self {
        Thunk::new(move |_| Err(err.clone()))
    }

    /// An effect that never completes on its own; it parks on the gate and
    /// returns only once its scope is interrupted.
    pub fn never() -> Self {
        Thunk::new(|gate| {
            gate.wait_shut();
            Ok(Value::Unit)
        })
    }

    pub fn run(&self, gate: &Gate) -> Result<Value, StreamError> {
        (self.run)(gate)
    }
}

impl std::fmt::Debug for Thunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thunk").finish_non_exhaustive()
    }
}

type TranslateFn = dyn Fn(Thunk) -> Thunk + Send + Sync;

/// A natural transformation over effect thunks.
///
/// Compositions form a linear chain folded once per translated action; the
/// identity translation is free.
#[derive(Clone)]
pub struct Translation {
    apply: Option<Arc<TranslateFn>>,
}

impl Translation {
    pub fn identity() -> Self {
        Translation { apply: None }
    }

    pub fn new(f: impl Fn(Thunk) -> Thunk + Send + Sync + 'static) -> Self {
        Translation {
            apply: Some(Arc::new(f)),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.apply.is_none()
    }

    pub fn apply(&self, thunk: Thunk) -> Thunk {
        match &self.apply {
            Some(f) => f(thunk),
            None => thunk,
        }
    }

    /// Compose with an inner translation: the result applies `inner` first,
    /// then `self`.
    pub fn compose(&self, inner: &Translation) -> Translation {
        match (&self.apply, &inner.apply) {
            (None, _) => inner.clone(),
            (_, None) => self.clone(),
            (Some(outer), Some(inner)) => {
                let outer = Arc::clone(outer);
                let inner = Arc::clone(inner);
                Translation {
                    apply: Some(Arc::new(move |thunk| outer(inner(thunk)))),
                }
            }
        }
    }
}

impl std::fmt::Debug for Translation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_identity() {
            write!(f, "Translation(identity)")
        } else {
            write!(f, "Translation(..)")
        }
    }
}
