//! The pull algebra: program trees describing effectful streams.
//!
//! A `Pull` is an immutable, structurally shared tree of actions joined by
//! bind nodes. Nothing runs until a pull is handed to the machine; the
//! constructors here only build (and opportunistically fuse) nodes.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::effect::{Thunk, Translation};
use crate::error::StreamError;
use crate::fusion;
use crate::ids::Token;
use crate::step::{ExitCase, Interruption, Terminal};
use crate::value::Value;

/// A bind continuation: consumes the terminal of the bound step and produces
/// the next pull.
pub type Kont = Arc<dyn Fn(Terminal) -> Pull + Send + Sync>;

/// A resource finalizer: receives the acquired value and the exit case of
/// the owning scope.
pub type FinalizerFn = Arc<dyn Fn(&Value, &ExitCase) -> Result<(), StreamError> + Send + Sync>;

/// Elementwise output transform.
pub type MapFn = Arc<dyn Fn(&Value) -> Result<Value, StreamError> + Send + Sync>;

/// Per-element sub-pull factory for flat-map-output.
pub type BindFn = Arc<dyn Fn(Value) -> Pull + Send + Sync>;

/// Result of stepping a pull once via `uncons` or `step_leg`: the emitted
/// chunk, the scope the chunk was produced in, and the remaining pull.
#[derive(Clone)]
pub struct PullStep {
    pub chunk: Chunk,
    pub scope: Token,
    pub tail: Pull,
}

/// A pull program tree.
#[derive(Clone)]
pub enum Pull {
    // terminals
    Done(Value),
    Fail(StreamError),
    Interrupted(Interruption),
    // actions
    Output(Chunk),
    Eval(Thunk),
    Acquire {
        acquire: Thunk,
        release: FinalizerFn,
        cancelable: bool,
    },
    GetScope,
    Translate {
        inner: Box<Pull>,
        translation: Translation,
    },
    MapOutput {
        inner: Box<Pull>,
        f: MapFn,
    },
    FlatMapOutput {
        inner: Box<Pull>,
        f: BindFn,
    },
    Uncons {
        inner: Box<Pull>,
    },
    StepLeg {
        inner: Box<Pull>,
        scope: Token,
    },
    InScope {
        inner: Box<Pull>,
        interruptible: bool,
    },
    CloseScope {
        token: Token,
        interruption: Option<Interruption>,
        exit: ExitCase,
    },
    InterruptWhen {
        signal: Thunk,
    },
    // composition
    Bind {
        step: Box<Pull>,
        cont: Kont,
    },
}

impl Pull {
    /// Node kind, for logging and traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Pull::Done(_) => "Done",
            Pull::Fail(_) => "Fail",
            Pull::Interrupted(_) => "Interrupted",
            Pull::Output(_) => "Output",
            Pull::Eval(_) => "Eval",
            Pull::Acquire { .. } => "Acquire",
            Pull::GetScope => "GetScope",
            Pull::Translate { .. } => "Translate",
            Pull::MapOutput { .. } => "MapOutput",
            Pull::FlatMapOutput { .. } => "FlatMapOutput",
            Pull::Uncons { .. } => "Uncons",
            Pull::StepLeg { .. } => "StepLeg",
            Pull::InScope { .. } => "InScope",
            Pull::CloseScope { .. } => "CloseScope",
            Pull::InterruptWhen { .. } => "InterruptWhen",
            Pull::Bind { .. } => "Bind",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Pull::Done(_) | Pull::Fail(_) | Pull::Interrupted(_))
    }

    /// Effect-only actions: no output can come out of these, so output
    /// transformers pass through them unchanged.
    pub fn is_alg_effect(&self) -> bool {
        matches!(
            self,
            Pull::Eval(_)
                | Pull::Acquire { .. }
                | Pull::GetScope
                | Pull::CloseScope { .. }
                | Pull::InterruptWhen { .. }
        )
    }

    pub fn from_terminal(terminal: Terminal) -> Pull {
        match terminal {
            Terminal::Done(value) => Pull::Done(value),
            Terminal::Fail(err) => Pull::Fail(err),
            Terminal::Interrupted(interruption) => Pull::Interrupted(interruption),
        }
    }

    pub fn as_terminal(&self) -> Option<Terminal> {
        match self {
            Pull::Done(value) => Some(Terminal::Done(value.clone())),
            Pull::Fail(err) => Some(Terminal::Fail(err.clone())),
            Pull::Interrupted(interruption) => {
                Some(Terminal::Interrupted(interruption.clone()))
            }
            _ => None,
        }
    }

    // ---- construction ----------------------------------------------------

    /// The pull that does nothing and carries unit.
    pub fn done() -> Pull {
        Pull::Done(Value::Unit)
    }

    pub fn pure(value: impl Into<Value>) -> Pull {
        Pull::Done(value.into())
    }

    pub fn raise_error(err: StreamError) -> Pull {
        Pull::Fail(err)
    }

    /// Emit a single value.
    pub fn output1(value: impl Into<Value>) -> Pull {
        Pull::Output(Chunk::singleton(value))
    }

    /// Emit a chunk. An empty chunk emits nothing.
    pub fn output(chunk: Chunk) -> Pull {
        if chunk.is_empty() {
            Pull::done()
        } else {
            Pull::Output(chunk)
        }
    }

    /// Run an effect in the ambient effect, carrying its result.
    pub fn eval(thunk: Thunk) -> Pull {
        Pull::Eval(thunk)
    }

    /// Like `eval`, but a failing effect carries its error as a value
    /// instead of failing the pull.
    pub fn attempt_eval(thunk: Thunk) -> Pull {
        Pull::eval(thunk).attempt()
    }

    /// Acquire a resource under the uncancellable mask; `release` runs when
    /// the owning scope closes.
    pub fn acquire(acquire: Thunk, release: FinalizerFn) -> Pull {
        Pull::Acquire {
            acquire,
            release,
            cancelable: false,
        }
    }

    /// Acquire a resource, letting the ambient effect cancel the acquire
    /// action. If it is cancelled no finalizer is registered.
    pub fn acquire_cancelable(acquire: Thunk, release: FinalizerFn) -> Pull {
        Pull::Acquire {
            acquire,
            release,
            cancelable: true,
        }
    }

    /// Carry the current scope handle.
    pub fn get_scope() -> Pull {
        Pull::GetScope
    }

    /// Defer construction of a pull until interpretation reaches it.
    pub fn suspend(f: impl Fn() -> Pull + Send + Sync + 'static) -> Pull {
        Pull::done().bind_with(Arc::new(move |terminal| match terminal {
            Terminal::Done(_) => f(),
            other => Pull::from_terminal(other),
        }))
    }

    pub fn from_result(result: Result<Value, StreamError>) -> Pull {
        match result {
            Ok(value) => Pull::Done(value),
            Err(err) => Pull::Fail(err),
        }
    }

    /// Repeatedly run `f` on the carry, starting from `seed`, until it
    /// carries none.
    pub fn loop_while(f: impl Fn(Value) -> Pull + Send + Sync + 'static, seed: Value) -> Pull {
        Self::loop_arc(Arc::new(f), seed)
    }

    fn loop_arc(f: Arc<dyn Fn(Value) -> Pull + Send + Sync>, seed: Value) -> Pull {
        let next_f = Arc::clone(&f);
        f(seed).flat_map(move |next| {
            if next.is_none() {
                Pull::done()
            } else {
                Pull::loop_arc(Arc::clone(&next_f), next)
            }
        })
    }

    /// Acquire, use, and guarantee release with the scope's exit case.
    ///
    /// The finalizer lands on the current scope; wrap in [`Pull::scoped`] to
    /// bound its lifetime to the bracket itself.
    pub fn bracket_case(
        acquire: Thunk,
        use_: impl Fn(Value) -> Pull + Send + Sync + 'static,
        release: FinalizerFn,
    ) -> Pull {
        Pull::acquire(acquire, release).flat_map(use_)
    }

    /// Lease the current scope and hand the lease to `inner`: the lease is
    /// cancelled when the scope `inner` later runs in closes, so resources
    /// of the current scope outlive it.
    pub fn extend_scope_to(inner: Pull) -> Pull {
        Pull::get_scope().flat_map(move |scope_value| {
            let Some(scope) = scope_value.as_scope().cloned() else {
                return Pull::Fail(StreamError::internal("get_scope carried a non-scope value"));
            };
            let inner = inner.clone();
            let lease_thunk = Thunk::new(move |_| {
                scope
                    .lease()
                    .map(|lease| Value::Handle(Arc::new(lease)))
            });
            Pull::eval(lease_thunk).flat_map(move |handle| {
                let release: FinalizerFn = Arc::new(move |_, _| match &handle {
                    Value::Handle(h) => match h.downcast_ref::<crate::scope::Lease>() {
                        Some(lease) => lease.cancel(),
                        None => Ok(()),
                    },
                    _ => Ok(()),
                });
                Pull::scoped(
                    Pull::acquire(Thunk::of(Value::Unit), release).then(inner.clone()),
                )
            })
        })
    }

    /// Run `inner` inside a fresh child scope.
    pub fn scoped(inner: Pull) -> Pull {
        Pull::InScope {
            inner: Box::new(inner),
            interruptible: false,
        }
    }

    /// Run `inner` inside a fresh child scope that can host an interruption
    /// signal.
    pub fn interrupt_scope(inner: Pull) -> Pull {
        Pull::InScope {
            inner: Box::new(inner),
            interruptible: true,
        }
    }

    /// Register an interruption source on the current scope: when `signal`
    /// completes the scope is interrupted; when it fails the scope observes
    /// the error.
    pub fn interrupt_when(signal: Thunk) -> Pull {
        Pull::InterruptWhen { signal }
    }

    // ---- composition -----------------------------------------------------

    /// Raw monadic bind over terminals.
    pub fn bind_with(self, cont: Kont) -> Pull {
        Pull::Bind {
            step: Box::new(self),
            cont,
        }
    }

    /// Bind over any terminal.
    pub fn transform_with(self, f: impl Fn(Terminal) -> Pull + Send + Sync + 'static) -> Pull {
        self.bind_with(Arc::new(f))
    }

    /// Bind over the carry; failures and interruptions short-circuit.
    pub fn flat_map(self, f: impl Fn(Value) -> Pull + Send + Sync + 'static) -> Pull {
        self.bind_with(Arc::new(move |terminal| match terminal {
            Terminal::Done(value) => f(value),
            other => Pull::from_terminal(other),
        }))
    }

    /// Transform the carry.
    pub fn map(self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Pull {
        self.bind_with(Arc::new(move |terminal| match terminal {
            Terminal::Done(value) => Pull::Done(f(value)),
            other => Pull::from_terminal(other),
        }))
    }

    /// Replace the carry.
    pub fn replace(self, value: impl Into<Value>) -> Pull {
        let value = value.into();
        self.map(move |_| value.clone())
    }

    /// Discard the carry.
    pub fn void(self) -> Pull {
        self.replace(Value::Unit)
    }

    /// Sequential composition discarding the first carry; failure and
    /// interruption short-circuit.
    pub fn then(self, next: Pull) -> Pull {
        self.bind_with(Arc::new(move |terminal| match terminal {
            Terminal::Done(_) => next.clone(),
            other => Pull::from_terminal(other),
        }))
    }

    /// Surface failures as carried values; never fails. Interruption is not
    /// an error and passes through.
    pub fn attempt(self) -> Pull {
        self.bind_with(Arc::new(|terminal| match terminal {
            Terminal::Done(value) => Pull::Done(value),
            Terminal::Fail(err) => Pull::Done(Value::Error(err)),
            other => Pull::from_terminal(other),
        }))
    }

    /// Recover from failures. Interruption is not caught.
    pub fn handle_error_with(
        self,
        handler: impl Fn(StreamError) -> Pull + Send + Sync + 'static,
    ) -> Pull {
        self.bind_with(Arc::new(move |terminal| match terminal {
            Terminal::Fail(err) => handler(err),
            other => Pull::from_terminal(other),
        }))
    }

    /// Run `post` after this pull completes or fails (re-raising the
    /// failure afterwards). Interruption skips `post`; scope finalizers,
    /// not `on_complete`, are the interruption-safe cleanup mechanism.
    pub fn on_complete(self, post: Pull) -> Pull {
        self.bind_with(Arc::new(move |terminal| match terminal {
            Terminal::Done(_) => post.clone(),
            Terminal::Fail(err) => post.clone().then(Pull::Fail(err)),
            other => Pull::from_terminal(other),
        }))
    }

    // ---- stepping --------------------------------------------------------

    /// Step this pull once: carry `None` when it is exhausted, or the chunk
    /// plus remaining pull.
    pub fn uncons(self) -> Pull {
        Pull::Uncons {
            inner: Box::new(self),
        }
    }

    /// Like `uncons`, but run inside the scope identified by `scope` and
    /// shift back afterwards.
    pub fn step_leg(self, scope: Token) -> Pull {
        Pull::StepLeg {
            inner: Box::new(self),
            scope,
        }
    }

    // ---- output transformers --------------------------------------------

    /// Elementwise transform of emissions. Fuses with adjacent transformers
    /// at construction time.
    pub fn map_output(
        self,
        f: impl Fn(&Value) -> Result<Value, StreamError> + Send + Sync + 'static,
    ) -> Pull {
        fusion::map_output(self, Arc::new(f))
    }

    /// Substitute each emitted value with a sub-pull and emit their
    /// concatenated outputs.
    pub fn flat_map_output(self, f: impl Fn(Value) -> Pull + Send + Sync + 'static) -> Pull {
        fusion::flat_map_output(self, Arc::new(f))
    }

    /// Reinterpret this pull's effects through a translation.
    pub fn translated(self, translation: Translation) -> Pull {
        fusion::translate(self, translation)
    }
}

impl std::fmt::Debug for Pull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pull::Done(value) => f.debug_tuple("Done").field(value).finish(),
            Pull::Fail(err) => f.debug_tuple("Fail").field(err).finish(),
            Pull::Interrupted(i) => f.debug_tuple("Interrupted").field(i).finish(),
            Pull::Output(chunk) => f.debug_tuple("Output").field(chunk).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

impl std::fmt::Debug for PullStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStep")
            .field("chunk", &self.chunk)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
