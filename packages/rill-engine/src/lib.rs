//! rill-engine: the core of a pull-based effectful streaming engine.
//!
//! # Architecture
//!
//! - **Algebra**: immutable `Pull` trees of actions joined by binds
//! - **Step machine**: one mode register plus a continuation frame stack;
//!   left-associated binds rebalance in O(1) per node
//! - **Scope tree**: deterministic finalization, leasing, and scoped
//!   cooperative interruption
//! - **Driver**: `compile` folds emitted chunks; `stream` iterates them;
//!   `Timed` adds a resettable timeout to stepping

pub mod algebra;
pub mod chunk;
pub mod effect;
pub mod error;
pub mod fusion;
pub mod ids;
pub mod logging;
pub mod machine;
pub mod scope;
pub mod step;
pub mod stream;
pub mod timed;
pub mod value;
pub mod view;

// Re-exports for convenience
pub use algebra::{BindFn, FinalizerFn, Kont, MapFn, Pull, PullStep};
pub use chunk::Chunk;
pub use effect::{Gate, GateSource, Thunk, Translation};
pub use error::StreamError;
pub use ids::Token;
pub use machine::{compile, compile_in, DebugConfig, DebugLevel, Machine, StepEvent, TraceEvent};
pub use scope::{InterruptContext, Lease, Scope};
pub use step::{ExitCase, InterruptCause, Interruption, Outcome, Terminal};
pub use stream::{stream, stream_no_scope, PullStream};
pub use timed::{Timed, TimedEvent};
pub use value::{Handle, Value};
