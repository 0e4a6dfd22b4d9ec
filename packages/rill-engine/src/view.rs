//! Left-biased inspection of pull values.
//!
//! `view` unrolls bind chains so callers always see either a terminal or a
//! single head action plus its pending continuations. Left-associated binds
//! are rebalanced by pushing their continuations onto a stack — O(1) per
//! bind, so deeply chained binds unroll in amortized constant work — and
//! terminals reaching a continuation are fed into it immediately.
//!
//! The machine performs the same rewrite operationally on its own frame
//! stack; this standalone version serves rewrites that must inspect a pull
//! *value*: the interrupt boundary and flat-map-output unconsing.

use crate::algebra::{Kont, Pull};
use crate::error::StreamError;
use crate::step::{ExitCase, Interruption, Terminal};

/// The unrolled shape of a pull.
pub enum ViewL {
    /// The pull is spent.
    Terminal(Terminal),
    /// A head action with its continuation stack; the innermost
    /// continuation is last.
    Action { head: Pull, konts: Vec<Kont> },
}

/// Unroll a pull to its head.
pub fn view(pull: Pull) -> ViewL {
    let mut konts: Vec<Kont> = Vec::new();
    let mut current = pull;
    loop {
        if let Some(terminal) = current.as_terminal() {
            match konts.pop() {
                None => return ViewL::Terminal(terminal),
                Some(kont) => current = kont(terminal),
            }
        } else if let Pull::Bind { step, cont } = current {
            konts.push(cont);
            current = *step;
        } else {
            return ViewL::Action {
                head: current,
                konts,
            };
        }
    }
}

/// Reattach a continuation stack to a pull.
pub fn rebind(mut pull: Pull, konts: Vec<Kont>) -> Pull {
    for kont in konts.into_iter().rev() {
        pull = Pull::Bind {
            step: Box::new(pull),
            cont: kont,
        };
    }
    pull
}

/// Feed a terminal into a continuation stack.
pub fn feed(terminal: Terminal, mut konts: Vec<Kont>) -> Pull {
    match konts.pop() {
        None => Pull::from_terminal(terminal),
        Some(kont) => rebind(kont(terminal), konts),
    }
}

/// Route an interruption through a tail pull.
///
/// Used when a sub-pull of flat-map-output comes back interrupted: the tail
/// must not run, but a close-scope node at its head still has to close its
/// scope, now with the interruption as the cause. Errors already carried by
/// the interruption merge with a failing tail.
pub fn interrupt_boundary(tail: Pull, interruption: Interruption) -> Pull {
    match view(tail) {
        ViewL::Terminal(Terminal::Interrupted(existing)) => Pull::Interrupted(existing),
        ViewL::Terminal(Terminal::Done(_)) => Pull::Interrupted(interruption),
        ViewL::Terminal(Terminal::Fail(err)) => {
            let mixed = match interruption.deferred {
                Some(deferred) => StreamError::compose(deferred, err),
                None => err,
            };
            Pull::Fail(mixed)
        }
        ViewL::Action { head, konts } => match head {
            Pull::CloseScope { token, .. } => {
                let close = Pull::CloseScope {
                    token,
                    interruption: Some(interruption),
                    exit: ExitCase::Canceled,
                };
                rebind(close, konts)
            }
            _ => feed(Terminal::Interrupted(interruption), konts),
        },
    }
}
