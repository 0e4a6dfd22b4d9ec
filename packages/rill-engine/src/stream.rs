//! Chunk-by-chunk iteration over a compiled pull.
//!
//! A `PullStream` owns a machine and a root scope and yields chunks as a
//! plain iterator. The root scope closes when the pull terminates and also
//! when the iterator is dropped early, so abandoning a stream still releases
//! its resources.

use std::time::Instant;

use crate::algebra::Pull;
use crate::chunk::Chunk;
use crate::error::StreamError;
use crate::machine::{Machine, StepEvent};
use crate::scope::Scope;
use crate::step::{ExitCase, Interruption, Terminal};

/// Iterate a pull in a fresh scope of its own.
pub fn stream(pull: Pull) -> PullStream {
    PullStream::new(Pull::scoped(pull))
}

/// Iterate a pull that already manages its own scoping.
pub fn stream_no_scope(pull: Pull) -> PullStream {
    PullStream::new(pull)
}

/// Result of driving a stream against a deadline.
pub(crate) enum StepUntil {
    Ready(Option<Result<Chunk, StreamError>>),
    TimedOut,
}

/// An iterator of chunks produced by a pull.
pub struct PullStream {
    machine: Machine,
    root: Scope,
    finished: bool,
}

impl PullStream {
    fn new(pull: Pull) -> Self {
        let root = Scope::root();
        PullStream {
            machine: Machine::new(pull, root.clone(), false),
            root,
            finished: false,
        }
    }

    /// Whether the pull has terminated (the final item, if any, was
    /// already yielded).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, terminal: Terminal) -> Option<Result<Chunk, StreamError>> {
        self.finished = true;
        let close_result = self.root.close(&match &terminal {
            Terminal::Fail(err) => ExitCase::Errored(err.clone()),
            _ => ExitCase::Succeeded,
        });
        let error = match terminal {
            Terminal::Done(_) => close_result.err(),
            Terminal::Fail(err) => Some(match close_result {
                Ok(()) => err,
                Err(close_err) => StreamError::compose(err, close_err),
            }),
            Terminal::Interrupted(Interruption { deferred, .. }) => {
                StreamError::combine(deferred, close_result.err())
            }
        };
        error.map(Err)
    }

    /// Drive until the next chunk, the end of the pull, or the deadline,
    /// whichever comes first. Deadlines are observed between machine steps.
    pub(crate) fn next_until(&mut self, deadline: Instant) -> StepUntil {
        if self.finished {
            return StepUntil::Ready(None);
        }
        loop {
            if Instant::now() >= deadline {
                return StepUntil::TimedOut;
            }
            match self.machine.step() {
                StepEvent::Continue => {}
                StepEvent::Out(chunk) => return StepUntil::Ready(Some(Ok(chunk))),
                StepEvent::Done(terminal) => return StepUntil::Ready(self.finish(terminal)),
            }
        }
    }
}

impl Iterator for PullStream {
    type Item = Result<Chunk, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.machine.step() {
                StepEvent::Continue => {}
                StepEvent::Out(chunk) => return Some(Ok(chunk)),
                StepEvent::Done(terminal) => return self.finish(terminal),
            }
        }
    }
}

impl Drop for PullStream {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.root.close(&ExitCase::Canceled) {
                crate::engine_debug_log!("stream drop: close failed: {}", err);
            }
        }
    }
}

impl std::fmt::Debug for PullStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStream")
            .field("finished", &self.finished)
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::FinalizerFn;
    use crate::chunk::Chunk;
    use crate::effect::Thunk;
    use crate::value::Value;
    use std::sync::{Arc, Mutex as StdMutex};

    fn ints(values: &[i64]) -> Chunk {
        Chunk::from_vec(values.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_stream_yields_chunks_in_order() {
        let pull = Pull::output(ints(&[1, 2])).then(Pull::output(ints(&[3])));
        let chunks: Result<Vec<Chunk>, StreamError> = stream(pull).collect();
        assert_eq!(chunks, Ok(vec![ints(&[1, 2]), ints(&[3])]));
    }

    #[test]
    fn test_stream_surfaces_errors_last() {
        let pull = Pull::output(ints(&[1])).then(Pull::raise_error(StreamError::raised("end")));
        let mut s = stream(pull);
        assert_eq!(s.next(), Some(Ok(ints(&[1]))));
        assert_eq!(s.next(), Some(Err(StreamError::raised("end"))));
        assert_eq!(s.next(), None);
        assert!(s.is_finished());
    }

    #[test]
    fn test_stream_closes_scope_at_end() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let release_log = Arc::clone(&log);
        let release: FinalizerFn = Arc::new(move |_, exit| {
            release_log.lock().unwrap().push(exit.clone());
            Ok(())
        });
        let pull = Pull::acquire(Thunk::of(Value::Unit), release).then(Pull::output(ints(&[1])));

        let mut s = stream(pull);
        assert_eq!(s.next(), Some(Ok(ints(&[1]))));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(s.next(), None);
        assert_eq!(*log.lock().unwrap(), vec![ExitCase::Succeeded]);
    }

    #[test]
    fn test_dropping_stream_releases_resources() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let release_log = Arc::clone(&log);
        let release: FinalizerFn = Arc::new(move |_, exit| {
            release_log.lock().unwrap().push(exit.clone());
            Ok(())
        });
        let pull = Pull::acquire(Thunk::of(Value::Unit), release)
            .then(Pull::output(ints(&[1])))
            .then(Pull::output(ints(&[2])));

        let mut s = stream(pull);
        assert_eq!(s.next(), Some(Ok(ints(&[1]))));
        drop(s);
        assert_eq!(*log.lock().unwrap(), vec![ExitCase::Canceled]);
    }

    #[test]
    fn test_stream_no_scope_still_runs() {
        let pull = Pull::output(ints(&[7]));
        let chunks: Result<Vec<Chunk>, StreamError> = stream_no_scope(pull).collect();
        assert_eq!(chunks, Ok(vec![ints(&[7])]));
    }

    #[test]
    fn test_stream_absorbs_plain_interruption() {
        let pull = Pull::interrupt_scope(
            Pull::interrupt_when(Thunk::new(|gate| {
                gate.wait_shut_for(std::time::Duration::from_millis(30));
                Ok(Value::Unit)
            }))
            .then(Pull::output(ints(&[1])))
            .then(Pull::eval(Thunk::never())),
        );
        let chunks: Result<Vec<Chunk>, StreamError> = stream(pull).collect();
        assert_eq!(chunks, Ok(vec![ints(&[1])]));
    }
}
