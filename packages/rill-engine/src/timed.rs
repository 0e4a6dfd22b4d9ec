//! Timed pulling: uncons with a resettable timeout.
//!
//! Deadlines are cooperative: they are observed between machine steps and by
//! gate-aware effects, so a timeout surfaces at the next step boundary after
//! it expires.

use std::time::{Duration, Instant};

use crate::algebra::Pull;
use crate::chunk::Chunk;
use crate::error::StreamError;
use crate::stream::{stream, PullStream, StepUntil};

/// What a timed uncons produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TimedEvent {
    Chunk(Chunk),
    Timeout,
}

/// A pull driven chunk-by-chunk under a resettable timeout.
///
/// `timeout` arms a deadline for subsequent `uncons` calls: setting a new
/// timeout cancels any pending one, a zero duration cancels without arming,
/// and the very first timeout starts counting at the next `uncons`. An
/// armed deadline fires at most once.
pub struct Timed {
    stream: PullStream,
    deadline: Option<Instant>,
    pending: Option<Duration>,
    started: bool,
}

impl Timed {
    pub fn new(pull: Pull) -> Self {
        Timed {
            stream: stream(pull),
            deadline: None,
            pending: None,
            started: false,
        }
    }

    /// Arm, re-arm, or cancel the timeout.
    pub fn timeout(&mut self, duration: Duration) {
        if duration.is_zero() {
            self.deadline = None;
            self.pending = None;
        } else if self.started {
            self.deadline = Some(Instant::now() + duration);
            self.pending = None;
        } else {
            self.pending = Some(duration);
        }
    }

    /// Pull the next chunk, or report a timeout if the armed deadline
    /// expires first. `None` once the underlying pull is exhausted.
    pub fn uncons(&mut self) -> Option<Result<TimedEvent, StreamError>> {
        self.started = true;
        if let Some(duration) = self.pending.take() {
            self.deadline = Some(Instant::now() + duration);
        }
        match self.deadline {
            None => self
                .stream
                .next()
                .map(|result| result.map(TimedEvent::Chunk)),
            Some(deadline) => {
                if Instant::now() >= deadline {
                    self.deadline = None;
                    return Some(Ok(TimedEvent::Timeout));
                }
                match self.stream.next_until(deadline) {
                    StepUntil::Ready(item) => item.map(|result| result.map(TimedEvent::Chunk)),
                    StepUntil::TimedOut => {
                        self.deadline = None;
                        Some(Ok(TimedEvent::Timeout))
                    }
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stream.is_finished()
    }
}

impl std::fmt::Debug for Timed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timed")
            .field("deadline", &self.deadline)
            .field("pending", &self.pending)
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Thunk;
    use crate::value::Value;

    fn ints(values: &[i64]) -> Chunk {
        Chunk::from_vec(values.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_uncons_without_timeout_yields_chunks() {
        let pull = Pull::output(ints(&[1])).then(Pull::output(ints(&[2])));
        let mut timed = Timed::new(pull);
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[1])))));
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[2])))));
        assert_eq!(timed.uncons(), None);
        assert!(timed.is_finished());
    }

    #[test]
    fn test_timeout_fires_on_slow_pull() {
        // an effect that sleeps well past the deadline
        let pull = Pull::eval(Thunk::from_fn(|| {
            std::thread::sleep(Duration::from_millis(40));
            Ok(Value::Unit)
        }))
        .then(Pull::output(ints(&[1])));

        let mut timed = Timed::new(pull);
        timed.timeout(Duration::from_millis(5));
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Timeout)));
        // the pull itself is undisturbed; the chunk arrives next
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[1])))));
    }

    #[test]
    fn test_first_timeout_armed_on_next_uncons() {
        let pull = Pull::output(ints(&[1]));
        let mut timed = Timed::new(pull);
        timed.timeout(Duration::from_millis(10));
        // the deadline has not started counting yet
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[1])))));
    }

    #[test]
    fn test_zero_duration_cancels_pending_timeout() {
        let pull = Pull::eval(Thunk::from_fn(|| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Value::Unit)
        }))
        .then(Pull::output(ints(&[1])));

        let mut timed = Timed::new(pull);
        timed.timeout(Duration::from_millis(5));
        timed.timeout(Duration::ZERO);
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[1])))));
    }

    #[test]
    fn test_new_timeout_replaces_pending_one() {
        let pull = Pull::eval(Thunk::from_fn(|| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(Value::Unit)
        }))
        .then(Pull::output(ints(&[1])));

        let mut timed = Timed::new(pull);
        timed.timeout(Duration::from_millis(1));
        timed.timeout(Duration::from_secs(5));
        // the long replacement wins; the chunk beats it
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[1])))));
    }

    #[test]
    fn test_timeout_fires_once_per_arming() {
        let pull = Pull::eval(Thunk::from_fn(|| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(Value::Unit)
        }))
        .then(Pull::output(ints(&[1])));

        let mut timed = Timed::new(pull);
        timed.timeout(Duration::from_millis(5));
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Timeout)));
        // not re-armed: the next uncons waits for the chunk
        assert_eq!(timed.uncons(), Some(Ok(TimedEvent::Chunk(ints(&[1])))));
        assert_eq!(timed.uncons(), None);
    }
}
