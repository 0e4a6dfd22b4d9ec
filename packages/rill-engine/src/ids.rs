//! Core identifier types for the engine.
//!
//! Tokens are lightweight Copy newtypes compared by identity, never by
//! structure.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a scope.
///
/// Every scope opened during interpretation gets a fresh Token; tokens stay
/// unique for the lifetime of the process, so a token held after its scope
/// closed still identifies that scope and nothing else.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Token(pub u64);

/// Unique identifier for an interruption watcher.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WatcherId(pub u64);

// Global counters for ID generation
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);
static WATCHER_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Token {
    /// Create a fresh unique Token.
    pub fn fresh() -> Self {
        Token(TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Create a Token with a specific value (for testing).
    pub fn from_raw(value: u64) -> Self {
        Token(value)
    }
}

impl WatcherId {
    /// Create a fresh unique WatcherId.
    pub fn fresh() -> Self {
        WatcherId(WATCHER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}
