//! Chunks of output values.
//!
//! A chunk is an immutable run of values shared behind an Arc; slicing is an
//! index adjustment, never a copy.

use std::sync::Arc;

use crate::error::StreamError;
use crate::value::Value;

/// A sequence of output values processed as a unit.
///
/// Emission nodes only ever carry non-empty chunks (the `output` constructor
/// collapses an empty chunk to `done`), but `Chunk` itself permits emptiness
/// so slicing stays total.
#[derive(Clone)]
pub struct Chunk {
    data: Arc<Vec<Value>>,
    start: usize,
    end: usize,
}

impl Chunk {
    /// Build a chunk from a vector of values.
    pub fn from_vec(values: Vec<Value>) -> Self {
        let end = values.len();
        Chunk {
            data: Arc::new(values),
            start: 0,
            end,
        }
    }

    /// Build a single-element chunk.
    pub fn singleton(value: impl Into<Value>) -> Self {
        Chunk::from_vec(vec![value.into()])
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        if index < self.len() {
            self.data.get(self.start + index)
        } else {
            None
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.get(0)
    }

    /// Slice off the first `count` elements without copying.
    pub fn drop_front(&self, count: usize) -> Chunk {
        let start = (self.start + count).min(self.end);
        Chunk {
            data: Arc::clone(&self.data),
            start,
            end: self.end,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.data[self.start..self.end].iter()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.data[self.start..self.end].to_vec()
    }

    /// Transform every element, short-circuiting on the first failure.
    pub fn map(
        &self,
        f: impl Fn(&Value) -> Result<Value, StreamError>,
    ) -> Result<Chunk, StreamError> {
        let mut mapped = Vec::with_capacity(self.len());
        for value in self.iter() {
            mapped.push(f(value)?);
        }
        Ok(Chunk::from_vec(mapped))
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl From<Vec<Value>> for Chunk {
    fn from(values: Vec<Value>) -> Self {
        Chunk::from_vec(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Chunk {
        Chunk::from_vec(values.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_chunk_basics() {
        let c = ints(&[1, 2, 3]);
        assert_eq!(c.len(), 3);
        assert!(!c.is_empty());
        assert_eq!(c.get(0), Some(&Value::Int(1)));
        assert_eq!(c.get(3), None);
        assert_eq!(c.first(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_chunk_drop_front_shares_storage() {
        let c = ints(&[1, 2, 3]);
        let rest = c.drop_front(1);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest.get(0), Some(&Value::Int(2)));
        // over-dropping clamps to empty
        assert!(c.drop_front(10).is_empty());
        // original unchanged
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_chunk_map() {
        let c = ints(&[1, 2]);
        let doubled = c
            .map(|v| Ok(Value::Int(v.as_int().unwrap_or(0) * 2)))
            .unwrap();
        assert_eq!(doubled, ints(&[2, 4]));

        let failed = c.map(|_| Err(StreamError::internal("nope")));
        assert!(failed.is_err());
    }

    #[test]
    fn test_chunk_equality() {
        assert_eq!(ints(&[1, 2]), ints(&[1, 2]));
        assert_ne!(ints(&[1, 2]), ints(&[2, 1]));
        assert_eq!(ints(&[1, 2, 3]).drop_front(1), ints(&[2, 3]));
    }
}
