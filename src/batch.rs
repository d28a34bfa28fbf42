//! Splitting bulk requests into provider-sized batches.
//!
//! The upstream accepts a limited number of symbols per quote request.
//! Batching is a pure, order-preserving split: no waiting, no deduplication.
//!
//! # Example
//!
//! ```rust
//! use quota_gate::batch::batch_quotes;
//!
//! let symbols: Vec<String> = (0..120).map(|i| format!("SYM{i}")).collect();
//! let batches = batch_quotes(&symbols, 50);
//!
//! let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
//! assert_eq!(sizes, vec![50, 50, 20]);
//! ```

use crate::rate_limit::limits::provider::SYMBOLS_PER_REQUEST;

/// Splits identifier lists into chunks of at most `max_batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBatcher {
    max_batch_size: usize,
}

impl RequestBatcher {
    /// Create a batcher. A size of zero is treated as one.
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// The maximum chunk size.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Split `items` into consecutive borrowed chunks.
    pub fn batch<'a, T>(&self, items: &'a [T]) -> Vec<&'a [T]> {
        items.chunks(self.max_batch_size).collect()
    }

    /// Number of chunks `len` items would produce.
    pub fn batch_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_batch_size)
    }
}

impl Default for RequestBatcher {
    fn default() -> Self {
        Self::new(SYMBOLS_PER_REQUEST)
    }
}

/// Split `symbols` into owned chunks of at most `max_batch_size`.
pub fn batch_quotes<T: Clone>(symbols: &[T], max_batch_size: usize) -> Vec<Vec<T>> {
    RequestBatcher::new(max_batch_size)
        .batch(symbols)
        .into_iter()
        .map(<[T]>::to_vec)
        .collect()
}
