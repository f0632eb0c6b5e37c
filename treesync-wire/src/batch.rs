//! Batch delivery: bounded windows over an arbitrarily long unit stream.
//!
//! Splitting a stream into windows of any size is semantically transparent;
//! the receiver's only suspension point is [`BatchSource::next_batch`].

use treesync_core::{RefId, WireUnit};

use crate::error::ProtocolError;

/// Pull-side of batched delivery. An empty batch means the source is
/// exhausted; the receive queue treats that as a desync when the current
/// object is still open.
pub trait BatchSource {
    fn next_batch(&mut self) -> Result<Vec<WireUnit>, ProtocolError>;
}

/// Lazy resolution of a ref id the receiver has not materialized yet.
/// Typically backed by the peer's GetRef call.
pub trait RefSource {
    fn fetch_ref(&mut self, ref_id: RefId) -> Result<Vec<WireUnit>, ProtocolError>;
}

/// In-memory [`BatchSource`] over a fixed sequence of pre-split batches.
#[derive(Debug, Default)]
pub struct VecBatches {
    batches: std::collections::VecDeque<Vec<WireUnit>>,
}

impl VecBatches {
    pub fn new(batches: Vec<Vec<WireUnit>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// One undivided batch.
    pub fn single(units: Vec<WireUnit>) -> Self {
        Self::new(vec![units])
    }
}

impl BatchSource for VecBatches {
    fn next_batch(&mut self) -> Result<Vec<WireUnit>, ProtocolError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}

/// Split a unit stream into bounded windows. A size of zero is clamped to 1.
pub fn windows(units: &[WireUnit], size: usize) -> Vec<Vec<WireUnit>> {
    units
        .chunks(size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

// ---------------------------------------------------------------------------
// BatchCursor
// ---------------------------------------------------------------------------

/// Delivery progress over one object's pending unit stream. Repeated calls
/// resume where the previous window ended rather than restarting.
#[derive(Debug)]
pub struct BatchCursor {
    units: Vec<WireUnit>,
    pos: usize,
}

impl BatchCursor {
    pub fn new(units: Vec<WireUnit>) -> Self {
        Self { units, pos: 0 }
    }

    /// Next bounded window, at most `size` units. A size of zero is clamped
    /// to 1 so the stream always makes progress.
    pub fn next_window(&mut self, size: usize) -> Vec<WireUnit> {
        let end = (self.pos + size.max(1)).min(self.units.len());
        let window = self.units[self.pos..end].to_vec();
        self.pos = end;
        window
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.units.len()
    }

    pub fn remaining(&self) -> usize {
        self.units.len() - self.pos
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
