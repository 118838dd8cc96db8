//! Growable output buffer between the muxer and the HTTP body

use tracing::debug;

use crate::ts::{MuxSink, SinkError};

/// Muxed bytes waiting to be delivered to the client
///
/// `used` bytes are valid, the first `cursor` of them are already delivered.
/// Capacity grows to exactly what an append needs and never shrinks.
#[derive(Debug)]
pub struct OutputAccumulator {
    buf: Vec<u8>,
    used: usize,
    cursor: usize,
    growths: u64,
}

impl OutputAccumulator {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buf: vec![0; initial_capacity],
            used: 0,
            cursor: 0,
            growths: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes not yet delivered
    pub fn pending(&self) -> usize {
        self.used - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// True once every written byte has been delivered
    pub fn is_drained(&self) -> bool {
        self.cursor == self.used
    }

    /// Number of times the buffer was grown
    pub fn growths(&self) -> u64 {
        self.growths
    }

    /// Grows the buffer to hold at least `needed` bytes
    ///
    /// Grows to exactly `needed`; bytes before `used` are preserved.
    pub fn ensure_capacity(&mut self, needed: usize) -> Result<(), SinkError> {
        self.grow_for(needed, needed.saturating_sub(self.used))
    }

    fn grow_for(&mut self, needed: usize, incoming: usize) -> Result<(), SinkError> {
        if needed <= self.buf.len() {
            return Ok(());
        }

        let additional = needed - self.buf.len();
        self.buf
            .try_reserve_exact(additional)
            .map_err(|source| SinkError::Grow { needed, source })?;
        self.buf.resize(needed, 0);
        self.growths += 1;

        debug!(
            capacity = needed,
            used = self.used,
            incoming,
            "Output buffer grown"
        );
        Ok(())
    }

    /// Copies undelivered bytes into `out` and advances the cursor
    pub fn deliver(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.pending());
        out[..n].copy_from_slice(&self.buf[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }

    /// Empties the buffer, keeping its capacity
    pub fn reset(&mut self) {
        self.used = 0;
        self.cursor = 0;
    }

    /// Written bytes, delivered or not
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl MuxSink for OutputAccumulator {
    fn append(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        let needed = self.used + data.len();
        self.grow_for(needed, data.len())?;
        self.buf[self.used..needed].copy_from_slice(data);
        self.used = needed;
        Ok(data.len())
    }
}
