//! User-facing iterator
//!
//! Walks a point-in-time snapshot of the index and resolves values lazily
//! through the engine, so a long scan never holds a lock between steps.

use crate::config::IteratorOptions;
use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;

/// Ordered iterator over the engine's keys
///
/// Positioned on the first matching key when created. `rewind` and `next`
/// skip keys outside the configured prefix; `seek` lands on the first key
/// at or after (before, when reversed) the target without prefix filtering.
pub struct EngineIterator<'a> {
    index_iter: Box<dyn IndexIterator>,
    engine: &'a Engine,
    options: IteratorOptions,
}

impl Engine {
    /// Create an iterator over a snapshot of the current keys
    pub fn iter(&self, options: IteratorOptions) -> Result<EngineIterator<'_>> {
        let index_iter = self.index.iterator(options.reverse)?;
        let mut iter = EngineIterator {
            index_iter,
            engine: self,
            options,
        };
        iter.rewind();
        Ok(iter)
    }
}

impl EngineIterator<'_> {
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
    }

    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Read the value of the current entry from its segment
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.value();
        self.engine.get_value_by_position(&pos)
    }

    pub fn close(&mut self) {
        self.index_iter.close();
    }

    fn skip_to_next(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(&self.options.prefix) {
            self.index_iter.next();
        }
    }
}
