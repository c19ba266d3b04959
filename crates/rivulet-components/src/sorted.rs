//! Cursor over an input that must arrive sorted by a key.

use std::cmp::Ordering;

use rivulet_core::key::RecordKey;
use rivulet_core::record::DataRecord;

use crate::error::{ComponentError, Result};
use crate::port::InputPort;

/// Holds the current record of a sorted input and checks every new record
/// against it. A record that sorts before its predecessor is fatal.
pub(crate) struct SortedInput {
    port: InputPort,
    key: RecordKey,
    current: DataRecord,
    next: DataRecord,
    has: bool,
    side: &'static str,
}

impl SortedInput {
    /// Wrap `port` and read its first record. `side` names the input in
    /// out-of-order messages, e.g. "Driver".
    pub fn open(mut port: InputPort, key: RecordKey, side: &'static str) -> Result<Self> {
        let meta = std::sync::Arc::clone(key.metadata());
        let mut current = DataRecord::new(std::sync::Arc::clone(&meta));
        let has = port.read(&mut current)?;
        Ok(Self {
            port,
            key,
            current,
            next: DataRecord::new(meta),
            has,
            side,
        })
    }

    pub fn has(&self) -> bool {
        self.has
    }

    pub fn current(&self) -> &DataRecord {
        &self.current
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Move to the next record. Returns how it compares with the previous one
    /// (`Equal` = same key group, `Less` = new group), or `None` at EOF.
    pub fn advance(&mut self) -> Result<Option<Ordering>> {
        if !self.has {
            return Ok(None);
        }
        if !self.port.read(&mut self.next)? {
            self.has = false;
            return Ok(None);
        }
        let ord = self.key.compare(&self.current, &self.next);
        if ord == Ordering::Greater {
            return Err(ComponentError::OutOfOrder(format!(
                "{} record out of order! '{}' follows '{}'",
                self.side,
                self.key.key_string(&self.next),
                self.key.key_string(&self.current)
            )));
        }
        std::mem::swap(&mut self.current, &mut self.next);
        Ok(Some(ord))
    }

    /// Skip the rest of the current key group. Leaves the cursor on the first
    /// record of the next group (or at EOF).
    pub fn skip_group(&mut self) -> Result<u64> {
        let mut skipped = 0;
        while self.advance()? == Some(Ordering::Equal) {
            skipped += 1;
        }
        Ok(skipped)
    }
}
