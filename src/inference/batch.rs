//! Batch builder: positioned token entries submitted in one forward call.

use crate::errors::SlmError;
use crate::tokenizer::TokenId;

/// Sequence id used for every entry; this crate drives one sequence at a time.
pub const SEQUENCE_ID: u32 = 0;

/// Extra slots reserved on top of prompt + generation budget.
pub const BATCH_SLACK: usize = 8;

/// Smallest allocation handed out for a request.
pub const MIN_BATCH_CAPACITY: usize = 512;

/// Capacity for a request: the prompt batch must fit, plus the generation budget and slack.
pub fn batch_capacity(prompt_len: usize, max_new_tokens: usize) -> usize {
    (prompt_len + max_new_tokens + BATCH_SLACK).max(MIN_BATCH_CAPACITY)
}

/// One positioned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: TokenId,
    pub position: u32,
    pub sequence_id: u32,
    pub wants_logits: bool,
}

/// Fixed-capacity entry buffer. Never grows; `clear` keeps the allocation.
#[derive(Debug)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    capacity: usize,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one entry on sequence [`SEQUENCE_ID`].
    pub fn push(
        &mut self,
        token: TokenId,
        position: u32,
        wants_logits: bool,
    ) -> Result<(), SlmError> {
        if self.entries.len() >= self.capacity {
            return Err(SlmError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.entries.push(BatchEntry {
            token,
            position,
            sequence_id: SEQUENCE_ID,
            wants_logits,
        });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the entry whose logits are requested (the last one flagged).
    pub fn logits_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.wants_logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_beyond_capacity_fails() {
        let mut b = Batch::with_capacity(2);
        b.push(1, 0, false).unwrap();
        b.push(2, 1, true).unwrap();
        assert!(matches!(
            b.push(3, 2, true),
            Err(SlmError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn clear_on_empty_is_noop() {
        let mut b = Batch::with_capacity(4);
        b.clear();
        b.clear();
        assert!(b.is_empty());
        assert_eq!(b.capacity(), 4);
    }

    #[test]
    fn clear_keeps_allocation() {
        let mut b = Batch::with_capacity(3);
        for i in 0..3 {
            b.push(i, i, i == 2).unwrap();
        }
        let before = b.entries.capacity();
        b.clear();
        assert_eq!(b.entries.capacity(), before);
        b.push(9, 3, true).unwrap();
        assert_eq!(b.entries()[0].position, 3);
        assert_eq!(b.entries()[0].sequence_id, SEQUENCE_ID);
    }

    #[test]
    fn logits_index_finds_last_flag() {
        let mut b = Batch::with_capacity(4);
        b.push(1, 0, false).unwrap();
        b.push(2, 1, true).unwrap();
        assert_eq!(b.logits_index(), Some(1));
        b.clear();
        assert_eq!(b.logits_index(), None);
    }

    #[test]
    fn capacity_covers_prompt_and_budget() {
        assert_eq!(batch_capacity(3, 10), MIN_BATCH_CAPACITY);
        assert_eq!(batch_capacity(600, 100), 708);
    }
}
