use std::{
    ops::{Index, IndexMut},
    sync::atomic::{AtomicU64, Ordering},
};

/// Position of the sequence origin; no element has been processed yet
pub const ORIGIN: u64 = 0;

/// Progress marker of one consumer stage
///
/// The position counts the elements the stage has fully processed. It is
/// written only by the owning stage and only ever moves forward.
#[derive(Debug)]
pub struct DisruptorBarrier {
    level: usize,
    position: AtomicU64,
}

impl DisruptorBarrier {
    pub fn new(level: usize) -> Self {
        Self {
            level,
            position: AtomicU64::new(ORIGIN),
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Moves the barrier forward to `position`
    ///
    /// # Panics
    ///
    /// If `position` is behind the current one.
    pub fn advance(&self, position: u64) {
        let previous = self.position.swap(position, Ordering::AcqRel);

        assert!(
            previous <= position,
            "barrier {} moved backwards from {previous} to {position}",
            self.level
        );
    }
}

/// One barrier per consumer stage, levels in stage order
#[derive(Debug, Default)]
pub struct DisruptorBarriers {
    barriers: Vec<DisruptorBarrier>,
}

impl DisruptorBarriers {
    pub fn new(count: usize) -> Self {
        Self {
            barriers: (0..count).map(DisruptorBarrier::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DisruptorBarrier> {
        self.barriers.iter()
    }

    /// Position of the last stage, i.e. elements fully done
    pub fn last_position(&self) -> Option<u64> {
        self.barriers.last().map(DisruptorBarrier::position)
    }
}

impl Index<usize> for DisruptorBarriers {
    type Output = DisruptorBarrier;

    fn index(&self, index: usize) -> &Self::Output {
        &self.barriers[index]
    }
}

impl IndexMut<usize> for DisruptorBarriers {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.barriers[index]
    }
}
