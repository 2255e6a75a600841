//! Lock-free hand-off queue for blocks whose streams have drained.
//!
//! Erasing the last recorded stream may happen on any thread. The freed
//! block is queued here and handed back to the pool by whichever thread next
//! touches the owning strategy.

use crossbeam_queue::SegQueue;

use crate::allocators::Block;

/// Lock-free queue of blocks ready to be recycled.
pub struct DeferredFreeQueue {
    queue: SegQueue<Block>,
}

impl DeferredFreeQueue {
    /// Create a new deferred free queue.
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Queue a block for recycling.
    pub fn push(&self, block: Block) {
        self.queue.push(block);
    }

    /// Hand every queued block to `recycle`. Returns how many were drained.
    pub fn drain(&self, mut recycle: impl FnMut(Block)) -> usize {
        let mut drained = 0;
        while let Some(block) = self.queue.pop() {
            recycle(block);
            drained += 1;
        }
        drained
    }
}

impl Default for DeferredFreeQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::place::Place;
    use std::ptr::NonNull;

    #[test]
    fn test_drain_hands_back_every_block() {
        let queue = DeferredFreeQueue::new();
        assert_eq!(queue.drain(|_| {}), 0);

        queue.push(Block::new(NonNull::dangling(), 8, 16, Place::Accelerator(0)));
        queue.push(Block::new(NonNull::dangling(), 32, 32, Place::Accelerator(0)));

        let mut bytes = 0;
        let drained = queue.drain(|block| bytes += block.capacity());
        assert_eq!(drained, 2);
        assert_eq!(bytes, 48);
        assert_eq!(queue.drain(|_| {}), 0);
    }
}
