//! Scratch pool: reusable ping-pong buffers for multi-iteration blurs.
//!
//! A blur checks buffers out for its whole duration and checks them back in
//! when done. [`ScratchPool::release`] frees whatever is idle and bumps the
//! pool generation; buffers checked out under an older generation are dropped
//! at check-in instead of being kept, so an in-flight blur finishes with its
//! own buffers and the next blur allocates fresh ones.

use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::memory::MemoryPressureListener;
use crate::pixel_buffer::PixelBuffer;

/// Most buffers a pool keeps between calls.
pub const MAX_SCRATCH_BUFFERS: usize = 2;

#[derive(Default)]
struct PoolState {
    buffers: Vec<PixelBuffer>,
    line: Vec<u8>,
    generation: u64,
}

/// Buffers on loan from a [`ScratchPool`].
pub struct ScratchSet {
    pub buffers: Vec<PixelBuffer>,
    pub line: Vec<u8>,
    generation: u64,
}

#[derive(Default)]
pub struct ScratchPool {
    state: Mutex<PoolState>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check out `count` buffers (at most [`MAX_SCRATCH_BUFFERS`]) shaped like
    /// `like`. Missing buffers are allocated; retained buffers beyond `count`
    /// stay in the pool.
    pub fn checkout(&self, like: &PixelBuffer, count: usize) -> Result<ScratchSet> {
        let count = count.min(MAX_SCRATCH_BUFFERS);
        let (mut buffers, line, generation) = {
            let mut state = self.state.lock();
            let take = count.min(state.buffers.len());
            let buffers: Vec<PixelBuffer> = state.buffers.drain(..take).collect();
            let line = std::mem::take(&mut state.line);
            (buffers, line, state.generation)
        };
        for buf in buffers.iter_mut() {
            if !buf.same_geometry(like) {
                buf.reshape_like(like)?;
            }
        }
        while buffers.len() < count {
            buffers.push(PixelBuffer::try_new_like(like)?);
        }
        Ok(ScratchSet {
            buffers,
            line,
            generation,
        })
    }

    /// Return buffers to the pool, unless the pool was released meanwhile.
    /// The pool never holds more than [`MAX_SCRATCH_BUFFERS`].
    pub fn checkin(&self, set: ScratchSet) {
        let mut state = self.state.lock();
        if set.generation != state.generation {
            return;
        }
        state.buffers.extend(set.buffers);
        state.buffers.truncate(MAX_SCRATCH_BUFFERS);
        if set.line.capacity() >= state.line.capacity() {
            state.line = set.line;
        }
    }

    /// Free all idle buffers. Returns the number of bytes released.
    pub fn release(&self) -> usize {
        let (buffers, line) = {
            let mut state = self.state.lock();
            state.generation += 1;
            (
                std::mem::take(&mut state.buffers),
                std::mem::take(&mut state.line),
            )
        };
        buffers.iter().map(PixelBuffer::capacity_bytes).sum::<usize>() + line.capacity()
    }

    /// Bytes currently held by idle buffers.
    pub fn held_bytes(&self) -> usize {
        let state = self.state.lock();
        state
            .buffers
            .iter()
            .map(PixelBuffer::capacity_bytes)
            .sum::<usize>()
            + state.line.capacity()
    }

    pub fn idle_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }
}

impl MemoryPressureListener for ScratchPool {
    fn on_memory_pressure(&self) {
        let freed = self.release();
        info!(bytes = freed, "released blur scratch buffers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_buffer::PixelLayout;

    #[test]
    fn test_checkout_allocates_and_checkin_keeps() {
        let pool = ScratchPool::new();
        let like = PixelBuffer::new(8, 8, PixelLayout::Rgba8);
        let set = pool.checkout(&like, 2).unwrap();
        assert_eq!(set.buffers.len(), 2);
        assert!(set.buffers.iter().all(|b| b.same_geometry(&like)));
        pool.checkin(set);
        assert_eq!(pool.idle_buffers(), 2);
        assert!(pool.held_bytes() >= 2 * 256);
    }

    #[test]
    fn test_count_is_capped() {
        let pool = ScratchPool::new();
        let like = PixelBuffer::new(2, 2, PixelLayout::Gray8);
        let set = pool.checkout(&like, 7).unwrap();
        assert_eq!(set.buffers.len(), MAX_SCRATCH_BUFFERS);
    }

    #[test]
    fn test_smaller_checkout_leaves_rest_in_pool() {
        let pool = ScratchPool::new();
        let like = PixelBuffer::new(8, 8, PixelLayout::Rgba8);
        pool.checkin(pool.checkout(&like, 2).unwrap());

        let set = pool.checkout(&like, 0).unwrap();
        assert!(set.buffers.is_empty());
        assert_eq!(pool.idle_buffers(), 2);
        pool.checkin(set);
        assert_eq!(pool.idle_buffers(), 2);

        let set = pool.checkout(&like, 1).unwrap();
        assert_eq!(set.buffers.len(), 1);
        assert_eq!(pool.idle_buffers(), 1);
        pool.checkin(set);
        assert_eq!(pool.idle_buffers(), 2);
    }

    #[test]
    fn test_checkin_never_exceeds_cap() {
        let pool = ScratchPool::new();
        let like = PixelBuffer::new(4, 4, PixelLayout::Gray8);
        let first = pool.checkout(&like, 2).unwrap();
        let second = pool.checkout(&like, 2).unwrap();
        pool.checkin(first);
        pool.checkin(second);
        assert_eq!(pool.idle_buffers(), MAX_SCRATCH_BUFFERS);
    }

    #[test]
    fn test_reshapes_to_new_geometry() {
        let pool = ScratchPool::new();
        let big = PixelBuffer::new(16, 16, PixelLayout::Rgba8);
        pool.checkin(pool.checkout(&big, 2).unwrap());
        let small = PixelBuffer::new(3, 5, PixelLayout::Rgb8);
        let set = pool.checkout(&small, 2).unwrap();
        assert!(set.buffers.iter().all(|b| b.same_geometry(&small)));
    }

    #[test]
    fn test_release_frees_idle_buffers() {
        let pool = ScratchPool::new();
        let like = PixelBuffer::new(8, 8, PixelLayout::Rgba8);
        pool.checkin(pool.checkout(&like, 2).unwrap());
        assert!(pool.release() >= 512);
        assert_eq!(pool.idle_buffers(), 0);
        assert_eq!(pool.held_bytes(), 0);
    }

    #[test]
    fn test_release_during_checkout_drops_loaned_buffers() {
        let pool = ScratchPool::new();
        let like = PixelBuffer::new(8, 8, PixelLayout::Rgba8);
        let set = pool.checkout(&like, 2).unwrap();
        pool.on_memory_pressure();
        pool.checkin(set);
        assert_eq!(pool.idle_buffers(), 0);
    }
}
