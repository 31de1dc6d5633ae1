//! Fixed-chunk memory collaborator boundary.
//!
//! The core allocates exactly one fixed-size chunk per object and releases it
//! on destroy. The chunk is modeled as an accounting token handed out by a
//! capacity-bounded pool; the compile-time bound on object size lives next to
//! `BaseObject` itself.

use crate::types::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Accounting token for one allocated chunk. Not cloneable; returned to the
/// pool via `release_chunk`.
#[derive(Debug)]
#[must_use]
pub struct Chunk {
    size: usize,
}

impl Chunk {
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Memory collaborator contract: allocate/release one fixed-size chunk.
pub trait MemoryService: Send + Sync + fmt::Debug {
    /// Allocate one chunk; fails with a generic allocation error when the
    /// pool is exhausted.
    fn allocate_chunk(&self) -> Result<Chunk>;

    /// Return a chunk to the pool.
    fn release_chunk(&self, chunk: Chunk);

    /// Chunks currently handed out.
    fn chunks_in_use(&self) -> usize;
}

/// Counting pool of fixed-size chunks.
#[derive(Debug)]
pub struct FixedChunkPool {
    chunk_size: usize,
    capacity: usize,
    in_use: AtomicUsize,
}

impl FixedChunkPool {
    pub fn new(chunk_size: usize, capacity: usize) -> Self {
        Self {
            chunk_size,
            capacity,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl MemoryService for FixedChunkPool {
    fn allocate_chunk(&self) -> Result<Chunk> {
        let claimed = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < self.capacity {
                    Some(current + 1)
                } else {
                    None
                }
            });

        match claimed {
            Ok(_) => Ok(Chunk {
                size: self.chunk_size,
            }),
            Err(_) => Err(Error::allocation_failed(format!(
                "chunk pool exhausted ({} in use)",
                self.capacity
            ))),
        }
    }

    fn release_chunk(&self, chunk: Chunk) {
        drop(chunk);
        let previous = self.in_use.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            // Accounting underflow; restore and complain.
            self.in_use.fetch_add(1, Ordering::AcqRel);
            tracing::warn!("chunk release without matching allocation");
        }
    }

    fn chunks_in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}
