//! Fixed-pool allocator.
//!
//! The interpreter runs out of a single caller-sized memory budget. The
//! pool hands out blocks by first fit over a free list; every block
//! carries its size, a free flag and the id of the owning VM (0 for
//! process-global), so a terminating VM's blocks can be reclaimed in one
//! sweep. Blocks are addressed by offset, never by pointer.
//!
//! Exhaustion is reported as `None`; callers treat that as out-of-memory
//! and propagate.

use alloc::vec::Vec;

use crate::consts::{BLOCK_HEADER_SIZE, POOL_ALIGN};

/// Owner tag of process-global blocks.
pub const GLOBAL_VM_ID: u8 = 0;

/// Offset-addressed handle to a live pool block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    offset: u32,
    size: u32,
    vm_id: u8,
    free: bool,
}

/// Pool usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    /// Pool length in bytes.
    pub total: usize,
    /// Bytes held by live blocks, headers included.
    pub used: usize,
    /// Bytes available, `total - used`.
    pub free: usize,
    /// Length of the largest free block; a low value against a high `free`
    /// signals fragmentation.
    pub fragmentation: usize,
}

/// First-fit allocator over a single fixed region.
///
/// The block ledger always covers the whole pool: block offsets are
/// contiguous and no two adjacent blocks are both free.
#[derive(Debug)]
pub struct MemoryPool {
    total: u32,
    blocks: Vec<Block>,
}

impl MemoryPool {
    /// Create a pool of `size` bytes, rounded down to the pool granularity.
    pub fn new(size: usize) -> Self {
        let total = (size & !(POOL_ALIGN - 1)) as u32;
        let mut blocks = Vec::new();
        if total > 0 {
            blocks.push(Block {
                offset: 0,
                size: total,
                vm_id: GLOBAL_VM_ID,
                free: true,
            });
        }
        Self { total, blocks }
    }

    fn fit(size: usize) -> u32 {
        let payload = (size + POOL_ALIGN - 1) & !(POOL_ALIGN - 1);
        (BLOCK_HEADER_SIZE + payload) as u32
    }

    fn index_of(&self, r: BlockRef) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&r.0, |b| b.offset)
            .ok()
            .filter(|&i| !self.blocks[i].free)
    }

    /// Allocate a process-global block.
    pub fn raw_alloc(&mut self, size: usize) -> Option<BlockRef> {
        self.alloc(GLOBAL_VM_ID, size)
    }

    /// Allocate a block owned by `vm_id`.
    pub fn alloc(&mut self, vm_id: u8, size: usize) -> Option<BlockRef> {
        let need = Self::fit(size);
        let idx = self
            .blocks
            .iter()
            .position(|b| b.free && b.size >= need)?;
        let spare = self.blocks[idx].size - need;
        if spare as usize > BLOCK_HEADER_SIZE {
            let tail = Block {
                offset: self.blocks[idx].offset + need,
                size: spare,
                vm_id: GLOBAL_VM_ID,
                free: true,
            };
            self.blocks[idx].size = need;
            self.blocks.insert(idx + 1, tail);
        }
        let b = &mut self.blocks[idx];
        b.free = false;
        b.vm_id = vm_id;
        Some(BlockRef(b.offset))
    }

    /// Release a process-global block.
    pub fn raw_free(&mut self, r: BlockRef) {
        self.free(r);
    }

    /// Release a block and merge it with free neighbours.
    pub fn free(&mut self, r: BlockRef) {
        let Some(idx) = self.index_of(r) else {
            tracing::warn!(offset = r.0, "free of unknown or already-free block");
            return;
        };
        self.blocks[idx].free = true;
        self.blocks[idx].vm_id = GLOBAL_VM_ID;
        self.coalesce_at(idx);
    }

    fn coalesce_at(&mut self, idx: usize) {
        let mut idx = idx;
        if idx + 1 < self.blocks.len() && self.blocks[idx + 1].free {
            let next = self.blocks.remove(idx + 1);
            self.blocks[idx].size += next.size;
        }
        if idx > 0 && self.blocks[idx - 1].free {
            let cur = self.blocks.remove(idx);
            idx -= 1;
            self.blocks[idx].size += cur.size;
        }
    }

    /// Grow or shrink a live block, first in place, then by moving.
    ///
    /// On failure the original block is untouched and remains valid.
    pub fn realloc(&mut self, r: BlockRef, vm_id: u8, new_size: usize) -> Option<BlockRef> {
        let need = Self::fit(new_size);
        let idx = self.index_of(r)?;
        if self.blocks[idx].size < need
            && idx + 1 < self.blocks.len()
            && self.blocks[idx + 1].free
            && self.blocks[idx].size + self.blocks[idx + 1].size >= need
        {
            let next = self.blocks.remove(idx + 1);
            self.blocks[idx].size += next.size;
        }
        if self.blocks[idx].size >= need {
            let spare = self.blocks[idx].size - need;
            if spare as usize > BLOCK_HEADER_SIZE {
                let tail = Block {
                    offset: self.blocks[idx].offset + need,
                    size: spare,
                    vm_id: GLOBAL_VM_ID,
                    free: true,
                };
                self.blocks[idx].size = need;
                self.blocks.insert(idx + 1, tail);
                self.coalesce_at(idx + 1);
            }
            return Some(r);
        }
        let moved = self.alloc(vm_id, new_size)?;
        self.free(r);
        Some(moved)
    }

    /// Reassign the owner tag of a live block.
    pub(crate) fn retag(&mut self, r: BlockRef, vm_id: u8) {
        if let Some(idx) = self.index_of(r) {
            self.blocks[idx].vm_id = vm_id;
        }
    }

    /// Release every block tagged with `vm_id` in one sweep.
    pub fn free_all(&mut self, vm_id: u8) {
        for b in &mut self.blocks {
            if !b.free && b.vm_id == vm_id {
                b.free = true;
                b.vm_id = GLOBAL_VM_ID;
            }
        }
        let mut idx = 0;
        while idx + 1 < self.blocks.len() {
            if self.blocks[idx].free && self.blocks[idx + 1].free {
                let next = self.blocks.remove(idx + 1);
                self.blocks[idx].size += next.size;
            } else {
                idx += 1;
            }
        }
    }

    /// Usage snapshot for diagnostics.
    pub fn statistics(&self) -> Statistics {
        let used: u32 = self.blocks.iter().filter(|b| !b.free).map(|b| b.size).sum();
        let largest: u32 = self
            .blocks
            .iter()
            .filter(|b| b.free)
            .map(|b| b.size)
            .max()
            .unwrap_or(0);
        Statistics {
            total: self.total as usize,
            used: used as usize,
            free: (self.total - used) as usize,
            fragmentation: largest as usize,
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut expect = 0;
        let mut prev_free = false;
        for b in &self.blocks {
            assert_eq!(b.offset, expect, "ledger must be contiguous");
            assert!(b.size > 0);
            assert!(!(prev_free && b.free), "adjacent free blocks must merge");
            prev_free = b.free;
            expect += b.size;
        }
        assert_eq!(expect, self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use quickcheck_macros::quickcheck;

    #[test]
    fn alloc_free_returns_to_baseline() {
        let mut pool = MemoryPool::new(1024);
        let baseline = pool.statistics().used;
        let a = pool.alloc(1, 100).unwrap();
        let b = pool.alloc(2, 40).unwrap();
        assert!(pool.statistics().used > baseline);
        pool.free(a);
        pool.free(b);
        assert_eq!(pool.statistics().used, baseline);
        assert_eq!(pool.statistics().fragmentation, pool.statistics().free);
    }

    #[test]
    fn exhaustion_reports_none() {
        let mut pool = MemoryPool::new(256);
        let mut live = Vec::new();
        while let Some(r) = pool.alloc(1, 32) {
            live.push(r);
        }
        assert!(!live.is_empty());
        assert!(pool.alloc(1, 32).is_none());
        pool.free_all(1);
        assert!(pool.alloc(1, 32).is_some());
    }

    #[test]
    fn free_all_only_touches_the_given_vm() {
        let mut pool = MemoryPool::new(1024);
        let keep = pool.alloc(2, 64).unwrap();
        let _drop1 = pool.alloc(1, 64).unwrap();
        let _drop2 = pool.alloc(1, 64).unwrap();
        let used_with_keep = {
            let mut probe = MemoryPool::new(1024);
            let _ = probe.alloc(2, 64).unwrap();
            probe.statistics().used
        };
        pool.free_all(1);
        assert_eq!(pool.statistics().used, used_with_keep);
        pool.free(keep);
        assert_eq!(pool.statistics().used, 0);
    }

    #[test]
    fn realloc_grows_in_place_when_the_neighbour_is_free() {
        let mut pool = MemoryPool::new(1024);
        let r = pool.alloc(1, 32).unwrap();
        let grown = pool.realloc(r, 1, 200).unwrap();
        assert_eq!(grown, r);
        pool.check_invariants();
    }

    #[test]
    fn realloc_failure_keeps_the_block_valid() {
        let mut pool = MemoryPool::new(256);
        let r = pool.alloc(1, 64).unwrap();
        let _wall = pool.alloc(2, 128).unwrap();
        assert!(pool.realloc(r, 1, 4096).is_none());
        // still freeable, accounting intact
        pool.free(r);
        pool.check_invariants();
    }

    #[quickcheck]
    fn ledger_invariants_hold_under_random_traffic(ops: Vec<(u8, u16)>) {
        let mut pool = MemoryPool::new(4096);
        let mut live: Vec<BlockRef> = Vec::new();
        for (op, n) in ops {
            match op % 4 {
                0 => {
                    if let Some(r) = pool.alloc(1 + op % 3, 1 + (n as usize % 200)) {
                        live.push(r);
                    }
                }
                1 => {
                    if !live.is_empty() {
                        let r = live.swap_remove(n as usize % live.len());
                        pool.free(r);
                    }
                }
                2 => {
                    if !live.is_empty() {
                        let i = n as usize % live.len();
                        if let Some(r) = pool.realloc(live[i], 1, 1 + (n as usize % 400)) {
                            live[i] = r;
                        }
                    }
                }
                _ => {
                    pool.free_all(1 + op % 3);
                    live.clear();
                    // other vms' refs may survive; drop tracking entirely
                }
            }
            pool.check_invariants();
            let s = pool.statistics();
            assert_eq!(s.used + s.free, s.total);
            assert!(s.fragmentation <= s.free);
        }
    }
}
