use std::sync::Mutex;

/// Free-stack allocator for particle tiles. Emitters may be updated from
/// worker threads, so the free list is guarded; everything else about a tile
/// (its texels, its liveness) is touched only by its owning tile set.
///
/// Exhaustion is not an error. `allocate` returns `None` and the caller
/// truncates whatever it was doing.
pub struct TileAllocator {
    capacity: u32,
    free_tiles: Mutex<Vec<u32>>,
}

impl TileAllocator {
    pub fn new(tile_count: u32) -> Self {
        // Stacked so that tile 0 is allocated first.
        let free_tiles = (0..tile_count).rev().collect();
        TileAllocator {
            capacity: tile_count,
            free_tiles: Mutex::new(free_tiles),
        }
    }

    /// O(1). Returns `None` when the pool is exhausted; never blocks beyond
    /// the lock.
    pub fn allocate(&self) -> Option<u32> {
        self.free_tiles.lock().unwrap().pop()
    }

    /// O(1). The tile must currently be allocated.
    pub fn free(&self, tile: u32) {
        let mut free_tiles = self.free_tiles.lock().unwrap();
        debug_assert!(tile < self.capacity);
        debug_assert!(free_tiles.len() < self.capacity as usize);
        debug_assert!(!free_tiles.contains(&tile), "double free of tile {}", tile);
        free_tiles.push(tile);
    }

    /// Diagnostic and backpressure signal.
    pub fn free_count(&self) -> usize {
        self.free_tiles.lock().unwrap().len()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_and_lifo_reuse() {
        let allocator = TileAllocator::new(1);
        let first = allocator.allocate();
        assert_eq!(first, Some(0));
        assert_eq!(allocator.allocate(), None);
        allocator.free(first.unwrap());
        // The just-freed tile comes back.
        assert_eq!(allocator.allocate(), Some(0));
    }

    #[test]
    fn allocates_low_tiles_first() {
        let allocator = TileAllocator::new(4);
        assert_eq!(allocator.allocate(), Some(0));
        assert_eq!(allocator.allocate(), Some(1));
    }

    #[test]
    fn free_count_accounts_for_every_tile() {
        let allocator = TileAllocator::new(64);
        let mut held = Vec::new();
        for step in 0..200 {
            if step % 3 == 2 && !held.is_empty() {
                allocator.free(held.swap_remove(step % held.len()));
            } else if let Some(tile) = allocator.allocate() {
                held.push(tile);
            }
            assert_eq!(allocator.free_count() + held.len(), 64);
        }
    }

    #[test]
    fn concurrent_churn_loses_no_tiles() {
        let allocator = std::sync::Arc::new(TileAllocator::new(128));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let allocator = allocator.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    if let Some(tile) = allocator.allocate() {
                        allocator.free(tile);
                    }
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(allocator.free_count(), 128);
    }
}
