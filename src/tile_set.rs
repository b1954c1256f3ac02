use crate::tile_allocator::TileAllocator;

/// One reserved particle slot, handed back from `reserve_slots`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDescriptor {
    /// Atlas tile index holding the slot.
    pub tile: u32,
    /// Slot within the tile, `0..particles_per_tile`.
    pub sub_slot: u32,
    /// Index of the tile in the owning set's allocated list.
    pub tile_list_index: usize,
}

/// The tiles owned by one emitter, with per-tile liveness and the cursor
/// used to pack new particles into partially filled tiles.
///
/// A tile's life cycle: allocated (queued for clearing) -> active while any
/// occupant is unexpired -> inactive once its time of death passes -> either
/// promoted back to active by `reserve_slots` or returned to the allocator
/// by `release_excess_tiles`.
pub struct EmitterTileSet {
    particles_per_tile: u32,

    /// Atlas tile indices, in allocation order.
    allocated: Vec<u32>,
    /// Parallel to `allocated`.
    active: Vec<bool>,
    /// Parallel to `allocated`. Latest death time of any particle placed in
    /// the tile.
    time_of_death: Vec<f32>,

    /// Tiles that need a clear pass before first use.
    pending_clear: Vec<u32>,

    /// Tile currently being filled, as an index into `allocated`.
    cursor: Option<usize>,
    free_slots_in_cursor: u32,
}

impl EmitterTileSet {
    pub fn new(particles_per_tile: u32) -> Self {
        EmitterTileSet {
            particles_per_tile,
            allocated: Vec::new(),
            active: Vec::new(),
            time_of_death: Vec::new(),
            pending_clear: Vec::new(),
            cursor: None,
            free_slots_in_cursor: 0,
        }
    }

    pub fn allocated_tile_count(&self) -> usize {
        self.check_parallel();
        self.allocated.len()
    }

    pub fn allocated_tiles(&self) -> &[u32] {
        &self.allocated
    }

    pub fn active_tile_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    pub fn is_tile_active(&self, tile_list_index: usize) -> bool {
        self.active[tile_list_index]
    }

    fn check_parallel(&self) {
        debug_assert_eq!(self.allocated.len(), self.active.len());
        debug_assert_eq!(self.allocated.len(), self.time_of_death.len());
    }

    /// Grows the set until it holds `min_tiles`, or the allocator runs out.
    /// Newly allocated tiles start inactive and are queued for clearing.
    /// Returns the number of tiles actually added.
    pub fn ensure_minimum_capacity(&mut self, min_tiles: usize, allocator: &TileAllocator) -> usize {
        self.check_parallel();
        let mut added = 0;
        while self.allocated.len() < min_tiles {
            match allocator.allocate() {
                Some(tile) => {
                    self.allocated.push(tile);
                    self.active.push(false);
                    self.time_of_death.push(0.0);
                    self.pending_clear.push(tile);
                    added += 1;
                }
                None => break,
            }
        }
        added
    }

    /// Deactivates every active tile whose time of death has passed. If the
    /// cursor pointed at such a tile it is reset. Idempotent for a fixed
    /// `current_time`. Returns the number of tiles still active.
    pub fn mark_expired_tiles_inactive(&mut self, current_time: f32) -> usize {
        self.check_parallel();
        let mut active_count = 0;
        for i in 0..self.allocated.len() {
            if !self.active[i] {
                continue;
            }
            if self.time_of_death[i] <= current_time {
                self.active[i] = false;
                if self.cursor == Some(i) {
                    self.cursor = None;
                    self.free_slots_in_cursor = 0;
                }
            } else {
                active_count += 1;
            }
        }
        active_count
    }

    /// Reserves a slot for each of `count` particles. The cursor tile is
    /// filled first; when it runs out the first inactive tile is promoted,
    /// and when none remains a fresh tile is allocated (queued for
    /// clearing). Returns fewer descriptors than requested when the global
    /// pool is exhausted; the shortfall is the caller's to degrade.
    ///
    /// No two descriptors from one call share a (tile, sub_slot) pair.
    pub fn reserve_slots(&mut self, count: usize, allocator: &TileAllocator) -> Vec<SlotDescriptor> {
        self.check_parallel();
        let mut descriptors = Vec::with_capacity(count);
        let mut active_count = self.active_tile_count();
        for _ in 0..count {
            if self.free_slots_in_cursor == 0 {
                if active_count < self.allocated.len() {
                    // Refill from a tile that has gone fully inactive.
                    let idx = self
                        .active
                        .iter()
                        .position(|a| !*a)
                        .expect("inactive tile must exist");
                    self.active[idx] = true;
                    self.cursor = Some(idx);
                } else {
                    match allocator.allocate() {
                        Some(tile) => {
                            self.allocated.push(tile);
                            self.active.push(true);
                            self.time_of_death.push(0.0);
                            self.pending_clear.push(tile);
                            self.cursor = Some(self.allocated.len() - 1);
                        }
                        None => {
                            // Out of tiles. Hand back what fit.
                            break;
                        }
                    }
                }
                active_count += 1;
                self.free_slots_in_cursor = self.particles_per_tile;
            }
            let idx = self.cursor.expect("cursor set above");
            let sub_slot = self.particles_per_tile - self.free_slots_in_cursor;
            descriptors.push(SlotDescriptor {
                tile: self.allocated[idx],
                sub_slot,
                tile_list_index: idx,
            });
            self.free_slots_in_cursor -= 1;
        }
        descriptors
    }

    /// Extends a tile's time of death to cover a particle placed in it.
    pub fn update_tile_lifetime(&mut self, slot: &SlotDescriptor, particle_expiry_time: f32) {
        let prev = self.time_of_death[slot.tile_list_index];
        self.time_of_death[slot.tile_list_index] = prev.max(particle_expiry_time);
    }

    /// Returns inactive tiles from the tail of the allocated list to the
    /// allocator, stopping at the first active tile and never shrinking
    /// below `minimum_to_keep`. Tail-only release keeps every remaining
    /// list index (the cursor included) valid. Returns the number freed.
    pub fn release_excess_tiles(&mut self, minimum_to_keep: usize, allocator: &TileAllocator) -> usize {
        self.check_parallel();
        let mut freed = 0;
        while self.allocated.len() > minimum_to_keep {
            let last = self.allocated.len() - 1;
            if self.active[last] {
                break;
            }
            if self.cursor == Some(last) {
                self.cursor = None;
                self.free_slots_in_cursor = 0;
            }
            let tile = self.allocated.pop().unwrap();
            self.active.pop();
            self.time_of_death.pop();
            self.pending_clear.retain(|t| *t != tile);
            allocator.free(tile);
            freed += 1;
        }
        if freed > 0 {
            log::debug!("Released {} excess tiles", freed);
        }
        freed
    }

    /// Kills every particle by deactivating all tiles and queueing them for
    /// a clear pass. The tiles stay allocated.
    pub fn kill_all(&mut self) {
        self.pending_clear.clear();
        self.pending_clear.extend_from_slice(&self.allocated);
        self.active.iter_mut().for_each(|a| *a = false);
        self.cursor = None;
        self.free_slots_in_cursor = 0;
    }

    /// Returns every tile to the allocator. Used at emitter teardown.
    pub fn release_all(&mut self, allocator: &TileAllocator) {
        for &tile in &self.allocated {
            allocator.free(tile);
        }
        self.allocated.clear();
        self.active.clear();
        self.time_of_death.clear();
        self.pending_clear.clear();
        self.cursor = None;
        self.free_slots_in_cursor = 0;
    }

    /// Drains the list of tiles awaiting their clear pass.
    pub fn take_pending_clears(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.pending_clear)
    }
}
