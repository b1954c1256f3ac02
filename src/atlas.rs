// Dimensions of the particle state atlas. Every state texture is this size
// and is partitioned into square tiles of TILE_SIZE x TILE_SIZE slots, one
// slot per particle.
pub const ATLAS_WIDTH: u32 = 1024;
pub const ATLAS_HEIGHT: u32 = 1024;
pub const TILE_SIZE: u32 = 32;

pub const TILE_COUNT_X: u32 = ATLAS_WIDTH / TILE_SIZE;
pub const TILE_COUNT_Y: u32 = ATLAS_HEIGHT / TILE_SIZE;
pub const TILE_COUNT: u32 = TILE_COUNT_X * TILE_COUNT_Y;
pub const PARTICLES_PER_TILE: u32 = TILE_SIZE * TILE_SIZE;

// The addressing math assumes all of these.
const _: () = assert!(ATLAS_WIDTH.is_power_of_two());
const _: () = assert!(ATLAS_HEIGHT.is_power_of_two());
const _: () = assert!(TILE_SIZE.is_power_of_two());
const _: () = assert!(TILE_SIZE <= ATLAS_WIDTH);
const _: () = assert!(TILE_SIZE <= ATLAS_HEIGHT);
const _: () = assert!(ATLAS_WIDTH % TILE_SIZE == 0);
const _: () = assert!(ATLAS_HEIGHT % TILE_SIZE == 0);

/// Runtime copy of the atlas geometry. Production code uses `default()`,
/// which mirrors the compile-time constants; tests build smaller grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
}

impl Default for AtlasLayout {
    fn default() -> Self {
        AtlasLayout {
            width: ATLAS_WIDTH,
            height: ATLAS_HEIGHT,
            tile_size: TILE_SIZE,
        }
    }
}

impl AtlasLayout {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        assert!(width.is_power_of_two());
        assert!(height.is_power_of_two());
        assert!(tile_size.is_power_of_two());
        assert!(tile_size <= width && tile_size <= height);
        AtlasLayout {
            width,
            height,
            tile_size,
        }
    }

    pub fn tile_count_x(&self) -> u32 {
        self.width / self.tile_size
    }

    pub fn tile_count_y(&self) -> u32 {
        self.height / self.tile_size
    }

    pub fn tile_count(&self) -> u32 {
        self.tile_count_x() * self.tile_count_y()
    }

    pub fn particles_per_tile(&self) -> u32 {
        self.tile_size * self.tile_size
    }

    /// Texel coordinates of a tile's upper-left corner.
    pub fn tile_origin(&self, tile: u32) -> (u32, u32) {
        debug_assert!(tile < self.tile_count());
        let x = (tile % self.tile_count_x()) * self.tile_size;
        let y = (tile / self.tile_count_x()) * self.tile_size;
        (x, y)
    }

    /// Texel coordinates of one particle slot. Slots fill a tile row-major.
    pub fn slot_texel(&self, tile: u32, sub_slot: u32) -> (u32, u32) {
        debug_assert!(sub_slot < self.particles_per_tile());
        let (ox, oy) = self.tile_origin(tile);
        (
            ox + sub_slot % self.tile_size,
            oy + sub_slot / self.tile_size,
        )
    }
}
