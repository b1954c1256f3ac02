use crate::atlas::AtlasLayout;
use crate::device::{RenderDevice, TexelFormat, TexelRect, TextureHandle};
use crate::tile_allocator::TileAllocator;
use std::sync::{Arc, Mutex};

/// Particles whose `position.w` reaches this value are dead. Cleared texels
/// start dead so that reads before the first injection see no particles.
pub const DEAD_RELATIVE_TIME: f32 = 1.0;

pub const CLEAR_POSITION: [f32; 4] = [0.0, 0.0, 0.0, DEAD_RELATIVE_TIME];
pub const CLEAR_VELOCITY: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
pub const CLEAR_DENSITY: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// One full-atlas set of particle state.
pub struct StateTextures {
    pub position: TextureHandle,
    pub velocity: TextureHandle,
    pub density: TextureHandle,
    cleared: bool,
}

impl StateTextures {
    fn create(device: &mut dyn RenderDevice, layout: &AtlasLayout, tag: &str) -> Self {
        StateTextures {
            position: device.create_texture_2d(
                layout.width,
                layout.height,
                TexelFormat::Rgba32Float,
                &format!("particle position {}", tag),
            ),
            velocity: device.create_texture_2d(
                layout.width,
                layout.height,
                TexelFormat::Rgba32Float,
                &format!("particle velocity {}", tag),
            ),
            density: device.create_texture_2d(
                layout.width,
                layout.height,
                TexelFormat::R32Float,
                &format!("particle density {}", tag),
            ),
            cleared: false,
        }
    }

    fn clear(&mut self, device: &mut dyn RenderDevice, layout: &AtlasLayout) {
        let full = TexelRect {
            x: 0,
            y: 0,
            width: layout.width,
            height: layout.height,
        };
        device.clear_texture_region(self.position, full, CLEAR_POSITION);
        device.clear_texture_region(self.velocity, full, CLEAR_VELOCITY);
        device.clear_texture_region(self.density, full, CLEAR_DENSITY);
        self.cleared = true;
    }
}

/// Two full-atlas state sets with a single parity bit selecting which one is
/// "current". The parity toggles at most once per simulation step; an idle
/// step may skip the swap and leave the previous contents valid one step
/// longer.
pub struct SimulationStateBuffer {
    layout: AtlasLayout,
    textures: Option<[StateTextures; 2]>,
    frame_index: usize,
    swapped_this_step: bool,
}

impl SimulationStateBuffer {
    pub fn new(layout: AtlasLayout) -> Self {
        SimulationStateBuffer {
            layout,
            textures: None,
            frame_index: 0,
            swapped_this_step: false,
        }
    }

    /// Allocates both texture sets. They stay logically uncleared until
    /// first written.
    pub fn init(&mut self, device: &mut dyn RenderDevice) {
        debug_assert!(self.textures.is_none(), "state buffer initialized twice");
        self.textures = Some([
            StateTextures::create(device, &self.layout, "a"),
            StateTextures::create(device, &self.layout, "b"),
        ]);
        log::info!(
            "Allocated particle state atlas ({}x{}, double buffered)",
            self.layout.width,
            self.layout.height
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.textures.is_some()
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// Re-arms the swap guard at the top of a step.
    pub fn begin_step(&mut self) {
        self.swapped_this_step = false;
    }

    /// Inverts the current/previous identities. Called at most once per
    /// step, after injection and before integration.
    pub fn swap(&mut self) {
        debug_assert!(
            !self.swapped_this_step,
            "state buffer swapped twice in one step"
        );
        self.frame_index ^= 0x1;
        self.swapped_this_step = true;
    }

    pub fn current(&self) -> &StateTextures {
        &self.textures.as_ref().expect("state buffer not initialized")[self.frame_index]
    }

    pub fn previous(&self) -> &StateTextures {
        &self.textures.as_ref().expect("state buffer not initialized")[self.frame_index ^ 0x1]
    }

    /// Lazily clears any still-uncleared set. Runs before the first use of
    /// either set as a write target so that reads never observe creation
    /// garbage.
    pub fn ensure_cleared(&mut self, device: &mut dyn RenderDevice) {
        let layout = self.layout;
        let textures = self.textures.as_mut().expect("state buffer not initialized");
        for set in textures.iter_mut() {
            if !set.cleared {
                set.clear(device, &layout);
            }
        }
    }

    /// Resets the given tiles to the neutral clear values in both parity
    /// sets. Runs before the same step's injection flush, so a clear can
    /// never land on top of freshly injected particles.
    pub fn clear_tiles(&mut self, device: &mut dyn RenderDevice, tiles: &[u32]) {
        self.ensure_cleared(device);
        let layout = self.layout;
        let textures = self.textures.as_mut().expect("state buffer not initialized");
        for set in textures.iter_mut() {
            for &tile in tiles {
                let (x, y) = layout.tile_origin(tile);
                let rect = TexelRect {
                    x,
                    y,
                    width: layout.tile_size,
                    height: layout.tile_size,
                };
                device.clear_texture_region(set.position, rect, CLEAR_POSITION);
                device.clear_texture_region(set.velocity, rect, CLEAR_VELOCITY);
                device.clear_texture_region(set.density, rect, CLEAR_DENSITY);
            }
        }
    }
}

/// Solver-scoped bundle of the shared simulation resources: the tile pool
/// and the double-buffered state. One per solver, handed to every emitter
/// by shared ownership instead of living in globals. The allocator side is
/// callable from worker threads; the state side is only touched from render
/// commands.
pub struct SimulationResources {
    layout: AtlasLayout,
    tile_allocator: TileAllocator,
    pub state: Mutex<SimulationStateBuffer>,
}

impl SimulationResources {
    pub fn new(layout: AtlasLayout) -> Arc<Self> {
        Arc::new(SimulationResources {
            layout,
            tile_allocator: TileAllocator::new(layout.tile_count()),
            state: Mutex::new(SimulationStateBuffer::new(layout)),
        })
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    pub fn tile_allocator(&self) -> &TileAllocator {
        &self.tile_allocator
    }

    pub fn free_tile_count(&self) -> usize {
        self.tile_allocator.free_count()
    }
}
