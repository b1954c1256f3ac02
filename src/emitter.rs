use cgmath::{InnerSpace, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use crate::bounds::{estimate_bounds, Aabb};
use crate::injection::{InjectionQueue, NewParticleRecord};
use crate::sim_params::{EmitterParams, SolverParams};
use crate::state_buffer::SimulationResources;
use crate::tile_set::EmitterTileSet;

const TRUNCATION_WARNING_PERIOD: Duration = Duration::from_secs(1);

/// How an emitter's origin evolves. Dispatch is explicit by kind; an
/// emitter has exactly one of these capabilities.
#[derive(Debug, Clone, Copy)]
pub enum EmitterDrive {
    /// The origin never moves.
    Anchored,
    /// The origin is pushed in from outside (an actor transform) between
    /// steps via `set_origin`.
    External,
    /// The origin integrates a constant velocity.
    Ballistic { velocity: Vector3<f32> },
}

/// One emitter's spawn state and tile ownership.
pub struct EmitterInstance {
    label: String,
    pub params: EmitterParams,
    drive: EmitterDrive,

    origin: Point3<f32>,
    // Origin as of the end of the previous step; spawn positions are
    // interpolated across the step's motion.
    prev_origin: Point3<f32>,

    pub tiles: EmitterTileSet,
    time: f32,
    spawn_fraction: f32,
    pending_burst: u32,
    rng: StdRng,
    last_truncation_warning: Option<Instant>,
    active_particles: u32,
}

impl EmitterInstance {
    pub fn new(
        label: &str,
        params: EmitterParams,
        drive: EmitterDrive,
        origin: Point3<f32>,
        particles_per_tile: u32,
        seed: u64,
    ) -> Self {
        EmitterInstance {
            label: label.to_string(),
            params,
            drive,
            origin,
            prev_origin: origin,
            tiles: EmitterTileSet::new(particles_per_tile),
            time: 0.0,
            spawn_fraction: 0.0,
            pending_burst: 0,
            rng: StdRng::seed_from_u64(seed),
            last_truncation_warning: None,
            active_particles: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn origin(&self) -> Point3<f32> {
        self.origin
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Active tiles count as full; per-slot occupancy exists only on the
    /// GPU.
    pub fn active_particle_estimate(&self) -> u32 {
        self.active_particles
    }

    /// Tiles this emitter keeps allocated: the spawn-rate estimate plus
    /// slack, capped.
    pub fn min_tile_count(&self, solver: &SolverParams, particles_per_tile: u32) -> usize {
        let est_particles = self.params.emission_rate * self.params.lifetime_max;
        let est_tiles = (est_particles / particles_per_tile as f32).ceil() as usize;
        let slack = (solver.tile_slack * est_tiles as f32).ceil() as usize;
        (est_tiles + slack).min(solver.max_tile_preallocation as usize)
    }

    /// Preallocates the emitter's expected tile footprint.
    pub fn init(&mut self, solver: &SolverParams, resources: &SimulationResources) {
        let per_tile = resources.layout().particles_per_tile();
        let wanted = self.min_tile_count(solver, per_tile);
        self.tiles
            .ensure_minimum_capacity(wanted, resources.tile_allocator());
        log::info!(
            "Emitter {} preallocated {} tiles",
            self.label,
            self.tiles.allocated_tile_count()
        );
    }

    /// Moves the emitter. Only externally driven emitters accept this.
    pub fn set_origin(&mut self, origin: Point3<f32>) {
        debug_assert!(
            matches!(self.drive, EmitterDrive::External),
            "set_origin on a non-external emitter"
        );
        self.origin = origin;
    }

    /// Requests `count` extra particles on top of the configured rate,
    /// spread over the next steps as the per-step cap allows.
    pub fn burst(&mut self, count: u32) {
        self.pending_burst = self.pending_burst.saturating_add(count);
    }

    /// Kills every particle owned by this emitter. Tiles stay allocated.
    pub fn kill_all(&mut self) {
        self.tiles.kill_all();
        self.active_particles = 0;
    }

    pub fn estimate_bounds(&self) -> Aabb {
        estimate_bounds(self.origin, self.params.bounds_extent)
    }

    /// One simulation step for this emitter: expire tiles, advance the
    /// origin, spawn, then release surplus tiles. New particle records go
    /// into `injection` for the step's flush.
    pub fn tick(
        &mut self,
        dt: f32,
        solver: &SolverParams,
        resources: &SimulationResources,
        injection: &mut InjectionQueue,
    ) {
        self.time += dt;
        let old_origin = self.prev_origin;

        self.tiles.mark_expired_tiles_inactive(self.time);

        match self.drive {
            EmitterDrive::Anchored | EmitterDrive::External => {}
            EmitterDrive::Ballistic { velocity } => {
                self.origin += velocity * dt;
            }
        }

        // Burst first, then rate spawning, both under one per-step cap.
        // Whatever the cap pushes out carries over to the next step.
        let cap = solver.max_spawn_per_step;
        let burst_count = self.pending_burst.min(cap);
        self.pending_burst -= burst_count;

        let accumulated = self.spawn_fraction + self.params.emission_rate * dt;
        let mut rate_count = accumulated as u32;
        self.spawn_fraction = accumulated - rate_count as f32;
        rate_count = rate_count.min(cap - burst_count);

        let wanted = (burst_count + rate_count) as usize;
        if wanted > 0 {
            self.spawn(wanted, old_origin, resources, injection);
        }

        let per_tile = resources.layout().particles_per_tile();
        let floor = self.min_tile_count(solver, per_tile);
        self.tiles
            .release_excess_tiles(floor, resources.tile_allocator());

        self.active_particles = self.tiles.active_tile_count() as u32 * per_tile;
        self.prev_origin = self.origin;
    }

    fn spawn(
        &mut self,
        wanted: usize,
        old_origin: Point3<f32>,
        resources: &SimulationResources,
        injection: &mut InjectionQueue,
    ) {
        let descriptors = self.tiles.reserve_slots(wanted, resources.tile_allocator());
        if descriptors.len() < wanted {
            self.warn_truncated(wanted, descriptors.len());
        }
        let layout = *resources.layout();
        let count = descriptors.len();
        for (i, descriptor) in descriptors.into_iter().enumerate() {
            let lifetime = self
                .rng
                .gen_range(self.params.lifetime_min..=self.params.lifetime_max);
            let time_scale = (1.0 / lifetime.max(1.0e-3)).max(1.0e-3);

            let speed = self
                .rng
                .gen_range(self.params.speed_min..=self.params.speed_max);
            let spread = self.params.spread;
            let direction = Vector3::new(
                spread * self.rng.gen_range(-1.0..=1.0),
                1.0,
                spread * self.rng.gen_range(-1.0..=1.0),
            )
            .normalize();
            let mut velocity = direction * speed;

            // Spread spawn positions along the emitter's motion over the
            // step.
            let interp = (i + 1) as f32 / count as f32;
            let mut position = self.origin + (old_origin - self.origin) * interp;
            let mut relative_time = 0.0;

            if self.time < self.params.warmup_time {
                let warmup = self.params.warmup_time - self.time;
                let acceleration = Vector3::from(self.params.constant_acceleration);
                position += (velocity + acceleration * (0.5 * warmup)) * warmup;
                velocity += acceleration * warmup;
                relative_time += time_scale * warmup;
            }

            let (texel_x, texel_y) = layout.slot_texel(descriptor.tile, descriptor.sub_slot);
            injection.push(NewParticleRecord {
                position: [position.x, position.y, position.z],
                relative_time,
                velocity: [velocity.x, velocity.y, velocity.z],
                time_scale,
                density: 1.0,
                texel_x,
                texel_y,
                pad: 0,
            });
            self.tiles
                .update_tile_lifetime(&descriptor, self.time + lifetime);
        }
    }

    fn warn_truncated(&mut self, wanted: usize, got: usize) {
        let now = Instant::now();
        let due = match self.last_truncation_warning {
            Some(at) => now.duration_since(at) >= TRUNCATION_WARNING_PERIOD,
            None => true,
        };
        if due {
            log::warn!(
                "Failed to allocate tiles for {}: {} new particles truncated to {}",
                self.label,
                wanted,
                got
            );
            self.last_truncation_warning = Some(now);
        }
    }

    /// Returns every tile at teardown.
    pub fn release_resources(&mut self, resources: &SimulationResources) {
        self.tiles.release_all(resources.tile_allocator());
        self.active_particles = 0;
    }
}
