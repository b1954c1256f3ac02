use cgmath::Point3;
use std::sync::Arc;

use crate::atlas::AtlasLayout;
use crate::bounds::{self, Aabb};
use crate::device::RenderDevice;
use crate::emitter::{EmitterDrive, EmitterInstance};
use crate::injection::InjectionQueue;
use crate::render_queue::RenderQueue;
use crate::sim_params::{EmitterParams, SolverParams};
use crate::state_buffer::SimulationResources;

/// Generation-checked reference to a registered emitter. A handle to a
/// destroyed emitter keeps failing lookups even after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterHandle {
    index: usize,
    generation: u32,
}

struct EmitterSlot {
    generation: u32,
    instance: Option<EmitterInstance>,
}

/// Owns the shared simulation resources and the registered emitters, and
/// drives the per-step pipeline:
/// expire -> update/spawn -> reserve -> release -> clear -> inject -> swap
/// -> integrate. CPU-side bookkeeping happens inline; every texture effect
/// is enqueued on the render command stream in that order.
pub struct Solver {
    params: SolverParams,
    pub resources: Arc<SimulationResources>,
    slots: Vec<EmitterSlot>,
    free_slots: Vec<usize>,
    injection: InjectionQueue,
    integrator: Option<Arc<dyn Fn(&mut dyn RenderDevice) + Send + Sync>>,
    time: f32,
    next_seed: u64,
}

impl Solver {
    pub fn new(params: SolverParams, layout: AtlasLayout) -> Self {
        Solver {
            params,
            resources: SimulationResources::new(layout),
            slots: Vec::new(),
            free_slots: Vec::new(),
            injection: InjectionQueue::new(),
            integrator: None,
            time: 0.0,
            next_seed: 1,
        }
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn free_tile_count(&self) -> usize {
        self.resources.free_tile_count()
    }

    /// Enqueues allocation of the double-buffered state textures.
    pub fn init_resources(&self, queue: &RenderQueue) {
        let resources = self.resources.clone();
        queue.enqueue(move |device| resources.state.lock().unwrap().init(device));
    }

    /// The integration kernel dispatch, supplied by the surrounding
    /// effects system. Enqueued at the end of every working step, after
    /// the swap.
    pub fn set_integrator<F>(&mut self, integrator: F)
    where
        F: Fn(&mut dyn RenderDevice) + Send + Sync + 'static,
    {
        self.integrator = Some(Arc::new(integrator));
    }

    pub fn spawn_emitter(
        &mut self,
        label: &str,
        params: EmitterParams,
        drive: EmitterDrive,
        origin: Point3<f32>,
    ) -> EmitterHandle {
        let mut instance = EmitterInstance::new(
            label,
            params,
            drive,
            origin,
            self.resources.layout().particles_per_tile(),
            self.next_seed,
        );
        self.next_seed += 1;
        instance.init(&self.params, &self.resources);

        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index].instance = Some(instance);
                index
            }
            None => {
                self.slots.push(EmitterSlot {
                    generation: 0,
                    instance: Some(instance),
                });
                self.slots.len() - 1
            }
        };
        EmitterHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    pub fn emitter(&self, handle: EmitterHandle) -> Option<&EmitterInstance> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.instance.as_ref()
    }

    pub fn emitter_mut(&mut self, handle: EmitterHandle) -> Option<&mut EmitterInstance> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.instance.as_mut()
    }

    pub fn emitter_count(&self) -> usize {
        self.slots.iter().filter(|s| s.instance.is_some()).count()
    }

    /// Tears the emitter down and returns its tiles. The handle (and any
    /// copy of it) goes stale. Returns false if it already was.
    pub fn destroy_emitter(&mut self, handle: EmitterHandle) -> bool {
        // Between steps the injection queue is empty, so no in-flight
        // record can reference the tiles being returned.
        debug_assert!(self.injection.is_empty());
        let slot = match self.slots.get_mut(handle.index) {
            Some(slot) if slot.generation == handle.generation => slot,
            _ => return false,
        };
        match slot.instance.take() {
            Some(mut instance) => {
                instance.release_resources(&self.resources);
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(handle.index);
                log::info!("Destroyed emitter {}", instance.label());
                true
            }
            None => false,
        }
    }

    /// Advances every emitter by `dt` and enqueues the step's texture
    /// work. An idle solver (no emitters, nothing buffered) enqueues
    /// nothing and legitimately skips the swap.
    pub fn step(&mut self, dt: f32, queue: &RenderQueue) {
        self.time += dt;
        if self.emitter_count() == 0 && self.injection.is_empty() {
            return;
        }

        {
            let resources = self.resources.clone();
            queue.enqueue(move |_| resources.state.lock().unwrap().begin_step());
        }

        let mut tiles_to_clear = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(instance) = slot.instance.as_mut() {
                instance.tick(dt, &self.params, &self.resources, &mut self.injection);
                tiles_to_clear.extend(instance.tiles.take_pending_clears());
            }
        }

        if !tiles_to_clear.is_empty() {
            let resources = self.resources.clone();
            queue.enqueue(move |device| {
                resources
                    .state
                    .lock()
                    .unwrap()
                    .clear_tiles(device, &tiles_to_clear)
            });
        }

        self.injection.flush(&self.resources, queue);

        {
            let resources = self.resources.clone();
            queue.enqueue(move |_| resources.state.lock().unwrap().swap());
        }

        if let Some(integrator) = self.integrator.clone() {
            queue.enqueue(move |device| integrator(device));
        }
    }

    /// Exact bounds of one emitter's live particles. Blocks on a device
    /// readback; tooling and editor use only. Returns `None` for a stale
    /// handle.
    pub fn compute_exact_bounds(
        &self,
        handle: EmitterHandle,
        queue: &RenderQueue,
    ) -> Option<Aabb> {
        let instance = self.emitter(handle)?;
        Some(bounds::compute_exact_bounds(
            instance.tiles.allocated_tiles(),
            &self.resources,
            queue,
            0.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use crate::render_queue::render_channel;
    use crate::state_buffer::DEAD_RELATIVE_TIME;

    fn test_solver() -> Solver {
        let params = SolverParams {
            max_tile_preallocation: 4,
            max_spawn_per_step: 100000,
            ..SolverParams::default()
        };
        // 16 tiles of 16 slots.
        Solver::new(params, AtlasLayout::new(16, 16, 4))
    }

    fn burst_params() -> EmitterParams {
        EmitterParams {
            emission_rate: 0.0,
            lifetime_min: 1.0,
            lifetime_max: 1.0,
            ..EmitterParams::default()
        }
    }

    #[test]
    fn stale_handles_stay_stale_after_slot_reuse() {
        let mut solver = test_solver();
        let first = solver.spawn_emitter(
            "first",
            burst_params(),
            EmitterDrive::Anchored,
            Point3::new(0.0, 0.0, 0.0),
        );
        assert!(solver.emitter(first).is_some());
        assert!(solver.destroy_emitter(first));
        assert!(solver.emitter(first).is_none());
        assert!(!solver.destroy_emitter(first));

        let second = solver.spawn_emitter(
            "second",
            burst_params(),
            EmitterDrive::Anchored,
            Point3::new(0.0, 0.0, 0.0),
        );
        // The slot is recycled but the old handle still misses.
        assert!(solver.emitter(second).is_some());
        assert!(solver.emitter(first).is_none());
        assert_eq!(solver.emitter_count(), 1);
    }

    #[test]
    fn destroying_an_emitter_returns_its_tiles() {
        let mut solver = test_solver();
        let (queue, stream) = render_channel();
        let mut device = SoftwareDevice::new();
        solver.init_resources(&queue);

        let handle = solver.spawn_emitter(
            "burst",
            burst_params(),
            EmitterDrive::Anchored,
            Point3::new(0.0, 0.0, 0.0),
        );
        solver.emitter_mut(handle).unwrap().burst(100);
        solver.step(0.01, &queue);
        stream.run_pending(&mut device);
        assert!(solver.free_tile_count() < 16);

        solver.destroy_emitter(handle);
        assert_eq!(solver.free_tile_count(), 16);
    }

    #[test]
    fn step_pipeline_injects_then_swaps() {
        let mut solver = test_solver();
        let (queue, stream) = render_channel();
        let mut device = SoftwareDevice::new();
        solver.init_resources(&queue);
        stream.run_pending(&mut device);

        let handle = solver.spawn_emitter(
            "burst",
            burst_params(),
            EmitterDrive::Anchored,
            Point3::new(0.0, 0.0, 0.0),
        );
        solver.emitter_mut(handle).unwrap().burst(3);
        solver.step(0.01, &queue);
        stream.run_pending(&mut device);

        // Injection wrote into what was current before the swap, which the
        // integrator now reads as previous.
        let state = solver.resources.state.lock().unwrap();
        let layout = *solver.resources.layout();
        let tile = solver.emitter(handle).unwrap().tiles.allocated_tiles()[0];
        let (x, y) = layout.slot_texel(tile, 0);
        let seeded = device.texel(state.previous().position, x, y);
        assert!(seeded[3] < DEAD_RELATIVE_TIME);
        let fresh = device.texel(state.current().position, x, y);
        assert!(fresh[3] >= DEAD_RELATIVE_TIME);
    }

    #[test]
    fn idle_solver_skips_the_swap() {
        let mut solver = test_solver();
        let (queue, stream) = render_channel();
        let mut device = SoftwareDevice::new();
        solver.init_resources(&queue);
        stream.run_pending(&mut device);

        let before = {
            let state = solver.resources.state.lock().unwrap();
            state.current().position
        };
        solver.step(0.5, &queue);
        assert_eq!(stream.run_pending(&mut device), 0);
        let after = {
            let state = solver.resources.state.lock().unwrap();
            state.current().position
        };
        assert_eq!(before, after);
    }

    #[test]
    fn integrator_runs_after_the_swap() {
        let mut solver = test_solver();
        let (queue, stream) = render_channel();
        let mut device = SoftwareDevice::new();
        solver.init_resources(&queue);

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            let resources = solver.resources.clone();
            solver.set_integrator(move |_| {
                let state = resources.state.lock().unwrap();
                seen.lock().unwrap().push(state.current().position);
            });
        }

        let handle = solver.spawn_emitter(
            "burst",
            burst_params(),
            EmitterDrive::Anchored,
            Point3::new(0.0, 0.0, 0.0),
        );
        solver.emitter_mut(handle).unwrap().burst(1);
        solver.step(0.01, &queue);
        solver.step(0.01, &queue);
        stream.run_pending(&mut device);

        // The integrator saw the post-swap current set each step, and the
        // two steps alternated buffers.
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
        let state = solver.resources.state.lock().unwrap();
        assert_eq!(seen[1], state.current().position);
    }

    #[test]
    fn exact_bounds_go_through_the_registry() {
        let mut solver = test_solver();
        let (queue, stream) = render_channel();
        let thread = stream.spawn(Box::new(SoftwareDevice::new()));
        solver.init_resources(&queue);

        // Warmup pushes the spawned particles off the origin so the box
        // has real extent.
        let handle = solver.spawn_emitter(
            "burst",
            EmitterParams {
                warmup_time: 1.0,
                ..burst_params()
            },
            EmitterDrive::Anchored,
            Point3::new(0.0, 0.0, 0.0),
        );
        solver.emitter_mut(handle).unwrap().burst(10);
        solver.step(0.01, &queue);

        let bounds = solver.compute_exact_bounds(handle, &queue).unwrap();
        assert!(bounds.max.y > 0.0);

        solver.destroy_emitter(handle);
        assert!(solver.compute_exact_bounds(handle, &queue).is_none());

        drop(queue);
        thread.join();
    }
}
