use crate::device::TexelWrite;
use crate::render_queue::RenderQueue;
use crate::state_buffer::SimulationResources;
use std::sync::Arc;

gflags::define! {
    /// Maximum number of new particles written per injection batch.
    --injection_batch_size: usize = 1024
}

// This layout is what the injection pass uploads; it should stay in sync
// with whatever the integration kernel expects to find in the state texels.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NewParticleRecord {
    pub position: [f32; 3],
    /// Age in lifetimes, 0 at spawn, dead at 1.
    pub relative_time: f32,
    pub velocity: [f32; 3],
    /// Reciprocal lifetime. Stored next to velocity in the state texture.
    pub time_scale: f32,
    pub density: f32,
    /// Target slot, as absolute atlas texel coordinates.
    pub texel_x: u32,
    pub texel_y: u32,
    pub pad: u32,
}

/// Buffers newly spawned particles between the spawn phase and the GPU,
/// then seeds their reserved slots in the current state set. Records are
/// produced once, consumed by one flush, and discarded.
pub struct InjectionQueue {
    records: Vec<NewParticleRecord>,
}

impl InjectionQueue {
    pub fn new() -> Self {
        InjectionQueue {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: NewParticleRecord) {
        self.records.push(record);
    }

    pub fn append(&mut self, records: &mut Vec<NewParticleRecord>) {
        self.records.append(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Enqueues device writes seeding position, velocity and density for
    /// every buffered record, in size-bounded batches, then clears the
    /// queue. Must run after this step's slot reservations and before
    /// integration reads the buffer. With nothing queued this is a no-op.
    pub fn flush(&mut self, resources: &Arc<SimulationResources>, queue: &RenderQueue) {
        if self.records.is_empty() {
            return;
        }
        let batch_size = INJECTION_BATCH_SIZE.flag.max(1);
        log::debug!(
            "Flushing {} new particles in batches of {}",
            self.records.len(),
            batch_size
        );
        for batch in self.records.chunks(batch_size) {
            let batch = batch.to_vec();
            let resources = resources.clone();
            queue.enqueue(move |device| {
                let mut state = resources.state.lock().unwrap();
                state.ensure_cleared(device);

                let mut positions = Vec::with_capacity(batch.len());
                let mut velocities = Vec::with_capacity(batch.len());
                let mut densities = Vec::with_capacity(batch.len());
                for record in &batch {
                    let p = record.position;
                    let v = record.velocity;
                    positions.push(TexelWrite {
                        x: record.texel_x,
                        y: record.texel_y,
                        value: [p[0], p[1], p[2], record.relative_time],
                    });
                    velocities.push(TexelWrite {
                        x: record.texel_x,
                        y: record.texel_y,
                        value: [v[0], v[1], v[2], record.time_scale],
                    });
                    densities.push(TexelWrite {
                        x: record.texel_x,
                        y: record.texel_y,
                        value: [record.density, 0.0, 0.0, 0.0],
                    });
                }
                let current = state.current();
                device.write_texels(current.position, &positions);
                device.write_texels(current.velocity, &velocities);
                device.write_texels(current.density, &densities);
            });
        }
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasLayout;
    use crate::device::SoftwareDevice;
    use crate::render_queue::render_channel;

    fn record(texel: (u32, u32), seed: f32) -> NewParticleRecord {
        NewParticleRecord {
            position: [seed, seed + 1.0, seed + 2.0],
            relative_time: 0.0,
            velocity: [0.5, -0.5, 0.25],
            time_scale: 0.2,
            density: seed * 10.0,
            texel_x: texel.0,
            texel_y: texel.1,
            pad: 0,
        }
    }

    #[test]
    fn flush_seeds_reserved_slots() {
        let resources = SimulationResources::new(AtlasLayout::new(16, 16, 4));
        let (queue, stream) = render_channel();
        let mut device = SoftwareDevice::new();
        resources.state.lock().unwrap().init(&mut device);

        let mut injection = InjectionQueue::new();
        injection.push(record((0, 0), 1.0));
        injection.push(record((5, 4), 2.0));
        injection.flush(&resources, &queue);
        assert!(injection.is_empty());

        stream.run_pending(&mut device);
        let state = resources.state.lock().unwrap();
        assert_eq!(
            device.texel(state.current().position, 5, 4),
            [2.0, 3.0, 4.0, 0.0]
        );
        assert_eq!(
            device.texel(state.current().velocity, 5, 4),
            [0.5, -0.5, 0.25, 0.2]
        );
        assert_eq!(device.texel(state.current().density, 0, 0)[0], 10.0);
        // Untouched slots hold the neutral clear.
        assert_eq!(
            device.texel(state.current().position, 1, 0),
            crate::state_buffer::CLEAR_POSITION
        );
    }

    #[test]
    fn empty_flush_enqueues_nothing() {
        let resources = SimulationResources::new(AtlasLayout::new(16, 16, 4));
        let (queue, stream) = render_channel();
        let mut injection = InjectionQueue::new();
        injection.flush(&resources, &queue);
        let mut device = SoftwareDevice::new();
        assert_eq!(stream.run_pending(&mut device), 0);
    }

    #[test]
    fn append_moves_records() {
        let mut injection = InjectionQueue::new();
        let mut batch = vec![record((0, 0), 0.0), record((1, 0), 1.0)];
        injection.append(&mut batch);
        assert!(batch.is_empty());
        assert_eq!(injection.len(), 2);
    }
}
