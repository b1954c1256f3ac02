use crate::device::TexelRect;
use crate::render_queue::RenderQueue;
use crate::state_buffer::{SimulationResources, DEAD_RELATIVE_TIME};
use cgmath::Point3;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn zero() -> Self {
        Aabb {
            min: Point3::new(0.0, 0.0, 0.0),
            max: Point3::new(0.0, 0.0, 0.0),
        }
    }

    pub fn from_center_extent(center: Point3<f32>, extent: f32) -> Self {
        let e = cgmath::Vector3::new(extent, extent, extent);
        Aabb {
            min: center - e,
            max: center + e,
        }
    }

    fn from_point(p: Point3<f32>) -> Self {
        Aabb { min: p, max: p }
    }

    fn include(&mut self, p: Point3<f32>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn expand_by(&self, margin: f32) -> Aabb {
        let m = cgmath::Vector3::new(margin, margin, margin);
        Aabb {
            min: self.min - m,
            max: self.max + m,
        }
    }
}

/// Cheap per-step bounds. Particle positions live on the GPU, so this is an
/// oversized placeholder box around the emitter origin.
pub fn estimate_bounds(origin: Point3<f32>, extent: f32) -> Aabb {
    Aabb::from_center_extent(origin, extent)
}

/// True bounds of the live particles in the given tiles, read back from the
/// current position texture. This waits for the device to go idle and then
/// blocks the calling thread on the readback, so it is for tooling and
/// editor paths, not the per-frame loop. Returns the zero box when no live
/// particle exists.
pub fn compute_exact_bounds(
    tiles: &[u32],
    resources: &Arc<SimulationResources>,
    queue: &RenderQueue,
    margin: f32,
) -> Aabb {
    log::warn!(
        "Computing exact particle bounds over {} tiles; this stalls the device",
        tiles.len()
    );
    let tiles = tiles.to_vec();
    let resources = resources.clone();
    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
    queue.enqueue(move |device| {
        let mut state = resources.state.lock().unwrap();
        if !state.is_initialized() {
            let _ = reply_tx.send(None);
            return;
        }
        state.ensure_cleared(device);
        device.wait_idle();

        let layout = *state.layout();
        let position = state.current().position;
        let mut bounds: Option<Aabb> = None;
        for &tile in &tiles {
            let (x, y) = layout.tile_origin(tile);
            let texels = device.read_texture_region(
                position,
                TexelRect {
                    x,
                    y,
                    width: layout.tile_size,
                    height: layout.tile_size,
                },
            );
            for texel in texels {
                if texel[3] >= DEAD_RELATIVE_TIME {
                    continue;
                }
                let p = Point3::new(texel[0], texel[1], texel[2]);
                match bounds.as_mut() {
                    Some(b) => b.include(p),
                    None => bounds = Some(Aabb::from_point(p)),
                }
            }
        }
        let _ = reply_tx.send(bounds);
    });

    match reply_rx.recv() {
        Ok(Some(bounds)) => bounds.expand_by(margin),
        // Nothing alive, or the render thread is gone.
        Ok(None) | Err(_) => Aabb::zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasLayout;
    use crate::device::SoftwareDevice;
    use crate::injection::{InjectionQueue, NewParticleRecord};
    use crate::render_queue::render_channel;

    fn record(texel: (u32, u32), position: [f32; 3]) -> NewParticleRecord {
        NewParticleRecord {
            position,
            relative_time: 0.0,
            velocity: [0.0; 3],
            time_scale: 1.0,
            density: 0.0,
            texel_x: texel.0,
            texel_y: texel.1,
            pad: 0,
        }
    }

    #[test]
    fn estimate_is_centered_on_origin() {
        let bounds = estimate_bounds(Point3::new(1.0, 2.0, 3.0), 10.0);
        assert_eq!(bounds.min, Point3::new(-9.0, -8.0, -7.0));
        assert_eq!(bounds.max, Point3::new(11.0, 12.0, 13.0));
    }

    #[test]
    fn exact_bounds_cover_live_particles_only() {
        let resources = SimulationResources::new(AtlasLayout::new(16, 16, 4));
        let (queue, stream) = render_channel();
        let thread = stream.spawn(Box::new(SoftwareDevice::new()));
        {
            let resources = resources.clone();
            queue.enqueue(move |device| resources.state.lock().unwrap().init(device));
        }

        let mut injection = InjectionQueue::new();
        injection.push(record((0, 0), [-1.0, 0.0, 2.0]));
        injection.push(record((3, 3), [5.0, -2.0, 0.5]));
        // A dead record; it must not stretch the box.
        let mut dead = record((1, 0), [100.0, 100.0, 100.0]);
        dead.relative_time = 1.0;
        injection.push(dead);
        injection.flush(&resources, &queue);

        let bounds = compute_exact_bounds(&[0], &resources, &queue, 0.0);
        assert_eq!(bounds.min, Point3::new(-1.0, -2.0, 0.5));
        assert_eq!(bounds.max, Point3::new(5.0, 0.0, 2.0));

        let padded = compute_exact_bounds(&[0], &resources, &queue, 1.0);
        assert_eq!(padded.min, Point3::new(-2.0, -3.0, -0.5));

        drop(queue);
        thread.join();
    }

    #[test]
    fn exact_bounds_with_no_live_particles_is_zero() {
        let resources = SimulationResources::new(AtlasLayout::new(16, 16, 4));
        let (queue, stream) = render_channel();
        let thread = stream.spawn(Box::new(SoftwareDevice::new()));
        {
            let resources = resources.clone();
            queue.enqueue(move |device| resources.state.lock().unwrap().init(device));
        }
        let bounds = compute_exact_bounds(&[0, 1], &resources, &queue, 5.0);
        assert_eq!(bounds, Aabb::zero());
        drop(queue);
        thread.join();
    }
}
