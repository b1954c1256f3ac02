use cgmath::Point3;
use log::{error, info};

use plume::atlas::AtlasLayout;
use plume::device::SoftwareDevice;
use plume::emitter::EmitterDrive;
use plume::render_queue::render_channel;
use plume::sim_params::SolverParams;
use plume::solver::Solver;
use plume::wgpu_device::WgpuDevice;

gflags::define! {
    --config: &str = "solver_config.toml"
}

gflags::define! {
    --log_filter: &str = "info"
}

gflags::define! {
    --steps: u32 = 300
}

gflags::define! {
    --step_dt: f32 = 0.016
}

gflags::define! {
    --emitters: u32 = 2
}

gflags::define! {
    /// Extra particles pushed into each emitter on the first step.
    --burst: u32 = 0
}

gflags::define! {
    /// Run against a real GPU instead of the software reference device.
    --use_gpu: bool = false
}

gflags::define! {
    /// Read exact particle bounds back at the end (stalls the device).
    --exact_bounds: bool = false
}

fn read_config_from_file(path: &str) -> anyhow::Result<SolverParams> {
    let params = std::fs::read_to_string(path)?.parse()?;
    Ok(params)
}

fn get_solver_config() -> SolverParams {
    match read_config_from_file(CONFIG.flag) {
        Ok(params) => params,
        Err(e) => {
            error!("Failed to parse config file({}): {:?}", CONFIG.flag, e);
            SolverParams::default()
        }
    }
}

fn main() {
    gflags::parse();
    scrub_log::init_with_filter_string(LOG_FILTER.flag).unwrap();

    let params = get_solver_config();
    let mut solver = Solver::new(params, AtlasLayout::default());
    let (queue, stream) = render_channel();
    let thread = if USE_GPU.flag {
        let device = WgpuDevice::request().expect("failed to acquire a GPU device");
        stream.spawn(Box::new(device))
    } else {
        stream.spawn(Box::new(SoftwareDevice::new()))
    };
    solver.init_resources(&queue);

    let mut handles = Vec::new();
    for i in 0..EMITTERS.flag {
        let origin = Point3::new(i as f32 * 50.0, 0.0, 0.0);
        let handle = solver.spawn_emitter(
            &format!("emitter_{}", i),
            params.emitter,
            EmitterDrive::Anchored,
            origin,
        );
        if BURST.flag > 0 {
            solver.emitter_mut(handle).unwrap().burst(BURST.flag);
        }
        handles.push(handle);
    }

    for step in 0..STEPS.flag {
        solver.step(STEP_DT.flag, &queue);
        if step % 60 == 0 {
            let active: u32 = handles
                .iter()
                .filter_map(|h| solver.emitter(*h))
                .map(|e| e.active_particle_estimate())
                .sum();
            info!(
                "step {}: ~{} active particles, {} free tiles",
                step,
                active,
                solver.free_tile_count()
            );
        }
    }

    if EXACT_BOUNDS.flag {
        for handle in &handles {
            if let Some(bounds) = solver.compute_exact_bounds(*handle, &queue) {
                info!("exact bounds: {:?} .. {:?}", bounds.min, bounds.max);
            }
        }
    }

    for handle in handles {
        solver.destroy_emitter(handle);
    }
    info!(
        "Done. {} of {} tiles free",
        solver.free_tile_count(),
        solver.resources.layout().tile_count()
    );

    drop(queue);
    thread.join();
}
