use serde::{Deserialize, Serialize};

// Parameters that shape the solver. These don't change at runtime; the
// atlas geometry itself is compile time (see atlas.rs).
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct SolverParams {
    /// Extra tiles preallocated beyond the spawn-rate estimate, as a
    /// fraction of that estimate.
    pub tile_slack: f32,
    /// Hard cap on tiles preallocated for any single emitter.
    pub max_tile_preallocation: u32,
    /// Hard cap on particles one emitter may spawn in one step. Overflow
    /// carries to later steps.
    pub max_spawn_per_step: u32,

    #[serde(default)]
    pub emitter: EmitterParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct EmitterParams {
    /// Particles per second.
    pub emission_rate: f32,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub speed_min: f32,
    pub speed_max: f32,
    /// Cone half-width around the emission axis, as a fraction of speed.
    pub spread: f32,
    pub constant_acceleration: [f32; 3],
    /// Seconds of pre-simulation applied to particles spawned while the
    /// emitter is younger than this.
    pub warmup_time: f32,
    /// Half-extent of the placeholder bounding box.
    pub bounds_extent: f32,
}

impl Default for EmitterParams {
    fn default() -> Self {
        EmitterParams {
            emission_rate: 10000.0,
            lifetime_min: 1.0,
            lifetime_max: 2.0,
            speed_min: 10.0,
            speed_max: 50.0,
            spread: 0.25,
            constant_acceleration: [0.0, -10.0, 0.0],
            warmup_time: 0.0,
            bounds_extent: 100.0,
        }
    }
}

impl Default for SolverParams {
    fn default() -> Self {
        SolverParams {
            tile_slack: 0.1,
            max_tile_preallocation: 128,
            max_spawn_per_step: 65536,
            emitter: EmitterParams::default(),
        }
    }
}

impl std::str::FromStr for SolverParams {
    type Err = toml::de::Error;
    fn from_str(serialized: &str) -> Result<Self, Self::Err> {
        let params = toml::from_str(serialized)?;
        Ok(params)
    }
}

pub fn get_solver_config_from_default_file() -> SolverParams {
    let config_data = include_str!("../solver_config.toml");
    match config_data.parse() {
        Ok(params) => params,
        Err(e) => {
            log::error!(
                "Failed to parse config file({}): {:?}",
                "../solver_config.toml",
                e
            );
            SolverParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let params = SolverParams {
            tile_slack: 0.25,
            max_tile_preallocation: 32,
            max_spawn_per_step: 4096,
            emitter: EmitterParams {
                emission_rate: 500.0,
                ..EmitterParams::default()
            },
        };
        let serialized = toml::to_string(&params).unwrap();
        println!("serialized = {}", serialized);
        let deserialized: SolverParams = toml::from_str(&serialized).unwrap();
        println!("deserialized = {:?}", deserialized);
        assert_eq!(params.tile_slack, deserialized.tile_slack);
        assert_eq!(
            params.max_tile_preallocation,
            deserialized.max_tile_preallocation
        );
        assert_eq!(params.max_spawn_per_step, deserialized.max_spawn_per_step);
        assert_eq!(
            params.emitter.emission_rate,
            deserialized.emitter.emission_rate
        );
    }

    #[test]
    fn default_config_file_parses() {
        let params = get_solver_config_from_default_file();
        assert!(params.emitter.lifetime_max >= params.emitter.lifetime_min);
    }

    #[test]
    fn emitter_section_is_optional() {
        let params: SolverParams = toml::from_str(
            "tile_slack = 0.5\nmax_tile_preallocation = 8\nmax_spawn_per_step = 100\n",
        )
        .unwrap();
        assert_eq!(params.emitter.emission_rate, 10000.0);
    }
}
