//! Simulation settings.
//!
//! A single `SimConfig` is built (or loaded from JSON) at startup, validated
//! once, and then shared read-only with every stage through an `Arc`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable knobs for the whole simulation. Constant for the lifetime of a
/// `Simulation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed timestep in seconds (e.g., 1/30 = 0.0333 for 30 Hz).
    pub fixed_timestep: f32,
    /// Worker threads for the job pool. 0 lets rayon decide.
    pub worker_threads: usize,
    /// Minimum items per parallel split for cheap per-unit kernels.
    pub small_batch: usize,
    /// Minimum items per split for kernels touching neighbours.
    pub big_batch: usize,
    /// Minimum items per split for trivially cheap kernels.
    pub huge_batch: usize,

    /// Vertical acceleration applied to projectiles and flying units.
    pub gravity: f32,

    // Melee cycle
    pub attack_time: f32,
    pub hit_time: f32,
    pub melee_damage: f32,
    pub melee_range: f32,

    // Archer volley cycle, shared by every archer
    pub archer_attack_time: f32,
    pub archer_hit_time: f32,
    pub archer_range: f32,
    pub arrow_speed: f32,
    /// Maximum horizontal aim error in world units.
    pub arrow_scatter: f32,
    pub arrow_damage: f32,
    pub arrow_hit_radius: f32,
    /// Candidates examined in the arrow's cell before giving up.
    pub arrow_hit_candidates: usize,

    // Unit movement
    pub unit_health: f32,
    pub minion_speed: f32,
    /// Speed multiplier while a formation is still materializing.
    pub catch_up_multiplier: f32,
    pub unit_spacing: f32,
    pub collision_radius: f32,
    pub collision_candidates: usize,
    /// Horizontal impulse applied by explosions.
    pub explosion_force: f32,

    // Formation coordination
    pub formation_speed: f32,
    pub aggro_radius: f32,
    /// Distance under which a destination counts as unchanged or reached.
    pub move_epsilon: f32,
    /// Waypoints a formation may skip in one tick.
    pub path_hop_cap: u32,
    /// Radians per second a formation's facing may turn.
    pub formation_turn_rate: f32,
    pub integrity_close_distance: f32,
    pub integrity_far_distance: f32,

    // Lifecycle
    pub max_dying_units_per_frame: usize,
    pub max_flying_conversions_per_frame: usize,
    pub max_spawned_projectiles_per_frame: usize,
    pub unit_dying_time: f32,
    pub arrow_dying_time: f32,
    pub sink_depth: f32,
    pub units_per_frame: u32,

    // Spatial hash
    pub grid_step: f32,
    pub grid_width: i32,
    pub grid_height: i32,
    pub initial_unit_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0, // 30 Hz
            worker_threads: 0,
            small_batch: 64,
            big_batch: 32,
            huge_batch: 1024,

            gravity: -9.81,

            attack_time: 1.0,
            hit_time: 0.5,
            melee_damage: 25.0,
            melee_range: 1.5,

            archer_attack_time: 3.0,
            archer_hit_time: 1.5,
            archer_range: 120.0,
            arrow_speed: 30.0,
            arrow_scatter: 2.0,
            arrow_damage: 34.0,
            arrow_hit_radius: 1.0,
            arrow_hit_candidates: 4,

            unit_health: 100.0,
            minion_speed: 4.0,
            catch_up_multiplier: 1.75,
            unit_spacing: 1.6,
            collision_radius: 0.6,
            collision_candidates: 8,
            explosion_force: 12.0,

            formation_speed: 3.0,
            aggro_radius: 75.0,
            move_epsilon: 0.1,
            path_hop_cap: 3,
            formation_turn_rate: 0.314,
            integrity_close_distance: 1.0,
            integrity_far_distance: 5.0,

            max_dying_units_per_frame: 250,
            max_flying_conversions_per_frame: 250,
            max_spawned_projectiles_per_frame: 2000,
            unit_dying_time: 5.0,
            arrow_dying_time: 1.0,
            sink_depth: 0.8,
            units_per_frame: 50,

            grid_step: 2.0,
            grid_width: 4000,
            grid_height: 4000,
            initial_unit_capacity: 4096,
        }
    }
}

impl SimConfig {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("fixed_timestep", self.fixed_timestep),
            ("attack_time", self.attack_time),
            ("archer_attack_time", self.archer_attack_time),
            ("arrow_speed", self.arrow_speed),
            ("arrow_hit_radius", self.arrow_hit_radius),
            ("unit_health", self.unit_health),
            ("unit_spacing", self.unit_spacing),
            ("move_epsilon", self.move_epsilon),
            ("unit_dying_time", self.unit_dying_time),
            ("arrow_dying_time", self.arrow_dying_time),
            ("grid_step", self.grid_step),
        ];
        for (field, value) in positive {
            // NaN fails this check too
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }

        let non_zero = [
            ("small_batch", self.small_batch),
            ("big_batch", self.big_batch),
            ("huge_batch", self.huge_batch),
            ("arrow_hit_candidates", self.arrow_hit_candidates),
            ("collision_candidates", self.collision_candidates),
            ("max_dying_units_per_frame", self.max_dying_units_per_frame),
            ("max_flying_conversions_per_frame", self.max_flying_conversions_per_frame),
            ("max_spawned_projectiles_per_frame", self.max_spawned_projectiles_per_frame),
            ("units_per_frame", self.units_per_frame as usize),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.grid_width <= 0 {
            return Err(ConfigError::Zero { field: "grid_width" });
        }
        if self.grid_height <= 0 {
            return Err(ConfigError::Zero { field: "grid_height" });
        }

        if !(0.0..self.attack_time).contains(&self.hit_time) {
            return Err(ConfigError::HitOutsideCycle {
                cycle: "melee",
                hit: self.hit_time,
                attack: self.attack_time,
            });
        }
        if !(0.0..self.archer_attack_time).contains(&self.archer_hit_time) {
            return Err(ConfigError::HitOutsideCycle {
                cycle: "archer",
                hit: self.archer_hit_time,
                attack: self.archer_attack_time,
            });
        }
        if self.integrity_close_distance > self.integrity_far_distance {
            return Err(ConfigError::IntegrityBands {
                close: self.integrity_close_distance,
                far: self.integrity_far_distance,
            });
        }
        Ok(())
    }
}
