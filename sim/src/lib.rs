//! Warband - Simulation Core
//!
//! A fixed-timestep, job-parallel simulation of massed formation battles.
//! Uses `bevy_ecs` for entity storage and a fence-ordered job graph on a
//! `rayon` pool for the per-frame stages.

pub mod api;
pub mod components;
pub mod config;
pub mod error;
pub mod frame;
pub mod jobs;
pub mod lifecycle;
pub mod math;
pub mod navigation;
pub mod pipeline;
pub mod profiler;
pub mod render;
pub mod spatial;
pub mod spawner;
pub mod systems;
pub mod terrain;
pub mod world;

pub use api::Simulation;
pub use components::*;
pub use config::SimConfig;
pub use error::{ConfigError, JobError, SimError, SpawnError};
pub use jobs::{Buffer, Fence, JobGraph, JobStats};
pub use lifecycle::{LifecycleManager, LifecycleWriter, MaintenanceReport};
pub use render::{LastBatch, RenderInstance, RenderSink};
pub use spatial::{SpatialEntry, SpatialHash};
pub use spawner::FormationSpec;
pub use systems::{AttackCommand, CommandQueue, Explosion};
pub use terrain::{GroundQuery, TerrainGrid};
pub use world::Snapshot;
