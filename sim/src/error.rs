//! Error types for the simulation.
//!
//! Configuration and capacity problems surface once, at construction. Job
//! errors never cross a job boundary: the scheduler logs and counts them,
//! then signals the job's fence as usual.

use thiserror::Error;

use crate::jobs::BufferId;

/// Invalid simulation settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{field}` must be positive, got {value}")]
    NonPositive { field: &'static str, value: f32 },

    #[error("`{field}` must be non-zero")]
    Zero { field: &'static str },

    #[error("hit time {hit} must lie within the {cycle} cycle of {attack}")]
    HitOutsideCycle {
        cycle: &'static str,
        hit: f32,
        attack: f32,
    },

    #[error("close distance {close} must not exceed far distance {far}")]
    IntegrityBands { close: f32, far: f32 },

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single scheduled job.
#[derive(Debug, Error)]
pub enum JobError {
    /// A buffer was already held incompatibly when the job tried to use it.
    /// Fences should make this impossible; seeing it means a missing dependency.
    #[error("buffer `{buffer}` is held by another job")]
    Contended { buffer: &'static str },

    #[error("buffer `{buffer}` was poisoned by a panicking job")]
    Poisoned { buffer: &'static str },

    #[error("job `{job}` overlaps an in-flight job on buffer {buffer:?}")]
    AccessConflict { job: &'static str, buffer: BufferId },

    #[error("job `{job}` panicked")]
    Panicked { job: &'static str },
}

/// Errors raised while creating formations.
#[derive(Debug, Error, PartialEq)]
pub enum SpawnError {
    #[error("formation needs at least one unit")]
    EmptyFormation,

    #[error("high-level path of {len} waypoints exceeds capacity {capacity}")]
    PathTooLong { len: usize, capacity: usize },
}

/// Top-level simulation error.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("failed to reserve initial capacity: {0}")]
    Capacity(#[from] std::collections::TryReserveError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("failed to serialize: {0}")]
    Json(#[from] serde_json::Error),
}
