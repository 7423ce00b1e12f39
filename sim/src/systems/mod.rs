//! Per-frame simulation stages.
//!
//! Each stage is a plain kernel function plus a `schedule_*` function that
//! wraps it in a job on the frame's buffers and returns the job's fence.
//!
//! ## Stage Order
//!
//! **Spatial** - runs first:
//! - `buckets` - rebuilds the spatial hash
//!
//! **Formation coordinator** - alongside the rebuild, before any unit moves:
//! - `formation` - navigation sync, closest enemy, target selection
//! - `compaction` - packs member buffers
//! - `targets` - per-unit destinations from the formation layout
//! - `integrity` - counts members near and far from their slots
//!
//! **Behavior** - read the hash and formation aggregates:
//! - `targeting` - collision and melee target acquisition
//! - `attack` / `archer` - attack cycles, emit damage and projectiles
//! - `movement` - steering and integration
//! - `spells` - explosions
//! - `arrows` / `flight` - ballistics around the ground raycast batch
//! - `commands` - applies queued damage
//! - `animation`, `cleanup` - last, then lifecycle maintenance

pub mod animation;
pub mod archer;
pub mod arrows;
pub mod attack;
pub mod buckets;
pub mod cleanup;
pub mod commands;
pub mod compaction;
pub mod flight;
pub mod formation;
pub mod integrity;
pub mod movement;
pub mod spells;
pub mod targeting;
pub mod targets;

pub use commands::{AttackCommand, CommandQueue};
pub use spells::Explosion;
