//! Archer volleys.
//!
//! All archers share one cycle, advanced on the main thread before the frame
//! is scheduled (see [`advance_volley`]). On a volley frame every ranged unit
//! whose formation has an enemy formation within range looses one arrow at
//! it. Arrows are queued as spawn requests; nothing is created here.
//!
//! ## Data Access
//! - Reads: formations, closest, transforms, bitmasks

use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::lifecycle::{ArrowSpawn, LifecycleWriter};
use crate::math::{distance_xz, flatten, scatter};
use crate::systems::attack::advance_attack_cycle;

/// Height above the archer's feet arrows are released from.
pub const RELEASE_HEIGHT: f32 = 1.5;

/// Advance the shared archer cycle. Returns true on a volley frame.
pub fn advance_volley(cycle: &mut f32, dt: f32, config: &SimConfig) -> bool {
    advance_attack_cycle(cycle, true, dt, config.archer_attack_time, config.archer_hit_time)
}

/// Launch velocity that carries a projectile from `from` to `to` at the
/// given horizontal speed under `gravity` (negative is down).
pub fn ballistic_velocity(from: Vec3, to: Vec3, horizontal_speed: f32, gravity: f32) -> Option<Vec3> {
    let flat = flatten(to - from);
    let distance = flat.length();
    if distance < 1e-3 || horizontal_speed <= 0.0 {
        return None;
    }
    let flight_time = distance / horizontal_speed;
    let rise = to.y - from.y;
    let vertical = rise / flight_time - 0.5 * gravity * flight_time;
    Some(flat / distance * horizontal_speed + Vec3::Y * vertical)
}

pub fn schedule_archers(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    lifecycle: &LifecycleWriter,
    dependency: &Fence,
) -> Fence {
    if !ctx.archer_volley {
        return dependency.clone();
    }

    let formations = frame.formations.clone();
    let closest = frame.closest.clone();
    let transforms = frame.transforms.clone();
    let bitmasks = frame.bitmasks.clone();
    let index = Arc::clone(&frame.index);
    let config = Arc::clone(config);
    let lifecycle = lifecycle.clone();

    let desc = JobDesc::new("archer_volley").reads([
        formations.id(),
        closest.id(),
        transforms.id(),
        bitmasks.id(),
    ]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let formations = formations.read()?;
        let closest = closest.read()?;
        let transforms = transforms.read()?;
        let bitmasks = bitmasks.read()?;

        let loosed: usize = (0..index.units.len())
            .into_par_iter()
            .with_min_len(config.big_batch)
            .filter(|&unit| index.unit_kinds[unit] == UnitKind::Ranged && bitmasks[unit].spawned)
            .filter_map(|unit| {
                let f = index.unit_formation[unit]?;
                let enemy = closest[f];
                if !formations[f].is_active() || !enemy.exists() {
                    return None;
                }
                let origin = transforms[unit].position;
                if distance_xz(origin, enemy.position) > config.archer_range {
                    return None;
                }

                let seed = index.units[unit].to_bits();
                let aim = enemy.position
                    + Vec3::new(
                        scatter(seed, ctx.tick * 2) * config.arrow_scatter,
                        0.0,
                        scatter(seed, ctx.tick * 2 + 1) * config.arrow_scatter,
                    );
                let release = origin + Vec3::Y * RELEASE_HEIGHT;
                let velocity = ballistic_velocity(release, aim, config.arrow_speed, config.gravity)?;
                lifecycle.spawn_projectile(ArrowSpawn {
                    position: release,
                    velocity,
                    faction: bitmasks[unit].faction,
                });
                Some(())
            })
            .count();

        tracing::trace!(loosed, "archer volley");
        Ok(())
    })
}
