//! Arrow ballistics.
//!
//! Two stages around the frame's ground raycast batch:
//!
//! 1. `schedule_progress` integrates every active arrow and checks its new
//!    cell for an opposing unit. Runs after unit movement, and candidates
//!    are tested at their moved positions. A hit queues damage and destroys
//!    the arrow.
//! 2. `schedule_ground_stop` deactivates arrows that went below the ground
//!    and confirms their death, which leaves them lying briefly before they
//!    are removed.
//!
//! ## Data Access
//! - progress: reads spatial hash, transforms; writes arrows
//! - ground stop: reads arrow_ground; writes arrows

use std::borrow::Borrow;
use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::lifecycle::LifecycleWriter;
use crate::spatial::SpatialEntry;
use crate::systems::commands::{AttackCommand, CommandQueue};

/// Gravity integration for one tick. Position moves with the velocity the
/// arrow entered the tick with.
pub fn integrate(arrow: &mut Arrow, gravity: f32, dt: f32) {
    arrow.position += arrow.velocity * dt;
    arrow.velocity.y += gravity * dt;
}

/// First opposing unit among at most `cap` cell candidates within `radius`
/// of the arrow.
pub fn find_hit<I>(arrow: &Arrow, cell: I, cap: usize, radius: f32) -> Option<u32>
where
    I: IntoIterator,
    I::Item: Borrow<SpatialEntry>,
{
    cell.into_iter()
        .take(cap)
        .map(|entry| *Borrow::<SpatialEntry>::borrow(&entry))
        .find(|entry| entry.faction != arrow.faction && arrow.position.distance(entry.position) < radius)
        .map(|entry| entry.index)
}

pub fn schedule_progress(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    commands: &CommandQueue,
    lifecycle: &LifecycleWriter,
    dependency: &Fence,
) -> Fence {
    let spatial = frame.spatial.clone();
    let transforms = frame.transforms.clone();
    let arrows = frame.arrows.clone();
    let index = Arc::clone(&frame.index);
    let config = Arc::clone(config);
    let commands = commands.clone();
    let lifecycle = lifecycle.clone();

    let desc = JobDesc::new("arrow_progress")
        .reads([spatial.id(), transforms.id()])
        .writes([arrows.id()]);

    graph.schedule_for(desc, frame.arrow_count(), dependency, move || {
        let hash = spatial.read()?;
        let transforms = transforms.read()?;
        let mut arrows = arrows.write()?;

        arrows
            .par_iter_mut()
            .enumerate()
            .with_min_len(config.huge_batch)
            .filter(|(_, arrow)| arrow.active)
            .for_each(|(slot, arrow)| {
                integrate(arrow, config.gravity, ctx.dt);

                // The hash holds this frame's pre-movement positions.
                let cell = hash.query_cell(arrow.position).filter_map(|entry| {
                    transforms.get(entry.index as usize).map(|moved| SpatialEntry {
                        position: moved.position,
                        ..*entry
                    })
                });
                let Some(victim) = find_hit(arrow, cell, config.arrow_hit_candidates, config.arrow_hit_radius)
                else {
                    return;
                };
                let entity = index.arrows[slot];
                commands.push(AttackCommand {
                    attacker: entity,
                    target: index.units[victim as usize],
                    damage: config.arrow_damage,
                });
                arrow.active = false;
                lifecycle.kill(entity);
            });
        Ok(())
    })
}

pub fn schedule_ground_stop(
    graph: &JobGraph,
    frame: &FrameBuffers,
    lifecycle: &LifecycleWriter,
    dependency: &Fence,
) -> Fence {
    let arrows = frame.arrows.clone();
    let ground = frame.arrow_ground.clone();
    let index = Arc::clone(&frame.index);
    let lifecycle = lifecycle.clone();

    let desc = JobDesc::new("arrow_ground_stop")
        .reads([ground.id()])
        .writes([arrows.id()]);

    graph.schedule_for(desc, frame.arrow_count(), dependency, move || {
        let ground = ground.read()?;
        let mut arrows = arrows.write()?;

        arrows
            .par_iter_mut()
            .zip(ground.par_iter())
            .enumerate()
            .filter(|(_, (arrow, height))| arrow.active && arrow.position.y <= **height)
            .for_each(|(slot, (arrow, &height))| {
                arrow.active = false;
                arrow.position.y = height;
                lifecycle.confirm_death(index.arrows[slot]);
            });
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrow(x: f32, y: f32, faction: Faction) -> Arrow {
        Arrow {
            position: Vec3::new(x, y, 0.0),
            velocity: Vec3::ZERO,
            active: true,
            faction,
        }
    }

    fn unit(index: u32, x: f32, faction: Faction) -> SpatialEntry {
        SpatialEntry {
            index,
            position: Vec3::new(x, 0.0, 0.0),
            faction,
        }
    }

    #[test]
    fn test_hit_only_opposing_faction() {
        let a = arrow(0.0, 0.5, Faction::Blue);
        let cell = [unit(0, 0.2, Faction::Blue), unit(1, 0.4, Faction::Red)];
        assert_eq!(find_hit(&a, &cell, 4, 1.0), Some(1));
    }

    #[test]
    fn test_hit_cap_can_miss() {
        let a = arrow(0.0, 0.5, Faction::Blue);
        let mut cell: Vec<SpatialEntry> = (0..4).map(|i| unit(i, 0.1, Faction::Blue)).collect();
        cell.push(unit(4, 0.1, Faction::Red));
        assert_eq!(find_hit(&a, &cell, 4, 1.0), None);
        assert_eq!(find_hit(&a, &cell, 5, 1.0), Some(4));
    }

    #[test]
    fn test_arrow_overhead_does_not_hit() {
        let a = arrow(0.0, 10.0, Faction::Blue);
        let cell = [unit(0, 0.0, Faction::Red)];
        assert_eq!(find_hit(&a, &cell, 4, 1.0), None);
    }

    #[test]
    fn test_arrow_above_radius_misses() {
        // Inside the unit's column but 1.8 above its feet.
        let a = arrow(0.0, 1.8, Faction::Blue);
        let cell = [unit(0, 0.0, Faction::Red)];
        assert_eq!(find_hit(&a, &cell, 4, 1.0), None);
        assert_eq!(find_hit(&a, &cell, 4, 2.0), Some(0));
    }

    #[test]
    fn test_gravity_integration() {
        let mut a = arrow(0.0, 5.0, Faction::Red);
        a.velocity = Vec3::new(2.0, 0.0, 0.0);
        integrate(&mut a, -10.0, 0.5);
        assert_eq!(a.position, Vec3::new(1.0, 5.0, 0.0));
        assert_eq!(a.velocity, Vec3::new(2.0, -5.0, 0.0));

        integrate(&mut a, -10.0, 0.5);
        assert_eq!(a.position, Vec3::new(2.0, 2.5, 0.0));
        assert_eq!(a.velocity, Vec3::new(2.0, -10.0, 0.0));
    }
}
