//! Explosions.
//!
//! ## Data Access
//! - Reads: spatial hash
//! - Writes: velocities
//!
//! Every alive unit inside an explosion's radius is thrown outward and
//! upward, then queued for conversion to a flying body. A unit caught by
//! several blasts in one frame sums their launch velocities and is queued
//! once.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::lifecycle::LifecycleWriter;
use crate::math::flatten;
use crate::spatial::SpatialHash;

/// Fraction of the force still applied at the rim of the blast.
const RIM_FALLOFF: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Explosion {
    pub center: Vec3,
    pub radius: f32,
    pub force: f32,
}

impl Explosion {
    /// Launch velocity for a unit at `position`.
    pub fn launch_velocity(&self, position: Vec3) -> Vec3 {
        let offset = flatten(position - self.center);
        let distance = offset.length();
        let outward = offset.try_normalize().unwrap_or(Vec3::X);
        let falloff = if self.radius > 0.0 {
            (1.0 - distance / self.radius).max(RIM_FALLOFF)
        } else {
            1.0
        };
        let strength = self.force * falloff;
        outward * strength + Vec3::Y * strength
    }
}

/// Launch velocities per unit slot for a set of explosions.
pub fn resolve_explosions(hash: &SpatialHash, explosions: &[Explosion]) -> BTreeMap<u32, Vec3> {
    let mut launched = BTreeMap::new();
    for explosion in explosions {
        for entry in hash.query_radius(explosion.center, explosion.radius) {
            *launched.entry(entry.index).or_insert(Vec3::ZERO) += explosion.launch_velocity(entry.position);
        }
    }
    launched
}

pub fn schedule_explosions(
    graph: &JobGraph,
    frame: &FrameBuffers,
    explosions: Arc<Vec<Explosion>>,
    lifecycle: &LifecycleWriter,
    dependency: &Fence,
) -> Fence {
    let spatial = frame.spatial.clone();
    let velocities = frame.velocities.clone();
    let index = Arc::clone(&frame.index);
    let lifecycle = lifecycle.clone();

    let desc = JobDesc::new("explosions")
        .reads([spatial.id()])
        .writes([velocities.id()]);

    graph.schedule_for(desc, explosions.len(), dependency, move || {
        let hash = spatial.read()?;
        let mut velocities = velocities.write()?;

        let launched = resolve_explosions(&hash, &explosions);
        for (&unit, &velocity) in &launched {
            let unit = unit as usize;
            let (Some(body), Some(&entity)) = (velocities.get_mut(unit), index.units.get(unit)) else {
                continue;
            };
            body.velocity = velocity;
            lifecycle.convert_to_flying(entity);
        }
        tracing::debug!(explosions = explosions.len(), launched = launched.len(), "explosions resolved");
        Ok(())
    })
}
