//! Movement system - steers units toward their destinations and applies
//! velocity to position.
//!
//! ## Data Access
//! - Reads: destinations, combat
//! - Writes: transforms, velocities
//!
//! The velocity buffer enters this stage holding the separation push from
//! collision; steering is added on top before integrating.

use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::math::{flatten, rotate_towards};
use crate::terrain::GroundQuery;

/// Units closer than this to their destination stop steering.
pub const ARRIVE_RADIUS: f32 = 0.05;

/// Fastest a unit turns to face its heading, in radians per second.
pub const TURN_RATE: f32 = 6.0;

/// Horizontal steering velocity toward `destination`. Never overshoots
/// within one tick.
pub fn steer(position: Vec3, destination: &Destination, dt: f32) -> Vec3 {
    let to_target = flatten(destination.target - position);
    let distance = to_target.length();
    if distance < ARRIVE_RADIUS || dt <= 0.0 {
        return Vec3::ZERO;
    }
    let speed = destination.speed.min(distance / dt);
    to_target / distance * speed
}

/// Apply one tick of movement to a grounded unit.
pub fn integrate(
    transform: &mut UnitTransform,
    body: &mut Rigidbody,
    steering: Vec3,
    dt: f32,
    ground: &dyn GroundQuery,
) {
    body.velocity = flatten(body.velocity + steering);
    transform.position += body.velocity * dt;
    transform.position.y = ground.ground_height(transform.position);

    if steering.length_squared() > 1e-6 {
        transform.forward = rotate_towards(transform.forward, steering, TURN_RATE * dt);
    }
}

pub fn schedule_movement(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    ground: &Arc<dyn GroundQuery>,
    dependency: &Fence,
) -> Fence {
    let destinations = frame.destinations.clone();
    let combat = frame.combat.clone();
    let transforms = frame.transforms.clone();
    let velocities = frame.velocities.clone();
    let ground = Arc::clone(ground);
    let batch = config.small_batch;

    let desc = JobDesc::new("unit_movement")
        .reads([destinations.id(), combat.id()])
        .writes([transforms.id(), velocities.id()]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let destinations = destinations.read()?;
        let combat = combat.read()?;
        let mut transforms = transforms.write()?;
        let mut velocities = velocities.write()?;

        transforms
            .par_iter_mut()
            .zip(velocities.par_iter_mut())
            .enumerate()
            .with_min_len(batch)
            .for_each(|(unit, (transform, body))| {
                // Units mid-swing hold their ground.
                let steering = if combat[unit].is_attacking() {
                    Vec3::ZERO
                } else {
                    steer(transform.position, &destinations[unit], ctx.dt)
                };
                integrate(transform, body, steering, ctx.dt, ground.as_ref());
            });
        Ok(())
    })
}
