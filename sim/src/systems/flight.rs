//! Flying units.
//!
//! ## Data Access
//! - Reads: flying_ground
//! - Writes: flying
//!
//! Launched units fall under gravity. Touching the ground kills them: health
//! drops to zero and cleanup hands them to the lifecycle manager.

use std::sync::Arc;

use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FlyingBody, FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};

/// Advance one flying body. `ground` is the height below it at the start of
/// the tick.
pub fn fly(body: &mut FlyingBody, ground: f32, gravity: f32, dt: f32) {
    if !body.combat.is_alive() {
        return;
    }
    body.animator.requested = AnimationClip::Falling;
    body.rigidbody.velocity.y += gravity * dt;
    body.transform.position += body.rigidbody.velocity * dt;

    if body.transform.position.y <= ground {
        body.transform.position.y = ground;
        body.rigidbody.velocity = glam::Vec3::ZERO;
        body.combat.health = 0.0;
    }
}

pub fn schedule_flight(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let flying = frame.flying.clone();
    let ground = frame.flying_ground.clone();
    let gravity = config.gravity;
    let batch = config.small_batch;

    let desc = JobDesc::new("flying_units")
        .reads([ground.id()])
        .writes([flying.id()]);

    graph.schedule_for(desc, frame.flying_count(), dependency, move || {
        let ground = ground.read()?;
        let mut flying = flying.write()?;
        flying
            .par_iter_mut()
            .zip(ground.par_iter())
            .with_min_len(batch)
            .for_each(|(body, &height)| fly(body, height, gravity, ctx.dt));
        Ok(())
    })
}
