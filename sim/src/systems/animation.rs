//! Animation state.
//!
//! ## Data Access
//! - Reads: combat, velocities
//! - Writes: animators

use std::sync::Arc;

use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};

/// Horizontal speed above which a unit plays its run clip.
pub const RUN_THRESHOLD: f32 = 0.2;

/// Clip a grounded unit should play.
pub fn choose_clip(combat: &CombatState, body: &Rigidbody) -> AnimationClip {
    if combat.is_attacking() {
        AnimationClip::Attack
    } else if body.velocity.x.hypot(body.velocity.z) > RUN_THRESHOLD {
        AnimationClip::Run
    } else {
        AnimationClip::Idle
    }
}

/// Switch to the requested clip if needed, then advance playback.
pub fn advance(animator: &mut Animator, dt: f32) {
    if animator.current != animator.requested {
        animator.current = animator.requested;
        animator.normalized_time = 0.0;
    }
    let clip = animator.current;
    let time = animator.normalized_time + dt / clip.length();
    animator.normalized_time = if clip.loops() { time.fract() } else { time.min(1.0) };
}

pub fn schedule_animation(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let combat = frame.combat.clone();
    let velocities = frame.velocities.clone();
    let animators = frame.animators.clone();
    let batch = config.huge_batch;

    let desc = JobDesc::new("unit_animation")
        .reads([combat.id(), velocities.id()])
        .writes([animators.id()]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let combat = combat.read()?;
        let velocities = velocities.read()?;
        let mut animators = animators.write()?;
        animators
            .par_iter_mut()
            .zip(combat.par_iter().zip(velocities.par_iter()))
            .with_min_len(batch)
            .for_each(|(animator, (state, body))| {
                animator.requested = choose_clip(state, body);
                advance(animator, ctx.dt);
            });
        Ok(())
    })
}
