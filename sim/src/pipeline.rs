//! Frame pipeline.
//!
//! Schedules every stage of one frame on the job graph, chained by fences,
//! and waits at the two main-thread rendezvous points where ground raycasts
//! are batched. Returns once every scheduled job has completed.
//!
//! Dependencies, by fence:
//!
//! - buckets, navigation sync, flight: frame start
//! - closest search → target update → compaction
//! - destinations: compaction + buckets
//! - integrity, collision: destinations
//! - archer: collision
//! - attack: collision + integrity
//! - movement: attack + archer
//! - arrow progress, explosions, attack commands: movement
//! - ground stop: arrow progress and the arrow raycast (main thread)
//! - animation: commands + explosions
//! - cleanup: commands + flight

use std::sync::Arc;

use crate::config::SimConfig;
use crate::error::JobError;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobGraph};
use crate::lifecycle::LifecycleWriter;
use crate::systems::{
    animation, archer, arrows, attack, buckets, cleanup, compaction, flight, formation, integrity, movement, spells,
    targeting, targets, CommandQueue, Explosion,
};
use crate::systems::commands::schedule_commands;
use crate::terrain::GroundQuery;

/// Everything the stages share across a frame.
#[derive(Clone, Copy)]
pub struct FrameJobs<'a> {
    pub graph: &'a JobGraph,
    pub config: &'a Arc<SimConfig>,
    pub ground: &'a Arc<dyn GroundQuery>,
    pub lifecycle: &'a LifecycleWriter,
    pub commands: &'a CommandQueue,
}

pub fn run_frame(
    jobs: &FrameJobs<'_>,
    frame: &FrameBuffers,
    ctx: FrameContext,
    explosions: Arc<Vec<Explosion>>,
) -> Result<(), JobError> {
    let FrameJobs {
        graph,
        config,
        ground,
        lifecycle,
        commands,
    } = *jobs;

    // With no units the rebuild is skipped, so last frame's entries must go.
    if frame.unit_count() == 0 {
        frame.spatial.write()?.clear();
    }

    // Flying bodies ask for the ground under their starting position.
    if frame.flying_count() > 0 {
        raycast(graph, ground, frame.flying_positions()?, &mut *frame.flying_ground.write()?);
    }

    let start = Fence::completed();

    let rebuilt = buckets::schedule_rebuild(graph, frame, &start);
    let synced = formation::schedule_navigation_sync(graph, frame, ctx, config, &start);
    let closest = formation::schedule_closest_search(graph, frame, &synced);
    let updated = formation::schedule_target_update(graph, frame, config, &closest);
    let compacted = compaction::schedule_compaction(graph, frame, &updated);

    let placed = targets::schedule_destinations(graph, frame, config, &Fence::combine(&[compacted, rebuilt]));
    let measured = integrity::schedule_integrity(graph, frame, config, &placed);
    let collided = targeting::schedule_collision(graph, frame, config, &placed);

    let swung = attack::schedule_attack(
        graph,
        frame,
        ctx,
        config,
        commands,
        &Fence::combine(&[collided.clone(), measured]),
    );
    let loosed = archer::schedule_archers(graph, frame, ctx, config, lifecycle, &collided);

    let moved = movement::schedule_movement(graph, frame, ctx, config, ground, &Fence::combine(&[swung, loosed]));
    let flown = arrows::schedule_progress(graph, frame, ctx, config, commands, lifecycle, &moved);
    let blasted = spells::schedule_explosions(graph, frame, explosions, lifecycle, &moved);
    let fallen = flight::schedule_flight(graph, frame, ctx, config, &start);

    // Arrows ask for the ground under their new position. A failure here is
    // reported only after the rest of the frame has drained.
    flown.complete();
    let arrow_raycast = if frame.arrow_count() > 0 {
        frame
            .arrow_positions()
            .and_then(|positions| {
                raycast(graph, ground, positions, &mut *frame.arrow_ground.write()?);
                Ok(())
            })
    } else {
        Ok(())
    };
    let stopped = arrows::schedule_ground_stop(graph, frame, lifecycle, &Fence::completed());

    let damaged = schedule_commands(graph, frame, commands, &moved);
    let animated = animation::schedule_animation(
        graph,
        frame,
        ctx,
        config,
        &Fence::combine(&[damaged.clone(), blasted]),
    );
    let cleaned = cleanup::schedule_cleanup(graph, frame, lifecycle, &Fence::combine(&[damaged, fallen]));

    Fence::combine(&[animated, cleaned, stopped]).complete();
    arrow_raycast
}

fn raycast(graph: &JobGraph, ground: &Arc<dyn GroundQuery>, positions: Vec<glam::Vec3>, heights: &mut Vec<f32>) {
    graph.install(|| ground.raycast_batch(&positions, heights));
}
