//! Render instancing output.
//!
//! The simulation does not draw anything. After each frame it gathers one
//! instance per visible unit and hands the batch to a [`RenderSink`].

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::components::{AnimationClip, Animator, UnitTransform};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderInstance {
    pub position: Vec3,
    pub forward: Vec3,
    pub scale: f32,
    pub clip: AnimationClip,
    pub normalized_time: f32,
}

/// Consumer of per-frame instance batches.
pub trait RenderSink {
    fn submit(&mut self, instances: &[RenderInstance]);
}

/// Sink that keeps the most recent batch. Handy for tests and tooling.
#[derive(Debug, Default)]
pub struct LastBatch {
    pub instances: Vec<RenderInstance>,
    pub submissions: usize,
}

impl RenderSink for LastBatch {
    fn submit(&mut self, instances: &[RenderInstance]) {
        self.instances.clear();
        self.instances.extend_from_slice(instances);
        self.submissions += 1;
    }
}

/// Every unit with a transform and an animator, alive, flying or dying.
pub fn collect_instances(world: &mut World, out: &mut Vec<RenderInstance>) {
    out.clear();
    let mut query = world.query::<(&UnitTransform, &Animator)>();
    out.extend(query.iter(world).map(|(transform, animator)| RenderInstance {
        position: transform.position,
        forward: transform.forward,
        scale: transform.scale,
        clip: animator.current,
        normalized_time: animator.normalized_time,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::NULL_HANDLE;

    #[test]
    fn test_collect_and_submit() {
        let mut world = World::new();
        world.spawn((
            UnitTransform::new(Vec3::new(1.0, 0.0, 2.0), Vec3::Z, NULL_HANDLE),
            Animator {
                current: AnimationClip::Run,
                requested: AnimationClip::Run,
                normalized_time: 0.5,
            },
        ));
        // No animator, not rendered.
        world.spawn(UnitTransform::new(Vec3::ZERO, Vec3::Z, NULL_HANDLE));

        let mut instances = Vec::new();
        collect_instances(&mut world, &mut instances);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].clip, AnimationClip::Run);

        let mut sink = LastBatch::default();
        sink.submit(&instances);
        assert_eq!(sink.instances, instances);
        assert_eq!(sink.submissions, 1);
    }
}
