//! Death detection.
//!
//! ## Data Access
//! - Reads: combat, flying
//!
//! Units and flying bodies that ran out of health are reported to the
//! lifecycle manager. Nothing is removed here.

use std::sync::Arc;

use bevy_ecs::entity::Entity;
use rayon::prelude::*;

use crate::components::CombatState;
use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::lifecycle::LifecycleWriter;

/// Handles whose health has run out.
pub fn dead_handles<'a>(
    entities: &'a [Entity],
    states: impl IndexedParallelIterator<Item = &'a CombatState> + 'a,
) -> impl ParallelIterator<Item = Entity> + 'a {
    entities
        .par_iter()
        .zip(states)
        .filter(|(_, state)| !state.is_alive())
        .map(|(&entity, _)| entity)
}

pub fn schedule_cleanup(
    graph: &JobGraph,
    frame: &FrameBuffers,
    lifecycle: &LifecycleWriter,
    dependency: &Fence,
) -> Fence {
    let combat = frame.combat.clone();
    let flying = frame.flying.clone();
    let index = Arc::clone(&frame.index);
    let lifecycle = lifecycle.clone();

    let desc = JobDesc::new("death_cleanup").reads([combat.id(), flying.id()]);
    let len = frame.unit_count() + frame.flying_count();

    graph.schedule_for(desc, len, dependency, move || {
        let combat = combat.read()?;
        let flying = flying.read()?;

        dead_handles(&index.units, combat.par_iter()).for_each(|entity| lifecycle.confirm_death(entity));
        dead_handles(&index.flying, flying.par_iter().map(|body| &body.combat))
            .for_each(|entity| lifecycle.confirm_death(entity));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_dead_handles_reported() {
        let entities: Vec<Entity> = (1..=4).map(Entity::from_raw).collect();
        let states = [
            CombatState::new(10.0),
            CombatState::new(0.0),
            CombatState::new(-5.0),
            CombatState::new(0.1),
        ];
        let mut dead: Vec<Entity> = dead_handles(&entities, states.par_iter()).collect();
        dead.sort();
        assert_eq!(dead, vec![entities[1], entities[2]]);
    }
}
