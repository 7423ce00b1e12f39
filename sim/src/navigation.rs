//! Glue to the crowd navigation system.
//!
//! Pathfinding itself is external. This module defines the surface query the
//! simulation consumes and a straight-line stepper that moves formation
//! agents toward their requested destination, standing in for the crowd
//! system's own update.

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::components::{CrowdAgent, CrowdNavigator, FormationData};
use crate::math::flatten;

/// Navigation surface query.
pub trait NavSurface: Send + Sync {
    /// Closest point on the walkable surface.
    fn sample_closest(&self, position: Vec3) -> Vec3;
}

/// Advance every active crowd agent toward its requested destination.
///
/// Runs serially before the frame's jobs are scheduled.
pub fn step_crowd_agents(world: &mut World, surface: &dyn NavSurface, dt: f32, arrive_epsilon: f32) {
    let mut query = world.query::<(&FormationData, &mut CrowdAgent, &mut CrowdNavigator)>();
    for (formation, mut agent, mut navigator) in query.iter_mut(world) {
        if !navigator.active || !formation.is_active() {
            continue;
        }

        // Straight corridor: the only corner is the destination itself.
        navigator.steering_target = navigator.requested_destination;
        navigator.next_corner_side = 0.0;

        let to_target = flatten(navigator.requested_destination - agent.position);
        let distance = to_target.length();
        if distance < arrive_epsilon {
            continue;
        }

        let step = (agent.speed * dt).min(distance);
        let moved = agent.position + to_target / distance * step;
        agent.position = surface.sample_closest(moved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Faction;
    use crate::terrain::TerrainGrid;

    #[test]
    fn test_agent_walks_toward_destination() {
        let mut world = World::new();
        let surface = TerrainGrid::flat(100, 100, 2.0);
        let mut navigator = CrowdNavigator::default();
        navigator.move_to(Vec3::new(10.0, 0.0, 0.0));
        let entity = world
            .spawn((
                FormationData::new(Faction::Blue, Vec3::ZERO, Vec3::Z, 10),
                CrowdAgent { position: Vec3::ZERO, speed: 2.0 },
                navigator,
            ))
            .id();

        for _ in 0..10 {
            step_crowd_agents(&mut world, &surface, 0.5, 0.1);
        }
        let agent = world.get::<CrowdAgent>(entity).unwrap();
        assert!((agent.position.x - 10.0).abs() < 1e-4);
        let navigator = world.get::<CrowdNavigator>(entity).unwrap();
        assert_eq!(navigator.steering_target, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_inactive_agent_stays_put() {
        let mut world = World::new();
        let surface = TerrainGrid::flat(100, 100, 2.0);
        let entity = world
            .spawn((
                FormationData::new(Faction::Red, Vec3::ZERO, Vec3::Z, 10),
                CrowdAgent { position: Vec3::new(1.0, 0.0, 1.0), speed: 2.0 },
                CrowdNavigator::default(),
            ))
            .id();
        step_crowd_agents(&mut world, &surface, 1.0, 0.1);
        assert_eq!(world.get::<CrowdAgent>(entity).unwrap().position, Vec3::new(1.0, 0.0, 1.0));
    }
}
