//! Formation coordinator.
//!
//! Three chained stages run every frame, before any unit moves:
//!
//! 1. `schedule_navigation_sync` - copy the crowd agent's position onto the
//!    formation, turn its facing gradually, and track the side offset around
//!    path corners.
//! 2. `schedule_closest_search` - brute-force nearest opposing formation.
//!    O(F^2), fine while formations number in the tens or hundreds.
//! 3. `schedule_target_update` - aggro or high-level path, then a move
//!    request to the navigator only when the destination really changed.
//!
//! ## Data Access
//! - sync: reads agents, navigators; writes formations, formation_nav
//! - closest: reads formations; writes closest
//! - update: reads closest; writes formations, navigators, paths

use bevy_ecs::entity::Entity;
use glam::Vec3;
use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::math::{distance_xz, flatten, lerp, rotate_towards};
use std::sync::Arc;

/// Pull the navigation agent's state onto the formation.
pub fn sync_navigation(
    formation: &mut FormationData,
    nav: &mut FormationNavigation,
    agent: &CrowdAgent,
    navigator: &CrowdNavigator,
    max_turn: f32,
) {
    if !formation.is_active() {
        return;
    }

    let displacement = flatten(agent.position - formation.position);
    formation.position = agent.position;
    if displacement.length_squared() > 1e-8 {
        formation.forward = rotate_towards(formation.forward, displacement.normalize(), max_turn);
    }

    if nav.target_position != navigator.steering_target {
        nav.initial_corner_distance = formation.position.distance(navigator.steering_target);
        nav.prev_formation_side = nav.formation_side;
        nav.target_position = navigator.steering_target;
    }
    if nav.initial_corner_distance != 0.0 {
        let remaining = formation.position.distance(nav.target_position);
        let progress = (1.0 - remaining / nav.initial_corner_distance).clamp(0.0, 1.0);
        nav.formation_side = lerp(nav.prev_formation_side, navigator.next_corner_side, progress);
    }
}

/// Nearest active formation of another faction, by squared distance.
/// Ties keep the first one encountered.
pub fn find_closest(formations: &[FormationData], entities: &[Entity], me: usize) -> ClosestFormation {
    let mine = &formations[me];
    let mut best = ClosestFormation::default();
    if !mine.is_active() {
        return best;
    }

    let mut best_distance = f32::MAX;
    for (other, data) in formations.iter().enumerate() {
        if other == me || !data.is_active() || data.faction == mine.faction {
            continue;
        }
        let distance = mine.position.distance_squared(data.position);
        if distance < best_distance {
            best_distance = distance;
            best = ClosestFormation {
                entity: entities[other],
                position: data.position,
            };
        }
    }
    best
}

/// Pick this tick's target and forward it to the navigator if it moved.
pub fn update_target(
    formation: &mut FormationData,
    closest: &ClosestFormation,
    path: &mut HighLevelPath,
    navigator: &mut CrowdNavigator,
    config: &SimConfig,
) {
    if !formation.is_active() {
        navigator.active = false;
        return;
    }

    let mut target = navigator.requested_destination;
    let in_aggro_range = closest.exists()
        && formation.enable_aggro
        && formation.position.distance(closest.position) < config.aggro_radius;

    if in_aggro_range {
        target = closest.position;
    } else if formation.enable_high_level_path && !path.is_empty() {
        let mut index = path.index;
        let mut hops = 0;
        while let Some(waypoint) = path.waypoint(index) {
            target = waypoint;
            index += 1;
            hops += 1;
            let reached = distance_xz(target, formation.position) < config.move_epsilon;
            if !reached || hops > config.path_hop_cap {
                break;
            }
        }
        path.index = index.saturating_sub(1);
    }

    formation.target = target;
    if distance_xz(navigator.requested_destination, target) > config.move_epsilon {
        navigator.move_to(target);
    }
}

pub fn schedule_navigation_sync(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let formations = frame.formations.clone();
    let formation_nav = frame.formation_nav.clone();
    let agents = frame.agents.clone();
    let navigators = frame.navigators.clone();
    let max_turn = config.formation_turn_rate * ctx.dt;

    let desc = JobDesc::new("formation_navigation_sync")
        .reads([agents.id(), navigators.id()])
        .writes([formations.id(), formation_nav.id()]);

    graph.schedule_for(desc, frame.formation_count(), dependency, move || {
        let agents = agents.read()?;
        let navigators = navigators.read()?;
        let mut formations = formations.write()?;
        let mut formation_nav = formation_nav.write()?;

        formations
            .par_iter_mut()
            .zip(formation_nav.par_iter_mut())
            .zip(agents.par_iter().zip(navigators.par_iter()))
            .for_each(|((formation, nav), (agent, navigator))| {
                sync_navigation(formation, nav, agent, navigator, max_turn);
            });
        Ok(())
    })
}

pub fn schedule_closest_search(graph: &JobGraph, frame: &FrameBuffers, dependency: &Fence) -> Fence {
    let formations = frame.formations.clone();
    let closest = frame.closest.clone();
    let index = Arc::clone(&frame.index);

    let desc = JobDesc::new("closest_formation_search")
        .reads([formations.id()])
        .writes([closest.id()]);

    graph.schedule_for(desc, frame.formation_count(), dependency, move || {
        let formations = formations.read()?;
        let mut closest = closest.write()?;
        closest
            .par_iter_mut()
            .enumerate()
            .for_each(|(me, out)| *out = find_closest(&formations, &index.formations, me));
        Ok(())
    })
}

pub fn schedule_target_update(
    graph: &JobGraph,
    frame: &FrameBuffers,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let formations = frame.formations.clone();
    let closest = frame.closest.clone();
    let paths = frame.paths.clone();
    let navigators = frame.navigators.clone();
    let config = Arc::clone(config);

    let desc = JobDesc::new("formation_target_update")
        .reads([closest.id()])
        .writes([formations.id(), paths.id(), navigators.id()]);

    graph.schedule_for(desc, frame.formation_count(), dependency, move || {
        let closest = closest.read()?;
        let mut formations = formations.write()?;
        let mut paths = paths.write()?;
        let mut navigators = navigators.write()?;

        formations
            .par_iter_mut()
            .zip(paths.par_iter_mut())
            .zip(navigators.par_iter_mut())
            .zip(closest.par_iter())
            .for_each(|(((formation, path), navigator), near)| {
                update_target(formation, near, path, navigator, &config);
            });
        Ok(())
    })
}

/// Offset of slot `index` from the formation centre: a block `width`
/// columns wide, rows stacking behind the centre along `forward`.
pub fn offset_from_center(index: u32, width: u32, forward: Vec3, spacing: f32) -> Vec3 {
    let width = width.max(1);
    let row = (index / width) as f32;
    let column = (index % width) as f32;
    let forward = flatten(forward).normalize_or(Vec3::Z);
    let right = Vec3::Y.cross(forward);

    let lateral = (column - (width as f32 - 1.0) * 0.5) * spacing;
    right * lateral - forward * (row * spacing)
}
