//! Formation integrity.
//!
//! ## Data Access
//! - Reads: members, combat, transforms, destinations
//! - Writes: integrity
//!
//! Walks each formation's packed member prefix and buckets members by how far
//! they stand from their slot. Must run after compaction and destinations.

use std::collections::HashMap;
use std::sync::Arc;

use bevy_ecs::entity::Entity;
use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};

/// Distance bands a member is sorted into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrityBands {
    pub close: f32,
    pub far: f32,
}

impl IntegrityBands {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            close: config.integrity_close_distance,
            far: config.integrity_far_distance,
        }
    }
}

/// Count one formation. `lookup` maps a member handle to
/// `(attacking, distance to slot)`; handles it cannot resolve are skipped.
pub fn measure<F>(members: &FormationMembers, bands: IntegrityBands, lookup: F) -> FormationIntegrity
where
    F: Fn(Entity) -> Option<(bool, f32)>,
{
    let mut integrity = FormationIntegrity::default();
    for &member in members.slots.iter().take_while(|&&e| e != NULL_HANDLE) {
        let Some((attacking, distance)) = lookup(member) else {
            continue;
        };
        if attacking {
            integrity.units_attacking += 1;
        }
        if distance < bands.far {
            integrity.unit_count += 1;
            if distance >= bands.close {
                integrity.units_close += 1;
            }
        } else {
            integrity.units_far += 1;
        }
    }
    integrity
}

pub fn schedule_integrity(
    graph: &JobGraph,
    frame: &FrameBuffers,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let members = frame.members.clone();
    let combat = frame.combat.clone();
    let transforms = frame.transforms.clone();
    let destinations = frame.destinations.clone();
    let integrity = frame.integrity.clone();
    let index = Arc::clone(&frame.index);
    let bands = IntegrityBands::from_config(config);

    let desc = JobDesc::new("formation_integrity")
        .reads([members.id(), combat.id(), transforms.id(), destinations.id()])
        .writes([integrity.id()]);

    graph.schedule_for(desc, frame.formation_count(), dependency, move || {
        let members = members.read()?;
        let combat = combat.read()?;
        let transforms = transforms.read()?;
        let destinations = destinations.read()?;
        let mut integrity = integrity.write()?;
        let slots: &HashMap<Entity, usize> = &index.unit_slot;

        integrity
            .par_iter_mut()
            .zip(members.par_iter())
            .for_each(|(out, buffer)| {
                *out = measure(buffer, bands, |entity| {
                    let unit = *slots.get(&entity)?;
                    let distance = transforms[unit].position.distance(destinations[unit].target);
                    Some((combat[unit].is_attacking(), distance))
                });
            });
        Ok(())
    })
}
