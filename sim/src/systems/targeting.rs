//! Unit collision and melee target acquisition.
//!
//! Each unit scans its own spatial cell, bounded by a candidate cap. Overlap
//! with any neighbour adds a separation push, stored as the unit's velocity
//! for this frame (movement adds steering on top). The first opposing unit
//! within melee range becomes the attack target, unless the current target is
//! still alive and in range.
//!
//! ## Data Access
//! - Reads: spatial hash, transforms, bitmasks
//! - Writes: targets, velocities

use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::math::{distance_xz, flatten};
use crate::spatial::SpatialEntry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactLimits {
    pub candidates: usize,
    pub radius: f32,
    pub melee_range: f32,
    /// Push speed at full overlap.
    pub push_speed: f32,
}

impl ContactLimits {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            candidates: config.collision_candidates,
            radius: config.collision_radius,
            melee_range: config.melee_range,
            push_speed: config.minion_speed,
        }
    }
}

/// Outcome of scanning one unit's cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub separation: Vec3,
    /// Slot of the first opposing unit in melee range.
    pub enemy: Option<u32>,
}

pub fn scan_cell<'a, I>(me: &SpatialEntry, cell: I, limits: ContactLimits) -> Contact
where
    I: IntoIterator<Item = &'a SpatialEntry>,
{
    let mut contact = Contact {
        separation: Vec3::ZERO,
        enemy: None,
    };
    let reach = limits.radius * 2.0;

    for other in cell
        .into_iter()
        .filter(|other| other.index != me.index)
        .take(limits.candidates)
    {
        let offset = flatten(me.position - other.position);
        let distance = offset.length();
        if distance < reach {
            // Coincident units are pushed apart along an arbitrary axis.
            let away = offset.try_normalize().unwrap_or(Vec3::X);
            contact.separation += away * ((reach - distance) / reach) * limits.push_speed;
        }
        if contact.enemy.is_none() && other.faction != me.faction && distance <= limits.melee_range {
            contact.enemy = Some(other.index);
        }
    }
    contact
}

pub fn schedule_collision(
    graph: &JobGraph,
    frame: &FrameBuffers,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let spatial = frame.spatial.clone();
    let transforms = frame.transforms.clone();
    let bitmasks = frame.bitmasks.clone();
    let targets = frame.targets.clone();
    let velocities = frame.velocities.clone();
    let index = Arc::clone(&frame.index);
    let limits = ContactLimits::from_config(config);
    let batch = config.small_batch;

    let desc = JobDesc::new("unit_collision")
        .reads([spatial.id(), transforms.id(), bitmasks.id()])
        .writes([targets.id(), velocities.id()]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let hash = spatial.read()?;
        let transforms = transforms.read()?;
        let bitmasks = bitmasks.read()?;
        let mut targets = targets.write()?;
        let mut velocities = velocities.write()?;

        targets
            .par_iter_mut()
            .zip(velocities.par_iter_mut())
            .enumerate()
            .with_min_len(batch)
            .for_each(|(unit, (target, body))| {
                let me = SpatialEntry {
                    index: unit as u32,
                    position: transforms[unit].position,
                    faction: bitmasks[unit].faction,
                };
                let contact = scan_cell(&me, hash.query_cell(me.position), limits);
                body.velocity = contact.separation;

                if index.unit_kinds[unit] == UnitKind::Ranged {
                    *target = AttackTarget::default();
                    return;
                }

                let keep = target.has_target()
                    && index
                        .unit_slot
                        .get(&target.entity)
                        .is_some_and(|&slot| {
                            bitmasks[slot].alive
                                && distance_xz(transforms[slot].position, me.position) <= limits.melee_range
                        });
                if !keep {
                    target.entity = contact
                        .enemy
                        .map(|slot| index.units[slot as usize])
                        .unwrap_or(NULL_HANDLE);
                }
            });
        Ok(())
    })
}
